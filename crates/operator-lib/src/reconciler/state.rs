//! The workload unit threaded through every reconciliation pass

use crate::models::{
    ContainerName, MountHandle, Phase, ReconciliationStatus, VolumeName, WorkloadConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Everything the operator knows about its single deployed workload
///
/// A pass consumes the unit and returns the next one; nothing else mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadUnit {
    pub installed: bool,
    pub removed: bool,
    pub config: WorkloadConfig,
    pub mounts: BTreeMap<VolumeName, MountHandle>,
    /// Fingerprint of the spec last applied per container
    pub applied: BTreeMap<ContainerName, String>,
    /// Mount topology fingerprint of the applied specs
    pub topology: Option<String>,
    pub network: Option<String>,
    /// Fingerprint of each pushed file, by path
    pub pushed_files: BTreeMap<String, String>,
    /// Fingerprint of the bessd spec and config file the post-start command ran for
    pub poststart: Option<String>,
    /// Containers observed ready by the last pass
    pub ready: BTreeSet<ContainerName>,
    pub storage_failures: u32,
    pub resource_failures: u32,
    pub readiness_timeouts: u32,
    pub platform_failures: u32,
    pub passes: u64,
    pub status: ReconciliationStatus,
}

impl WorkloadUnit {
    pub fn new(config: WorkloadConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn phase(&self) -> Phase {
        self.status.phase
    }

    /// Forget everything applied to the platform, keeping configuration
    pub fn clear_applied(&mut self) {
        self.applied.clear();
        self.topology = None;
        self.network = None;
        self.pushed_files.clear();
        self.poststart = None;
        self.ready.clear();
    }

    /// Start every retry sequence over
    pub fn reset_retries(&mut self) {
        self.storage_failures = 0;
        self.resource_failures = 0;
        self.readiness_timeouts = 0;
        self.platform_failures = 0;
    }
}
