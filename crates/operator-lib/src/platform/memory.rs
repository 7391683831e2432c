//! In-process platform
//!
//! Keeps applied specs, pushed files and network state in memory. Containers
//! become ready as soon as they are applied unless told otherwise, which makes
//! it usable both for local runs and as a scriptable test double.

use super::Platform;
use crate::error::{OperatorError, Result};
use crate::models::{ContainerName, ContainerProbe, ContainerSpec, WorkloadFile};
use crate::workload::NetworkPlan;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct PlatformState {
    applied: BTreeMap<ContainerName, ContainerSpec>,
    ready_overrides: BTreeMap<ContainerName, bool>,
    read_only_mounts: BTreeSet<(ContainerName, String)>,
    rejections: BTreeMap<ContainerName, u32>,
    files: BTreeMap<String, WorkloadFile>,
    execs: Vec<(ContainerName, Vec<String>)>,
    network: Option<NetworkPlan>,
    apply_calls: BTreeMap<ContainerName, usize>,
    probe_calls: BTreeMap<ContainerName, usize>,
    restarts: usize,
    latency: Option<Duration>,
}

/// Platform that runs nothing and remembers everything
pub struct InMemoryPlatform {
    state: RwLock<PlatformState>,
    auto_ready: bool,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    /// Containers report ready as soon as they are applied
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PlatformState::default()),
            auto_ready: true,
        }
    }

    /// Containers stay unready until `set_ready` is called
    pub fn manual() -> Self {
        Self {
            state: RwLock::new(PlatformState::default()),
            auto_ready: false,
        }
    }

    /// Force a container's readiness
    pub async fn set_ready(&self, container: ContainerName, ready: bool) {
        self.state.write().await.ready_overrides.insert(container, ready);
    }

    /// Report a mount as read-only inside a container
    pub async fn set_read_only(&self, container: ContainerName, path: &str) {
        self.state
            .write()
            .await
            .read_only_mounts
            .insert((container, path.to_string()));
    }

    /// Reject the next `times` applies of a container
    pub async fn reject(&self, container: ContainerName, times: u32) {
        self.state.write().await.rejections.insert(container, times);
    }

    /// Delay every call, to exercise caller timeouts
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.write().await.latency = latency;
    }

    pub async fn applied_spec(&self, container: ContainerName) -> Option<ContainerSpec> {
        self.state.read().await.applied.get(&container).cloned()
    }

    pub async fn apply_count(&self, container: ContainerName) -> usize {
        self.state
            .read()
            .await
            .apply_calls
            .get(&container)
            .copied()
            .unwrap_or(0)
    }

    pub async fn probe_count(&self, container: ContainerName) -> usize {
        self.state
            .read()
            .await
            .probe_calls
            .get(&container)
            .copied()
            .unwrap_or(0)
    }

    pub async fn restart_count(&self) -> usize {
        self.state.read().await.restarts
    }

    pub async fn file(&self, path: &str) -> Option<WorkloadFile> {
        self.state.read().await.files.get(path).cloned()
    }

    pub async fn exec_log(&self) -> Vec<(ContainerName, Vec<String>)> {
        self.state.read().await.execs.clone()
    }

    pub async fn network(&self) -> Option<NetworkPlan> {
        self.state.read().await.network.clone()
    }

    async fn simulate_latency(&self) {
        let latency = self.state.read().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn is_running(&self, state: &PlatformState, container: ContainerName) -> bool {
        state.applied.contains_key(&container)
            && state
                .ready_overrides
                .get(&container)
                .copied()
                .unwrap_or(self.auto_ready)
    }
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn apply_container(&self, spec: &ContainerSpec) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        *state.apply_calls.entry(spec.name).or_default() += 1;

        if let Some(remaining) = state.rejections.get_mut(&spec.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(OperatorError::ContainerApply {
                    container: spec.name,
                    reason: "spec rejected by platform".to_string(),
                });
            }
        }

        debug!(container = %spec.name, image = %spec.image, "Applied container");
        state.applied.insert(spec.name, spec.clone());
        Ok(())
    }

    async fn restart_workload(&self, specs: &[ContainerSpec]) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        state.restarts += 1;
        state.applied = specs.iter().map(|s| (s.name, s.clone())).collect();
        debug!(containers = specs.len(), "Restarted workload");
        Ok(())
    }

    async fn probe(&self, spec: &ContainerSpec) -> Result<ContainerProbe> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        *state.probe_calls.entry(spec.name).or_default() += 1;

        if !self.is_running(&state, spec.name) {
            return Ok(ContainerProbe::default());
        }

        let writable_mounts = state
            .applied
            .get(&spec.name)
            .map(|applied| {
                applied
                    .mounts
                    .iter()
                    .filter(|m| {
                        !state
                            .read_only_mounts
                            .contains(&(spec.name, m.path.clone()))
                    })
                    .map(|m| m.path.clone())
                    .collect()
            })
            .unwrap_or_default();

        Ok(ContainerProbe {
            running: true,
            writable_mounts,
        })
    }

    async fn push_file(&self, container: ContainerName, file: &WorkloadFile) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        if !state.applied.contains_key(&container) {
            return Err(OperatorError::platform(
                format!("push {}", file.path),
                format!("container {} is not running", container),
                true,
            ));
        }
        state.files.insert(file.path.clone(), file.clone());
        Ok(())
    }

    async fn exec(
        &self,
        container: ContainerName,
        command: &[String],
        _environment: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        if !self.is_running(&state, container) {
            return Err(OperatorError::platform(
                format!("exec in {}", container),
                format!("container {} is not running", container),
                true,
            ));
        }
        state.execs.push((container, command.to_vec()));
        Ok(())
    }

    async fn ensure_network(&self, plan: &NetworkPlan) -> Result<()> {
        self.simulate_latency().await;
        self.state.write().await.network = Some(plan.clone());
        Ok(())
    }

    async fn remove_network(&self, _plan: &NetworkPlan) -> Result<()> {
        self.simulate_latency().await;
        self.state.write().await.network = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageReference, Mount, ReadinessPredicate, SecuritySettings, VolumeName};

    fn spec(name: ContainerName) -> ContainerSpec {
        ContainerSpec {
            name,
            image: ImageReference::new("test", "1"),
            mounts: vec![Mount {
                volume: VolumeName::SharedApp,
                path: "/pod-share/".to_string(),
                backing_id: "shared".to_string(),
            }],
            command: "sleep infinity".to_string(),
            environment: BTreeMap::new(),
            security: SecuritySettings::default(),
            readiness: ReadinessPredicate::default(),
        }
    }

    #[tokio::test]
    async fn test_applied_container_reports_writable_mounts() {
        let platform = InMemoryPlatform::new();
        let bessd = spec(ContainerName::Bessd);

        assert!(!platform.probe(&bessd).await.unwrap().running);

        platform.apply_container(&bessd).await.unwrap();
        let probe = platform.probe(&bessd).await.unwrap();
        assert!(probe.running);
        assert_eq!(probe.writable_mounts, vec!["/pod-share/".to_string()]);

        platform.set_read_only(ContainerName::Bessd, "/pod-share/").await;
        assert!(platform.probe(&bessd).await.unwrap().writable_mounts.is_empty());
    }

    #[tokio::test]
    async fn test_manual_platform_waits_for_readiness() {
        let platform = InMemoryPlatform::manual();
        let web = spec(ContainerName::Web);
        platform.apply_container(&web).await.unwrap();

        assert!(!platform.probe(&web).await.unwrap().running);
        platform.set_ready(ContainerName::Web, true).await;
        assert!(platform.probe(&web).await.unwrap().running);
        assert_eq!(platform.probe_count(ContainerName::Web).await, 2);
    }

    #[tokio::test]
    async fn test_rejections_are_consumed() {
        let platform = InMemoryPlatform::new();
        platform.reject(ContainerName::Web, 1).await;

        let web = spec(ContainerName::Web);
        assert!(platform.apply_container(&web).await.is_err());
        assert!(platform.apply_container(&web).await.is_ok());
        assert_eq!(platform.apply_count(ContainerName::Web).await, 2);
    }

    #[tokio::test]
    async fn test_push_requires_applied_container() {
        let platform = InMemoryPlatform::new();
        let file = WorkloadFile {
            path: "/etc/bess/conf/upf.json".to_string(),
            contents: "{}".to_string(),
            permissions: 0o644,
        };

        assert!(platform.push_file(ContainerName::Bessd, &file).await.is_err());
        platform.apply_container(&spec(ContainerName::Bessd)).await.unwrap();
        platform.push_file(ContainerName::Bessd, &file).await.unwrap();
        assert_eq!(platform.file("/etc/bess/conf/upf.json").await, Some(file));
    }
}
