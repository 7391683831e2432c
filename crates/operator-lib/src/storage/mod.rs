//! Storage management for the workload's persistent volumes
//!
//! The Storage Manager makes sure `config` and `shared-app` exist and are large
//! enough before any container that mounts them is applied. Backends are the
//! platform's storage layer, hidden behind [`StorageBackend`].

mod local;

pub use local::LocalStorage;

use crate::error::{OperatorError, Result};
use crate::models::{MountHandle, VolumeName, VolumeSpec};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Trait for storage backend implementations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Find storage already provisioned for a volume
    async fn lookup(&self, spec: &VolumeSpec) -> Result<Option<MountHandle>>;

    /// Provision storage for a volume
    async fn provision(&self, spec: &VolumeSpec) -> Result<MountHandle>;
}

/// Ensures volumes exist, caching handles so repeat calls are no-ops
pub struct StorageManager {
    backend: Arc<dyn StorageBackend>,
    handles: DashMap<VolumeName, MountHandle>,
}

impl StorageManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            handles: DashMap::new(),
        }
    }

    /// Ensure a volume is provisioned and large enough
    pub async fn ensure(&self, spec: &VolumeSpec) -> Result<MountHandle> {
        if let Some(handle) = self.handles.get(&spec.name) {
            if handle.capacity_bytes >= spec.minimum_size_bytes {
                return Ok(handle.clone());
            }
        }

        let handle = match self.backend.lookup(spec).await? {
            Some(existing) => {
                debug!(volume = %spec.name, backing_id = %existing.backing_id, "Found existing volume");
                existing
            }
            None => {
                let created = self.backend.provision(spec).await?;
                info!(
                    volume = %spec.name,
                    backing_id = %created.backing_id,
                    capacity_bytes = created.capacity_bytes,
                    "Provisioned volume"
                );
                created
            }
        };

        if handle.capacity_bytes < spec.minimum_size_bytes {
            return Err(OperatorError::StorageProvision {
                volume: spec.name,
                reason: format!(
                    "{} provides {} bytes, {} required",
                    handle.backing_id, handle.capacity_bytes, spec.minimum_size_bytes
                ),
            });
        }

        self.handles.insert(spec.name, handle.clone());
        Ok(handle)
    }

    /// Cached handle for a volume, if it has been ensured
    pub fn handle(&self, volume: VolumeName) -> Option<MountHandle> {
        self.handles.get(&volume).map(|h| h.clone())
    }

    /// Forget cached handles (after teardown)
    pub fn reset(&self) {
        self.handles.clear();
    }
}
