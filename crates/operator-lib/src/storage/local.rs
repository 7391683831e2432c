//! Directory-backed storage for local mode
//!
//! Each volume is a directory under a root path. Volumes reserve their
//! requested size out of a fixed backend capacity, and their handles report
//! the reserved size.

use super::StorageBackend;
use crate::error::{OperatorError, Result};
use crate::models::{MountHandle, VolumeName, VolumeSpec};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage backend that provisions volumes as directories
pub struct LocalStorage {
    root: PathBuf,
    capacity_bytes: u64,
    reserved: DashMap<VolumeName, u64>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, capacity_bytes: u64) -> Self {
        Self {
            root: root.into(),
            capacity_bytes,
            reserved: DashMap::new(),
        }
    }

    /// Directory backing a volume
    pub fn volume_path(&self, spec: &VolumeSpec) -> PathBuf {
        self.root.join(spec.name.as_str())
    }

    /// Capacity not reserved by other volumes
    pub fn available_bytes(&self, excluding: VolumeName) -> u64 {
        let used: u64 = self
            .reserved
            .iter()
            .filter(|entry| *entry.key() != excluding)
            .map(|entry| *entry.value())
            .sum();
        self.capacity_bytes.saturating_sub(used)
    }

    fn reserve(&self, spec: &VolumeSpec) -> Result<()> {
        let available = self.available_bytes(spec.name);
        if spec.minimum_size_bytes > available {
            return Err(OperatorError::StorageProvision {
                volume: spec.name,
                reason: format!(
                    "requested {} bytes but only {} of {} bytes are unreserved",
                    spec.minimum_size_bytes, available, self.capacity_bytes
                ),
            });
        }
        self.reserved.insert(spec.name, spec.minimum_size_bytes);
        Ok(())
    }

    fn handle(&self, spec: &VolumeSpec, path: &Path) -> MountHandle {
        MountHandle {
            volume: spec.name,
            backing_id: path.display().to_string(),
            capacity_bytes: spec.minimum_size_bytes,
        }
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn lookup(&self, spec: &VolumeSpec) -> Result<Option<MountHandle>> {
        let path = self.volume_path(spec);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                self.reserve(spec)?;
                Ok(Some(self.handle(spec, &path)))
            }
            Ok(_) => Err(OperatorError::StorageProvision {
                volume: spec.name,
                reason: format!("{} exists and is not a directory", path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OperatorError::StorageProvision {
                volume: spec.name,
                reason: e.to_string(),
            }),
        }
    }

    async fn provision(&self, spec: &VolumeSpec) -> Result<MountHandle> {
        self.reserve(spec)?;

        let path = self.volume_path(spec);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| OperatorError::StorageProvision {
                volume: spec.name,
                reason: format!("failed to create {}: {}", path.display(), e),
            })?;
        debug!(path = %path.display(), "Created volume directory");

        Ok(self.handle(spec, &path))
    }
}
