//! Orchestration platform interface
//!
//! The platform runs the containers; the operator only tells it what to run
//! and asks it what is running. Two implementations are provided: an
//! in-process platform for local mode and tests, and a Kubernetes platform.

mod kubernetes;
mod memory;

pub use kubernetes::{parse_quantity, KubePlatform, KubeStorage};
pub use memory::InMemoryPlatform;

use crate::error::Result;
use crate::models::{ContainerName, ContainerProbe, ContainerSpec, WorkloadFile};
use crate::workload::NetworkPlan;
use std::collections::BTreeMap;

pub use async_trait::async_trait;

/// Trait for orchestration platform implementations
#[async_trait]
pub trait Platform: Send + Sync {
    /// Apply (create or replace) a single container
    async fn apply_container(&self, spec: &ContainerSpec) -> Result<()>;

    /// Re-create the whole pod group with the given specs
    async fn restart_workload(&self, specs: &[ContainerSpec]) -> Result<()>;

    /// Report whether a container is running and which mounts it can write
    async fn probe(&self, spec: &ContainerSpec) -> Result<ContainerProbe>;

    /// Write a file inside a container
    async fn push_file(&self, container: ContainerName, file: &WorkloadFile) -> Result<()>;

    /// Run a command inside a container and wait for it to exit successfully
    async fn exec(
        &self,
        container: ContainerName,
        command: &[String],
        environment: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Create network attachments and expose service ports
    async fn ensure_network(&self, plan: &NetworkPlan) -> Result<()>;

    /// Delete network attachments created by `ensure_network`
    async fn remove_network(&self, plan: &NetworkPlan) -> Result<()>;
}
