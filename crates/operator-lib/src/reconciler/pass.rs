//! A single reconciliation pass
//!
//! `Reconciler::reconcile` takes the current `WorkloadUnit`, converges the
//! platform toward it and returns the next unit, the derived status and the
//! side effects the loop must carry out. Errors never leave a pass; each one is
//! classified into a phase here.

use super::backoff::BackoffPolicy;
use super::state::WorkloadUnit;
use crate::catalog::ResourceCatalog;
use crate::error::{OperatorError, Result};
use crate::models::{
    fingerprint_of, ContainerName, ContainerSpec, ImageReference, Phase, ReconciliationStatus,
};
use crate::observability::{OperatorMetrics, StructuredLogger};
use crate::platform::Platform;
use crate::relation::{MetricsRelationData, UpfRelationData};
use crate::storage::StorageManager;
use crate::workload::{
    mount_topology, render_config_file, ContainerSpecBuilder, NetworkPlan, POSTSTART_COMMAND,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tunables for a reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Application name; also the StatefulSet and Service name
    pub app_name: String,
    pub namespace: String,
    /// Deadline for each platform or storage call (default: 10 seconds)
    pub call_timeout: Duration,
    /// How long one pass waits for containers to become ready (default: 60 seconds)
    pub readiness_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Consecutive failed passes before storage failure becomes an error (default: 5)
    pub max_storage_attempts: u32,
    /// Apply attempts per container per pass (default: 2)
    pub apply_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            app_name: "upf".to_string(),
            namespace: "default".to_string(),
            call_timeout: Duration::from_secs(10),
            readiness_timeout: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            max_storage_attempts: 5,
            apply_attempts: 2,
        }
    }
}

/// Side effects requested by a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    PublishUpf(UpfRelationData),
    PublishMetrics(MetricsRelationData),
    WithdrawUpf,
    WithdrawAll,
    RequeueAfter(Duration),
    Terminate,
}

/// Output of one pass
#[derive(Debug, Clone)]
pub struct PassResult {
    pub unit: WorkloadUnit,
    pub status: ReconciliationStatus,
    pub intents: Vec<Intent>,
}

impl PassResult {
    /// Requested requeue delay, if any
    pub fn requeue_after(&self) -> Option<Duration> {
        self.intents.iter().find_map(|i| match i {
            Intent::RequeueAfter(delay) => Some(*delay),
            _ => None,
        })
    }

    pub fn terminates(&self) -> bool {
        self.intents.contains(&Intent::Terminate)
    }
}

/// Why a pass stopped before reaching Active
#[derive(Debug)]
enum Halt {
    /// Waiting on the platform; retried after the delay
    Installing(String, Duration),
    /// Waiting on external input; optionally retried
    Blocked(String, Option<Duration>),
    Failed(String),
    Cancelled,
}

/// Drives one workload toward its desired state
pub struct Reconciler {
    config: ReconcilerConfig,
    catalog: ResourceCatalog,
    storage: StorageManager,
    platform: Arc<dyn Platform>,
    builder: ContainerSpecBuilder,
    readiness_signal: Arc<Notify>,
    metrics: OperatorMetrics,
    logger: StructuredLogger,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        catalog: ResourceCatalog,
        storage: StorageManager,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let logger = StructuredLogger::new(config.app_name.clone());
        Self {
            config,
            catalog,
            storage,
            platform,
            builder: ContainerSpecBuilder::new(),
            readiness_signal: Arc::new(Notify::new()),
            metrics: OperatorMetrics::new(),
            logger,
        }
    }

    /// Replace the spec builder (e.g. to use a custom mount table)
    pub fn with_builder(mut self, builder: ContainerSpecBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    /// Wakes a pass waiting on container readiness
    pub fn readiness_signal(&self) -> Arc<Notify> {
        self.readiness_signal.clone()
    }

    /// Attach an image resource delivered by a resource-attached event
    pub fn attach_resource(&mut self, resource: &str, image: &str) -> Result<()> {
        let image: ImageReference = image.parse()?;
        self.catalog.attach(resource, image)
    }

    /// Hostname published to consumers and rendered into `upf.json`
    pub fn hostname(&self, unit: &WorkloadUnit) -> String {
        unit.config.upf_hostname.clone().unwrap_or_else(|| {
            format!(
                "{}.{}.svc.cluster.local",
                self.config.app_name, self.config.namespace
            )
        })
    }

    /// Run one pass over `unit`
    pub async fn reconcile(&self, mut unit: WorkloadUnit, cancel: &AtomicBool) -> PassResult {
        unit.passes += 1;

        if !unit.installed {
            let status = ReconciliationStatus::default();
            unit.status = status.clone();
            return PassResult {
                unit,
                status,
                intents: Vec::new(),
            };
        }

        let outcome = self.converge(&mut unit, cancel).await;
        let hostname = self.hostname(&unit);

        let (status, intents) = match outcome {
            Ok(()) => {
                unit.platform_failures = 0;
                unit.readiness_timeouts = 0;
                (
                    ReconciliationStatus::active(),
                    vec![
                        Intent::PublishUpf(UpfRelationData::new(&hostname, &unit.config)),
                        Intent::PublishMetrics(MetricsRelationData::new(&hostname)),
                    ],
                )
            }
            Err(Halt::Installing(message, delay)) => (
                ReconciliationStatus::new(Phase::Installing, message),
                vec![
                    Intent::WithdrawUpf,
                    Intent::PublishMetrics(MetricsRelationData::new(&hostname)),
                    Intent::RequeueAfter(delay),
                ],
            ),
            Err(Halt::Blocked(message, requeue)) => {
                let mut intents = vec![Intent::WithdrawUpf];
                intents.extend(requeue.map(Intent::RequeueAfter));
                (ReconciliationStatus::new(Phase::Blocked, message), intents)
            }
            Err(Halt::Failed(message)) => (
                ReconciliationStatus::new(Phase::Error, message),
                vec![Intent::WithdrawUpf],
            ),
            Err(Halt::Cancelled) => (
                ReconciliationStatus::new(Phase::Waiting, "removal requested"),
                vec![Intent::WithdrawAll],
            ),
        };

        self.metrics.set_containers_ready(unit.ready.len() as i64);
        unit.status = status.clone();
        PassResult {
            unit,
            status,
            intents,
        }
    }

    /// Remove what the operator created and stop publishing
    pub async fn teardown(&self, mut unit: WorkloadUnit) -> PassResult {
        let plan = NetworkPlan::for_config(&unit.config);
        if let Err(e) = self
            .call("remove network", self.platform.remove_network(&plan))
            .await
        {
            warn!(error = %e, "Failed to remove network attachments during teardown");
        }

        self.storage.reset();
        unit.clear_applied();
        unit.mounts.clear();
        unit.installed = false;
        unit.removed = true;
        self.logger.log_teardown(unit.passes);

        let status = ReconciliationStatus::new(Phase::Waiting, "workload removed");
        unit.status = status.clone();
        PassResult {
            unit,
            status,
            intents: vec![Intent::WithdrawAll, Intent::Terminate],
        }
    }

    async fn converge(&self, unit: &mut WorkloadUnit, cancel: &AtomicBool) -> std::result::Result<(), Halt> {
        if let Err(e) = unit.config.validate() {
            return Err(self.halt(unit, e));
        }

        let images = match self.catalog.resolve_all() {
            Ok(images) => images,
            Err(e) => return Err(self.halt(unit, e)),
        };
        unit.resource_failures = 0;
        self.checkpoint(cancel)?;

        let plan = NetworkPlan::for_config(&unit.config);
        let network = fingerprint_of(&plan);
        if unit.network.as_deref() != Some(network.as_str()) {
            if let Err(e) = self
                .call("ensure network", self.platform.ensure_network(&plan))
                .await
            {
                return Err(self.halt(unit, e));
            }
            info!(attachments = plan.attachments.len(), "Network attachments ensured");
            unit.network = Some(network);
        }
        self.checkpoint(cancel)?;

        for spec in unit.config.volume_specs() {
            let ensured = match tokio::time::timeout(self.config.call_timeout, self.storage.ensure(&spec)).await {
                Ok(result) => result,
                Err(_) => Err(OperatorError::StorageProvision {
                    volume: spec.name,
                    reason: format!(
                        "storage backend timed out after {}ms",
                        self.config.call_timeout.as_millis()
                    ),
                }),
            };
            match ensured {
                Ok(handle) => {
                    unit.mounts.insert(spec.name, handle);
                }
                Err(e) => return Err(self.halt(unit, e)),
            }
        }
        unit.storage_failures = 0;
        self.checkpoint(cancel)?;

        let specs = match self.builder.build(&images, &unit.mounts, &unit.config) {
            Ok(specs) => specs,
            Err(e) => return Err(self.halt(unit, e)),
        };

        self.apply(unit, &specs, cancel).await?;
        self.await_ready(unit, &specs, cancel).await
    }

    /// Apply changed specs one container at a time, or re-roll on topology change
    async fn apply(
        &self,
        unit: &mut WorkloadUnit,
        specs: &[ContainerSpec],
        cancel: &AtomicBool,
    ) -> std::result::Result<(), Halt> {
        let topology = mount_topology(specs);

        if let Some(previous) = unit.topology.clone() {
            if previous != topology {
                self.checkpoint(cancel)?;
                info!(previous = %previous, current = %topology, "Mount topology changed, restarting workload");
                if let Err(e) = self
                    .call("restart workload", self.platform.restart_workload(specs))
                    .await
                {
                    return Err(self.halt(unit, e));
                }
                let network = unit.network.take();
                unit.clear_applied();
                unit.network = network;
                for spec in specs {
                    unit.applied.insert(spec.name, spec.fingerprint());
                    self.metrics.inc_container_applies(spec.name);
                }
                unit.topology = Some(topology);
                return Ok(());
            }
        }

        for spec in specs {
            self.checkpoint(cancel)?;
            let fingerprint = spec.fingerprint();
            if unit.applied.get(&spec.name) == Some(&fingerprint) {
                continue;
            }

            if let Err(e) = self.apply_container(spec).await {
                return Err(self.halt(unit, e));
            }
            self.logger
                .log_container_applied(spec.name, &spec.image.to_string(), &fingerprint);
            unit.applied.insert(spec.name, fingerprint);
            unit.ready.remove(&spec.name);
        }

        unit.topology = Some(topology);
        Ok(())
    }

    /// Apply one container, retrying a rejected spec within the pass
    async fn apply_container(&self, spec: &ContainerSpec) -> Result<()> {
        let attempts = self.config.apply_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .call(
                    &format!("apply {}", spec.name),
                    self.platform.apply_container(spec),
                )
                .await
            {
                Ok(()) => {
                    self.metrics.inc_container_applies(spec.name);
                    return Ok(());
                }
                Err(e @ OperatorError::ContainerApply { .. }) => {
                    self.metrics.inc_apply_failures(spec.name);
                    if attempt >= attempts {
                        return Err(e);
                    }
                    warn!(container = %spec.name, attempt, error = %e, "Container spec rejected, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for each container in order; pfcp-agent is not probed before bessd is ready
    async fn await_ready(
        &self,
        unit: &mut WorkloadUnit,
        specs: &[ContainerSpec],
        cancel: &AtomicBool,
    ) -> std::result::Result<(), Halt> {
        let deadline = Instant::now() + self.config.readiness_timeout;
        let mut backoff = self.config.backoff.start();

        for spec in specs {
            if let Some(dependency) = spec.readiness.after {
                if !unit.ready.contains(&dependency) {
                    unit.ready.remove(&spec.name);
                    return Err(self.readiness_timeout(
                        unit,
                        format!("waiting for {} before {}", dependency, spec.name),
                    ));
                }
            }

            loop {
                self.checkpoint(cancel)?;
                let probe = match self
                    .call(&format!("probe {}", spec.name), self.platform.probe(spec))
                    .await
                {
                    Ok(probe) => probe,
                    Err(e) => return Err(self.halt(unit, e)),
                };

                if spec.readiness.is_satisfied_by(&probe) {
                    debug!(container = %spec.name, "Container ready");
                    unit.ready.insert(spec.name);
                    break;
                }
                unit.ready.remove(&spec.name);

                let now = Instant::now();
                if now >= deadline {
                    let message = match &spec.readiness.writable_mount {
                        Some(path) if probe.running => {
                            format!("waiting for {} to report {} writable", spec.name, path)
                        }
                        _ => format!("waiting for {} to become ready", spec.name),
                    };
                    return Err(self.readiness_timeout(unit, message));
                }

                let delay = std::cmp::min(backoff.next_delay(), deadline - now);
                tokio::select! {
                    _ = self.readiness_signal.notified() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if spec.name == ContainerName::Bessd {
                self.configure_bessd(unit, spec).await?;
            }
        }

        Ok(())
    }

    /// Push `upf.json` and run the post-start command once per bessd spec and file
    async fn configure_bessd(&self, unit: &mut WorkloadUnit, bessd: &ContainerSpec) -> std::result::Result<(), Halt> {
        let hostname = self.hostname(unit);
        let file = render_config_file(&unit.config, &hostname);
        let file_fingerprint = fingerprint_of(&file);

        if unit.pushed_files.get(&file.path) != Some(&file_fingerprint) {
            if let Err(e) = self
                .call(
                    &format!("push {}", file.path),
                    self.platform.push_file(ContainerName::Bessd, &file),
                )
                .await
            {
                return Err(self.halt(unit, e));
            }
            info!(path = %file.path, fingerprint = %file_fingerprint, "Config file pushed");
            unit.pushed_files.insert(file.path.clone(), file_fingerprint.clone());
        }

        let poststart = fingerprint_of(&(bessd.fingerprint(), &file_fingerprint));
        if unit.poststart.as_deref() != Some(poststart.as_str()) {
            let command: Vec<String> = POSTSTART_COMMAND.iter().map(|s| s.to_string()).collect();
            if let Err(e) = self
                .call(
                    "bessd post-start",
                    self.platform
                        .exec(ContainerName::Bessd, &command, &bessd.environment),
                )
                .await
            {
                return Err(self.halt(unit, e));
            }
            info!(command = %command.join(" "), "bessd post-start command completed");
            unit.poststart = Some(poststart);
        }

        Ok(())
    }

    fn readiness_timeout(&self, unit: &mut WorkloadUnit, message: String) -> Halt {
        let delay = self.config.backoff.delay(unit.readiness_timeouts);
        unit.readiness_timeouts = unit.readiness_timeouts.saturating_add(1);
        Halt::Installing(message, delay)
    }

    fn checkpoint(&self, cancel: &AtomicBool) -> std::result::Result<(), Halt> {
        if cancel.load(Ordering::SeqCst) {
            info!("Removal requested, stopping pass");
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    /// Run a collaborator call under the configured deadline
    async fn call<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(OperatorError::Timeout {
                operation: operation.to_string(),
                timeout: self.config.call_timeout,
            }),
        }
    }

    /// Classify an error into the phase the pass ends in
    fn halt(&self, unit: &mut WorkloadUnit, err: OperatorError) -> Halt {
        let backoff = self.config.backoff;
        match err {
            OperatorError::ResourceUnavailable { resource } => {
                let delay = backoff.delay(unit.resource_failures);
                unit.resource_failures = unit.resource_failures.saturating_add(1);
                Halt::Blocked(format!("waiting for resource: {}", resource), Some(delay))
            }
            OperatorError::StorageProvision { volume, reason } => {
                self.metrics.inc_storage_failures(volume);
                let delay = backoff.delay(unit.storage_failures);
                unit.storage_failures = unit.storage_failures.saturating_add(1);
                warn!(
                    volume = %volume,
                    reason = %reason,
                    attempt = unit.storage_failures,
                    "Storage not available"
                );
                if unit.storage_failures >= self.config.max_storage_attempts {
                    Halt::Failed(format!(
                        "storage provisioning failed for {} after {} attempts: {}",
                        volume, unit.storage_failures, reason
                    ))
                } else {
                    Halt::Blocked(format!("waiting for storage: {}", volume), Some(delay))
                }
            }
            err @ OperatorError::Configuration(_) => Halt::Blocked(err.to_string(), None),
            err @ OperatorError::ContainerApply { .. } => Halt::Failed(err.to_string()),
            err if err.is_retryable() => {
                let delay = backoff.delay(unit.platform_failures);
                unit.platform_failures = unit.platform_failures.saturating_add(1);
                Halt::Blocked(err.to_string(), Some(delay))
            }
            err => Halt::Failed(err.to_string()),
        }
    }
}
