//! Reconciliation loop
//!
//! One task owns the workload unit. It waits for an event (or a requeue
//! deadline), drains everything else already queued, folds the coalesced
//! events into the unit and runs exactly one pass.

use super::pass::{Intent, PassResult, Reconciler};
use super::queue::{CoalescingQueue, OperatorEvent, PushOutcome};
use super::state::WorkloadUnit;
use crate::catalog::RESOURCES;
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::models::{Phase, ReconciliationStatus, VolumeName, WorkloadConfig};
use crate::observability::{OperatorMetrics, StructuredLogger};
use crate::relation::{RelationBroker, RelationInterface};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Distinct pending events kept between passes (default: 32)
    pub queue_capacity: usize,
    /// Event channel buffer size (default: 256)
    pub channel_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            channel_capacity: 256,
        }
    }
}

/// Sender side of the loop, shared with the API
#[derive(Clone)]
pub struct OperatorHandle {
    events: mpsc::Sender<OperatorEvent>,
    cancel: Arc<AtomicBool>,
    readiness_signal: Arc<Notify>,
    unit: watch::Receiver<WorkloadUnit>,
}

impl OperatorHandle {
    /// Deliver a lifecycle event
    ///
    /// A remove event also cancels the pass in progress at its next step
    /// boundary; readiness signals wake a pass waiting on containers.
    pub async fn send(&self, event: OperatorEvent) -> Result<()> {
        match &event {
            OperatorEvent::Remove => {
                self.cancel.store(true, Ordering::SeqCst);
                self.readiness_signal.notify_one();
            }
            OperatorEvent::ContainerReady { .. } | OperatorEvent::ContainerUnready { .. } => {
                self.readiness_signal.notify_one();
            }
            _ => {}
        }

        self.events
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("reconciliation loop is not running"))
    }

    pub fn status(&self) -> ReconciliationStatus {
        self.unit.borrow().status.clone()
    }

    /// Snapshot of the unit after the last completed pass
    pub fn unit(&self) -> WorkloadUnit {
        self.unit.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkloadUnit> {
        self.unit.clone()
    }

    /// Wait until a completed pass satisfies `predicate`
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Option<WorkloadUnit>
    where
        F: Fn(&WorkloadUnit) -> bool,
    {
        let mut rx = self.unit.clone();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                {
                    let unit = rx.borrow_and_update();
                    if predicate(&unit) {
                        return Some(unit.clone());
                    }
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await;
        waited.ok().flatten()
    }
}

/// The single task that runs reconciliation passes
pub struct ReconcileLoop {
    reconciler: Reconciler,
    broker: Arc<RelationBroker>,
    health: HealthRegistry,
    metrics: OperatorMetrics,
    logger: StructuredLogger,
    events: mpsc::Receiver<OperatorEvent>,
    queue: CoalescingQueue,
    cancel: Arc<AtomicBool>,
    unit: WorkloadUnit,
    unit_tx: watch::Sender<WorkloadUnit>,
    remove_requested: bool,
    coalesced_reported: u64,
}

impl ReconcileLoop {
    pub fn new(
        reconciler: Reconciler,
        broker: Arc<RelationBroker>,
        health: HealthRegistry,
        unit: WorkloadUnit,
        config: LoopConfig,
    ) -> (Self, OperatorHandle) {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (unit_tx, unit_rx) = watch::channel(unit.clone());
        let cancel = Arc::new(AtomicBool::new(false));
        let logger = StructuredLogger::new(reconciler.config().app_name.clone());

        let handle = OperatorHandle {
            events: events_tx,
            cancel: cancel.clone(),
            readiness_signal: reconciler.readiness_signal(),
            unit: unit_rx,
        };

        let loop_instance = Self {
            reconciler,
            broker,
            health,
            metrics: OperatorMetrics::new(),
            logger,
            events: events_rx,
            queue: CoalescingQueue::new(config.queue_capacity),
            cancel,
            unit,
            unit_tx,
            remove_requested: false,
            coalesced_reported: 0,
        };

        (loop_instance, handle)
    }

    /// Run until the workload is removed, the channel closes or shutdown is signalled
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(app = %self.reconciler.config().app_name, "Starting reconciliation loop");
        self.register_health().await;

        let mut requeue: Option<Instant> = None;

        loop {
            let requeue_at = requeue;
            let first = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!("Event channel closed, stopping reconciliation loop");
                        self.health
                            .set_unhealthy(components::RECONCILER, "reconciliation loop stopped")
                            .await;
                        break;
                    }
                },
                _ = async {
                    match requeue_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => OperatorEvent::Retry,
                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation loop");
                    break;
                }
            };

            self.enqueue(first);
            while let Ok(event) = self.events.try_recv() {
                self.enqueue(event);
            }
            let pending = self.queue.drain();
            self.fold(pending);
            self.report_coalesced();

            if self.remove_requested {
                self.teardown().await;
                break;
            }

            let result = self.run_pass().await;
            requeue = result.requeue_after().map(|delay| {
                debug!(delay_ms = delay.as_millis() as u64, "Pass requeued");
                Instant::now() + delay
            });
        }
    }

    fn enqueue(&mut self, event: OperatorEvent) {
        match self.queue.push(event) {
            PushOutcome::Queued | PushOutcome::Coalesced => {}
            PushOutcome::Evicted(evicted) => {
                debug!(kind = evicted.kind(), "Evicted pending signal from full queue");
            }
            PushOutcome::Full(event) => {
                // Make room by folding what is already pending
                let pending = self.queue.drain();
                self.fold(pending);
                self.queue.push(event);
            }
        }
    }

    /// Apply queued events to the unit and relation records
    fn fold(&mut self, events: Vec<OperatorEvent>) {
        for event in events {
            debug!(kind = event.kind(), "Folding event");
            match event {
                OperatorEvent::Install => self.unit.installed = true,
                OperatorEvent::ConfigChanged { config } => self.unit.config = config,
                OperatorEvent::ResourceAttached { resource, image } => {
                    match self.reconciler.attach_resource(&resource, &image) {
                        Ok(()) => info!(resource = %resource, image = %image, "Resource attached"),
                        Err(e) => warn!(resource = %resource, error = %e, "Ignoring resource attachment"),
                    }
                }
                OperatorEvent::RelationJoined {
                    interface,
                    relation_id,
                    remote,
                } => {
                    self.broker.relation_joined(interface, relation_id, &remote);
                }
                OperatorEvent::RelationChanged {
                    interface,
                    relation_id,
                    remote,
                } => self.broker.relation_changed(interface, relation_id, &remote),
                OperatorEvent::RelationBroken { relation_id } => {
                    self.broker.relation_broken(relation_id);
                }
                OperatorEvent::Remove => self.remove_requested = true,
                OperatorEvent::ContainerUnready { container } => {
                    self.unit.ready.remove(&container);
                }
                OperatorEvent::ContainerReady { .. } | OperatorEvent::Retry => {}
            }
        }
        self.metrics
            .set_relation_subscribers(self.broker.subscriber_count() as i64);
    }

    fn report_coalesced(&mut self) {
        let total = self.queue.coalesced();
        if total > self.coalesced_reported {
            self.metrics
                .add_events_coalesced(total - self.coalesced_reported);
            self.coalesced_reported = total;
        }
    }

    async fn run_pass(&mut self) -> PassResult {
        if self.unit.phase() == Phase::Error {
            // Error is terminal for the previous attempt; a new event starts over
            self.unit.reset_retries();
        }

        let previous = self.unit.status.clone();
        let start = Instant::now();
        let unit = std::mem::take(&mut self.unit);
        let result = self.reconciler.reconcile(unit, &self.cancel).await;

        self.metrics
            .observe_pass(start.elapsed().as_secs_f64(), result.status.phase);
        self.finish_pass(&previous, &result).await;
        result
    }

    async fn teardown(&mut self) {
        let previous = self.unit.status.clone();
        let unit = std::mem::take(&mut self.unit);
        let result = self.reconciler.teardown(unit).await;
        self.finish_pass(&previous, &result).await;
    }

    async fn finish_pass(&mut self, previous: &ReconciliationStatus, result: &PassResult) {
        self.apply_intents(&result.intents);

        if previous.phase != result.status.phase {
            self.logger.log_phase_transition(
                previous.phase,
                result.status.phase,
                &result.status.message,
            );
        }
        self.metrics.set_phase(result.status.phase);
        self.update_health(&result.unit).await;

        self.unit = result.unit.clone();
        self.unit_tx.send_replace(self.unit.clone());
    }

    fn apply_intents(&self, intents: &[Intent]) {
        for intent in intents {
            let (interface, published, changed) = match intent {
                Intent::PublishUpf(data) => (
                    RelationInterface::Upf,
                    true,
                    self.broker.publish_upf(data.clone()),
                ),
                Intent::PublishMetrics(endpoint) => (
                    RelationInterface::MetricsEndpoint,
                    true,
                    self.broker.publish_metrics(endpoint.clone()),
                ),
                Intent::WithdrawUpf => (RelationInterface::Upf, false, self.broker.withdraw_upf()),
                Intent::WithdrawAll => {
                    self.broker.withdraw_all();
                    continue;
                }
                Intent::RequeueAfter(_) | Intent::Terminate => continue,
            };
            if changed {
                self.logger
                    .log_relation_update(interface, published, self.broker.subscriber_count());
            }
        }
    }

    async fn register_health(&self) {
        for component in [
            components::CATALOG,
            components::STORAGE,
            components::RECONCILER,
            components::RELATIONS,
        ] {
            self.health.register(component).await;
        }
        self.update_health(&self.unit).await;
    }

    async fn update_health(&self, unit: &WorkloadUnit) {
        self.health
            .update(components::RECONCILER, ComponentHealth::for_status(&unit.status))
            .await;

        let attached = self.reconciler.catalog().attached_count();
        if attached < RESOURCES.len() {
            self.health
                .set_degraded(
                    components::CATALOG,
                    format!("{} of {} images attached", attached, RESOURCES.len()),
                )
                .await;
        } else {
            self.health.set_healthy(components::CATALOG).await;
        }

        let missing: Vec<_> = VolumeName::ALL
            .iter()
            .filter(|v| !unit.mounts.contains_key(*v))
            .map(|v| v.as_str())
            .collect();
        if missing.is_empty() || !unit.installed {
            self.health.set_healthy(components::STORAGE).await;
        } else {
            self.health
                .set_degraded(components::STORAGE, format!("not provisioned: {}", missing.join(", ")))
                .await;
        }

        self.health.set_healthy(components::RELATIONS).await;
    }
}

/// Builder for the reconciliation loop
pub struct ReconcileLoopBuilder {
    reconciler: Option<Reconciler>,
    broker: Option<Arc<RelationBroker>>,
    health: Option<HealthRegistry>,
    initial_config: WorkloadConfig,
    config: LoopConfig,
}

impl ReconcileLoopBuilder {
    pub fn new() -> Self {
        Self {
            reconciler: None,
            broker: None,
            health: None,
            initial_config: WorkloadConfig::default(),
            config: LoopConfig::default(),
        }
    }

    pub fn reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn broker(mut self, broker: Arc<RelationBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Workload configuration in effect before the first config-changed event
    pub fn initial_config(mut self, config: WorkloadConfig) -> Self {
        self.initial_config = config;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<(ReconcileLoop, OperatorHandle)> {
        let reconciler = self
            .reconciler
            .ok_or_else(|| anyhow::anyhow!("Reconciler is required"))?;
        let broker = self.broker.unwrap_or_default();
        let health = self.health.unwrap_or_default();

        Ok(ReconcileLoop::new(
            reconciler,
            broker,
            health,
            WorkloadUnit::new(self.initial_config),
            self.config,
        ))
    }
}

impl Default for ReconcileLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
