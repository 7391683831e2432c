//! Lifecycle events and the coalescing queue that batches them between passes

use crate::models::{ContainerName, WorkloadConfig};
use crate::relation::RelationInterface;
use serde::{Deserialize, Serialize};

/// Lifecycle events delivered by the hosting platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OperatorEvent {
    Install,
    ConfigChanged {
        config: WorkloadConfig,
    },
    ResourceAttached {
        resource: String,
        image: String,
    },
    RelationJoined {
        interface: RelationInterface,
        relation_id: u32,
        remote: String,
    },
    RelationChanged {
        interface: RelationInterface,
        relation_id: u32,
        remote: String,
    },
    RelationBroken {
        relation_id: u32,
    },
    Remove,
    ContainerReady {
        container: ContainerName,
    },
    ContainerUnready {
        container: ContainerName,
    },
    /// Re-run a pass after a backoff delay
    Retry,
}

impl OperatorEvent {
    /// Coalescing key: a newer event replaces a pending one with the same key
    pub fn key(&self) -> EventKey {
        match self {
            OperatorEvent::Install => EventKey::Install,
            OperatorEvent::ConfigChanged { .. } => EventKey::ConfigChanged,
            OperatorEvent::ResourceAttached { resource, .. } => {
                EventKey::ResourceAttached(resource.clone())
            }
            OperatorEvent::RelationJoined {
                relation_id, remote, ..
            }
            | OperatorEvent::RelationChanged {
                relation_id, remote, ..
            } => EventKey::RelationMember(*relation_id, remote.clone()),
            OperatorEvent::RelationBroken { relation_id } => EventKey::RelationBroken(*relation_id),
            OperatorEvent::Remove => EventKey::Remove,
            OperatorEvent::ContainerReady { container }
            | OperatorEvent::ContainerUnready { container } => {
                EventKey::ContainerReadiness(*container)
            }
            OperatorEvent::Retry => EventKey::Retry,
        }
    }

    /// Signals only trigger a pass; dropping one loses no state
    pub fn is_signal(&self) -> bool {
        matches!(
            self,
            OperatorEvent::ContainerReady { .. }
                | OperatorEvent::ContainerUnready { .. }
                | OperatorEvent::Retry
        )
    }

    /// Short name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            OperatorEvent::Install => "install",
            OperatorEvent::ConfigChanged { .. } => "config-changed",
            OperatorEvent::ResourceAttached { .. } => "resource-attached",
            OperatorEvent::RelationJoined { .. } => "relation-joined",
            OperatorEvent::RelationChanged { .. } => "relation-changed",
            OperatorEvent::RelationBroken { .. } => "relation-broken",
            OperatorEvent::Remove => "remove",
            OperatorEvent::ContainerReady { .. } => "container-ready",
            OperatorEvent::ContainerUnready { .. } => "container-unready",
            OperatorEvent::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKey {
    Install,
    ConfigChanged,
    ResourceAttached(String),
    RelationMember(u32, String),
    RelationBroken(u32),
    Remove,
    ContainerReadiness(ContainerName),
    Retry,
}

/// What happened to a pushed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Replaced a pending event with the same key
    Coalesced,
    /// Queued after evicting the given pending signal
    Evicted(OperatorEvent),
    /// Queue is full of state-carrying events; the caller must drain first
    Full(OperatorEvent),
}

/// Bounded queue that keeps at most one pending event per key
#[derive(Debug)]
pub struct CoalescingQueue {
    capacity: usize,
    pending: Vec<(EventKey, OperatorEvent)>,
    coalesced: u64,
}

impl CoalescingQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            pending: Vec::with_capacity(capacity),
            coalesced: 0,
        }
    }

    pub fn push(&mut self, event: OperatorEvent) -> PushOutcome {
        let key = event.key();

        if let OperatorEvent::RelationBroken { relation_id } = &event {
            let before = self.pending.len();
            self.pending
                .retain(|(k, _)| !matches!(k, EventKey::RelationMember(id, _) if id == relation_id));
            self.coalesced += (before - self.pending.len()) as u64;
        }

        if let Some(index) = self.pending.iter().position(|(k, _)| *k == key) {
            self.pending.remove(index);
            self.pending.push((key, event));
            self.coalesced += 1;
            return PushOutcome::Coalesced;
        }

        if self.pending.len() < self.capacity {
            self.pending.push((key, event));
            return PushOutcome::Queued;
        }

        match self.pending.iter().position(|(_, e)| e.is_signal()) {
            Some(index) => {
                let (_, evicted) = self.pending.remove(index);
                self.pending.push((key, event));
                PushOutcome::Evicted(evicted)
            }
            None => PushOutcome::Full(event),
        }
    }

    /// Take every pending event, oldest first
    pub fn drain(&mut self) -> Vec<OperatorEvent> {
        self.pending.drain(..).map(|(_, e)| e).collect()
    }

    pub fn contains_remove(&self) -> bool {
        self.pending.iter().any(|(k, _)| *k == EventKey::Remove)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total events folded into an already pending one
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}
