//! Relation broker for the provided `upf` and `metrics-endpoint` relations
//!
//! The broker keeps the data published on each relation current. Consumers
//! poll it (or react to the platform's relation-changed event); the broker
//! never pushes.

mod data;

pub use data::{
    MetricsRelationData, UpfCapabilities, UpfRelationData, METRICS_PATH,
    METRICS_RELATION_VERSION, UPF_RELATION_VERSION,
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Provided relation endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationInterface {
    Upf,
    MetricsEndpoint,
}

impl RelationInterface {
    /// Relation endpoint name
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationInterface::Upf => "upf",
            RelationInterface::MetricsEndpoint => "metrics-endpoint",
        }
    }

    /// Interface name consumers match on
    pub fn interface_name(&self) -> &'static str {
        match self {
            RelationInterface::Upf => "upf",
            RelationInterface::MetricsEndpoint => "prometheus_scrape",
        }
    }
}

impl fmt::Display for RelationInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation role; the operator only provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationRole {
    Provides,
}

/// Data currently published on a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PublishedData {
    Upf(UpfRelationData),
    Metrics(MetricsRelationData),
}

/// State of one established relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub relation_id: u32,
    pub interface: RelationInterface,
    pub role: RelationRole,
    pub subscribers: BTreeSet<String>,
    pub published: Option<PublishedData>,
    pub updated_at: i64,
}

/// Keeps relation records and their published data current
#[derive(Debug, Default)]
pub struct RelationBroker {
    records: DashMap<u32, RelationRecord>,
    current: DashMap<RelationInterface, PublishedData>,
}

impl RelationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a remote unit joining a relation; returns true for a new relation
    pub fn relation_joined(&self, interface: RelationInterface, relation_id: u32, remote: &str) -> bool {
        let published = self.current.get(&interface).map(|d| d.clone());
        let mut created = false;

        let mut record = self.records.entry(relation_id).or_insert_with(|| {
            created = true;
            RelationRecord {
                relation_id,
                interface,
                role: RelationRole::Provides,
                subscribers: BTreeSet::new(),
                published: published.clone(),
                updated_at: chrono::Utc::now().timestamp(),
            }
        });

        if record.interface != interface {
            warn!(
                relation_id,
                recorded = %record.interface,
                reported = %interface,
                "Relation interface changed, resetting record"
            );
            record.interface = interface;
            record.subscribers.clear();
            record.published = published;
            record.updated_at = chrono::Utc::now().timestamp();
        }

        if record.subscribers.insert(remote.to_string()) {
            debug!(relation_id, interface = %interface, remote, "Subscriber joined");
        }
        created
    }

    /// A subscriber changed its side of the relation
    pub fn relation_changed(&self, interface: RelationInterface, relation_id: u32, remote: &str) {
        // Providers do not consume remote data; only membership matters
        self.relation_joined(interface, relation_id, remote);
    }

    /// Drop a relation entirely
    pub fn relation_broken(&self, relation_id: u32) -> Option<RelationRecord> {
        let removed = self.records.remove(&relation_id).map(|(_, r)| r);
        if let Some(record) = &removed {
            info!(relation_id, interface = %record.interface, "Relation removed");
        }
        removed
    }

    /// Publish `upf` connection data; returns true if anything changed
    pub fn publish_upf(&self, data: UpfRelationData) -> bool {
        self.publish(RelationInterface::Upf, PublishedData::Upf(data))
    }

    /// Publish the metrics scrape endpoint; returns true if anything changed
    pub fn publish_metrics(&self, endpoint: MetricsRelationData) -> bool {
        self.publish(RelationInterface::MetricsEndpoint, PublishedData::Metrics(endpoint))
    }

    /// Stop advertising `upf` data; returns true if anything was published
    pub fn withdraw_upf(&self) -> bool {
        self.withdraw(RelationInterface::Upf)
    }

    /// Stop advertising everything
    pub fn withdraw_all(&self) {
        self.withdraw(RelationInterface::Upf);
        self.withdraw(RelationInterface::MetricsEndpoint);
    }

    fn publish(&self, interface: RelationInterface, data: PublishedData) -> bool {
        let unchanged = self
            .current
            .get(&interface)
            .map(|existing| *existing == data)
            .unwrap_or(false);
        if unchanged {
            return false;
        }

        self.current.insert(interface, data.clone());
        let updated = self.fan_out(interface, Some(data));
        info!(interface = %interface, relations = updated, "Published relation data");
        true
    }

    fn withdraw(&self, interface: RelationInterface) -> bool {
        if self.current.remove(&interface).is_none() {
            return false;
        }
        let updated = self.fan_out(interface, None);
        info!(interface = %interface, relations = updated, "Withdrew relation data");
        true
    }

    fn fan_out(&self, interface: RelationInterface, data: Option<PublishedData>) -> usize {
        let now = chrono::Utc::now().timestamp();
        let mut updated = 0;
        for mut record in self.records.iter_mut() {
            if record.interface == interface {
                record.published = data.clone();
                record.updated_at = now;
                updated += 1;
            }
        }
        updated
    }

    /// Currently published `upf` data
    pub fn published_upf(&self) -> Option<UpfRelationData> {
        match self.current.get(&RelationInterface::Upf).map(|d| d.clone()) {
            Some(PublishedData::Upf(data)) => Some(data),
            _ => None,
        }
    }

    /// Currently published metrics endpoint
    pub fn published_metrics(&self) -> Option<MetricsRelationData> {
        match self
            .current
            .get(&RelationInterface::MetricsEndpoint)
            .map(|d| d.clone())
        {
            Some(PublishedData::Metrics(data)) => Some(data),
            _ => None,
        }
    }

    /// All relation records ordered by relation id
    pub fn snapshot(&self) -> Vec<RelationRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.relation_id);
        records
    }

    /// Total remote subscribers across all relations
    pub fn subscriber_count(&self) -> usize {
        self.records.iter().map(|r| r.subscribers.len()).sum()
    }
}
