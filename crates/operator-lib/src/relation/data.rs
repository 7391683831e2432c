//! Versioned relation data published to consumers

use crate::models::WorkloadConfig;
use crate::workload::{PFCP_PORT, PROMETHEUS_PORT};
use serde::{Deserialize, Serialize};

pub const UPF_RELATION_VERSION: u32 = 0;
pub const METRICS_RELATION_VERSION: u32 = 0;
pub const METRICS_PATH: &str = "/metrics";

/// Data-plane capabilities advertised on the `upf` relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpfCapabilities {
    pub pfcp: bool,
    pub gtpu: bool,
    pub hugepages: bool,
}

/// Connection data for 5G core control-plane consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpfRelationData {
    pub version: u32,
    /// Service hostname of the UPF
    pub url: String,
    /// Data-plane access address (without prefix length)
    pub address: String,
    pub port: u16,
    pub capabilities: UpfCapabilities,
}

impl UpfRelationData {
    pub fn new(hostname: &str, config: &WorkloadConfig) -> Self {
        let address = config
            .access_ip
            .split_once('/')
            .map(|(addr, _)| addr)
            .unwrap_or(&config.access_ip)
            .to_string();

        Self {
            version: UPF_RELATION_VERSION,
            url: hostname.to_string(),
            address,
            port: PFCP_PORT,
            capabilities: UpfCapabilities {
                pfcp: true,
                gtpu: true,
                hugepages: config.enable_hugepages,
            },
        }
    }
}

/// Scrape target published on the `metrics-endpoint` relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRelationData {
    pub version: u32,
    pub targets: Vec<String>,
    pub metrics_path: String,
}

impl MetricsRelationData {
    pub fn new(hostname: &str) -> Self {
        Self {
            version: METRICS_RELATION_VERSION,
            targets: vec![format!("{}:{}", hostname, PROMETHEUS_PORT)],
            metrics_path: METRICS_PATH.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upf_data_strips_prefix_length() {
        let data = UpfRelationData::new("upf.core.svc.cluster.local", &WorkloadConfig::default());
        assert_eq!(data.address, "192.168.252.3");
        assert_eq!(data.port, 8805);
        assert_eq!(data.url, "upf.core.svc.cluster.local");
    }

    #[test]
    fn test_metrics_target_uses_exporter_port() {
        let data = MetricsRelationData::new("upf.core.svc.cluster.local");
        assert_eq!(data.targets, vec!["upf.core.svc.cluster.local:8080".to_string()]);
        assert_eq!(data.metrics_path, "/metrics");
    }
}
