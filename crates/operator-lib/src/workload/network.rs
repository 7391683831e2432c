//! Network plan for the data plane
//!
//! bessd needs two secondary interfaces (access and core) attached through
//! Multus, and the service exposes the PFCP, web and metrics ports.

use crate::models::WorkloadConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const MULTUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
pub const ACCESS_NETWORK_NAME: &str = "access-net";
pub const CORE_NETWORK_NAME: &str = "core-net";

pub const PFCP_PORT: u16 = 8805;
pub const BESS_WEB_PORT: u16 = 8000;
pub const PROMETHEUS_PORT: u16 = 8080;

/// Transport protocol of a service port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A port exposed by the workload service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// A secondary network interface attached to the pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// NetworkAttachmentDefinition name
    pub name: String,
    /// Interface name inside the pod
    pub interface: String,
    /// Address in CIDR notation
    pub ip: String,
}

impl NetworkAttachment {
    /// CNI configuration stored in the definition's `spec.config`
    pub fn cni_config(&self) -> String {
        json!({
            "cniVersion": "0.3.1",
            "type": "macvlan",
            "ipam": { "type": "static" },
            "capabilities": { "mac": true },
        })
        .to_string()
    }
}

/// Everything network-related the platform must provide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPlan {
    pub attachments: Vec<NetworkAttachment>,
    pub service_ports: Vec<ServicePort>,
}

impl NetworkPlan {
    pub fn for_config(config: &WorkloadConfig) -> Self {
        Self {
            attachments: vec![
                NetworkAttachment {
                    name: ACCESS_NETWORK_NAME.to_string(),
                    interface: "access".to_string(),
                    ip: config.access_ip.clone(),
                },
                NetworkAttachment {
                    name: CORE_NETWORK_NAME.to_string(),
                    interface: "core".to_string(),
                    ip: config.core_ip.clone(),
                },
            ],
            service_ports: vec![
                ServicePort {
                    name: "pfcp".to_string(),
                    port: PFCP_PORT,
                    protocol: Protocol::Udp,
                },
                ServicePort {
                    name: "bess-web".to_string(),
                    port: BESS_WEB_PORT,
                    protocol: Protocol::Tcp,
                },
                ServicePort {
                    name: "prometheus-exporter".to_string(),
                    port: PROMETHEUS_PORT,
                    protocol: Protocol::Tcp,
                },
            ],
        }
    }

    /// Value of the Multus networks annotation on the pod template
    pub fn multus_annotation(&self) -> String {
        let networks: Vec<_> = self
            .attachments
            .iter()
            .map(|a| json!({ "name": a.name, "interface": a.interface, "ips": [a.ip] }))
            .collect();
        serde_json::Value::Array(networks).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_uses_configured_addresses() {
        let plan = NetworkPlan::for_config(&WorkloadConfig::default());
        let annotation: serde_json::Value =
            serde_json::from_str(&plan.multus_annotation()).unwrap();

        assert_eq!(annotation[0]["name"], "access-net");
        assert_eq!(annotation[0]["ips"][0], "192.168.252.3/24");
        assert_eq!(annotation[1]["interface"], "core");
        assert_eq!(annotation[1]["ips"][0], "192.168.250.3/24");
    }

    #[test]
    fn test_pfcp_is_udp() {
        let plan = NetworkPlan::for_config(&WorkloadConfig::default());
        let pfcp = plan.service_ports.iter().find(|p| p.name == "pfcp").unwrap();
        assert_eq!(pfcp.port, 8805);
        assert_eq!(pfcp.protocol, Protocol::Udp);
    }

    #[test]
    fn test_cni_config_is_static_macvlan() {
        let plan = NetworkPlan::for_config(&WorkloadConfig::default());
        let config: serde_json::Value =
            serde_json::from_str(&plan.attachments[0].cni_config()).unwrap();
        assert_eq!(config["type"], "macvlan");
        assert_eq!(config["ipam"]["type"], "static");
    }
}
