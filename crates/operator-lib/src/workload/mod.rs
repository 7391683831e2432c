//! Workload description: container specs, rendered files and networking

mod builder;
mod files;
mod network;

pub use builder::{
    mount_table, mount_topology, ContainerSpecBuilder, BESSD_CONFIG_PATH, BESSD_GRPC_PORT,
    PFCP_AGENT_CONFIG_PATH, SHARED_APP_PATH,
};
pub use files::{render_config_file, POSTSTART_COMMAND};
pub use network::{
    NetworkAttachment, NetworkPlan, Protocol, ServicePort, ACCESS_NETWORK_NAME, BESS_WEB_PORT,
    CORE_NETWORK_NAME, MULTUS_ANNOTATION, PFCP_PORT, PROMETHEUS_PORT,
};
