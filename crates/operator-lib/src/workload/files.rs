//! Files rendered into the workload's config volume

use super::builder::{BESSD_CONFIG_PATH, SHARED_APP_PATH};
use super::network::PROMETHEUS_PORT;
use crate::models::{WorkloadConfig, WorkloadFile, CONFIG_FILE_NAME};
use serde_json::json;

/// Command run in bessd once it is ready, loading the UP4 pipeline
pub const POSTSTART_COMMAND: [&str; 3] = ["bessctl", "run", "/opt/bess/bessctl/conf/up4"];

/// Render `upf.json`, shared by bessd and pfcp-agent through the config volume
pub fn render_config_file(config: &WorkloadConfig, upf_hostname: &str) -> WorkloadFile {
    let document = json!({
        "mode": "af_packet",
        "hwcksum": false,
        "gtppsc": false,
        "measure_upf": true,
        "measure_flow": false,
        "workers": 1,
        "max_sessions": 50000,
        "access": { "ifname": "access" },
        "core": { "ifname": "core" },
        "enable_notify_bess": true,
        "notify_sockaddr": format!("{}notifycp", SHARED_APP_PATH),
        "cpiface": {
            "dnn": "internet",
            "hostname": upf_hostname,
            "http_port": PROMETHEUS_PORT.to_string(),
            "enable_ue_ip_alloc": false,
        },
        "hugepages": config.enable_hugepages,
    });

    WorkloadFile {
        path: format!("{}{}", BESSD_CONFIG_PATH, CONFIG_FILE_NAME),
        // Serializing a json! literal cannot fail
        contents: serde_json::to_string_pretty(&document).unwrap_or_default(),
        permissions: 0o644,
    }
}
