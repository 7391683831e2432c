//! Operator configuration

use anyhow::{Context, Result};
use operator_lib::reconciler::{BackoffPolicy, ReconcilerConfig};
use operator_lib::WorkloadConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "UPF_OPERATOR_CONFIG";

/// Where the workload runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Kubernetes,
    /// In-process platform with directory-backed volumes
    Local,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Kubernetes => "kubernetes",
            PlatformKind::Local => "local",
        }
    }
}

/// Operator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Application name; also the StatefulSet and Service name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Namespace from the Kubernetes downward API
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_platform")]
    pub platform: PlatformKind,

    /// Root directory for local volumes
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Capacity of the local storage backend in bytes
    #[serde(default = "default_storage_capacity")]
    pub storage_capacity_bytes: u64,

    /// Storage class for persistent volume claims
    #[serde(default)]
    pub storage_class: Option<String>,

    /// Image attachments by resource name
    #[serde(default)]
    pub images: BTreeMap<String, String>,

    /// Attach every resource to its upstream image at startup
    #[serde(default = "default_true")]
    pub attach_upstream_images: bool,

    /// Deliver an install event as soon as the loop starts
    #[serde(default = "default_true")]
    pub install_on_start: bool,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,

    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_max_storage_attempts")]
    pub max_storage_attempts: u32,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Workload configuration in effect until a config-changed event arrives
    #[serde(default)]
    pub workload: WorkloadConfig,
}

fn default_app_name() -> String {
    "upf".to_string()
}

fn default_namespace() -> String {
    std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

/// Clear of every port the workload itself listens on
fn default_api_port() -> u16 {
    8090
}

fn default_platform() -> PlatformKind {
    PlatformKind::Kubernetes
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/var/lib/upf-operator/volumes")
}

fn default_storage_capacity() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_call_timeout() -> u64 {
    10
}

fn default_readiness_timeout() -> u64 {
    60
}

fn default_backoff_initial() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_max_storage_attempts() -> u32 {
    5
}

fn default_queue_capacity() -> usize {
    32
}

impl OperatorConfig {
    /// Load configuration from environment and config file
    ///
    /// Environment variables use the `UPF_OPERATOR_` prefix with `__` between
    /// nested keys, e.g. `UPF_OPERATOR_WORKLOAD__CORE_GATEWAY_IP`.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("UPF_OPERATOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read operator configuration")?;

        config
            .try_deserialize()
            .context("invalid operator configuration")
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            app_name: self.app_name.clone(),
            namespace: self.namespace.clone(),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            readiness_timeout: Duration::from_secs(self.readiness_timeout_secs),
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.backoff_initial_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
            max_storage_attempts: self.max_storage_attempts,
            ..Default::default()
        }
    }
}
