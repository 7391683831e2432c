//! Core data models for the UPF operator

use crate::error::{OperatorError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// One mebibyte, the floor for every volume size
pub const MIB: u64 = 1024 * 1024;

/// Name of the file rendered into the config volume
pub const CONFIG_FILE_NAME: &str = "upf.json";

/// The five workload containers, in reconciliation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerName {
    Bessd,
    Routectl,
    Web,
    PfcpAgent,
    Arping,
}

impl ContainerName {
    pub const ALL: [ContainerName; 5] = [
        ContainerName::Bessd,
        ContainerName::Routectl,
        ContainerName::Web,
        ContainerName::PfcpAgent,
        ContainerName::Arping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerName::Bessd => "bessd",
            ContainerName::Routectl => "routectl",
            ContainerName::Web => "web",
            ContainerName::PfcpAgent => "pfcp-agent",
            ContainerName::Arping => "arping",
        }
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerName {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        ContainerName::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| OperatorError::Configuration(format!("unknown container: {}", s)))
    }
}

/// The two persistent volumes shared by bessd and pfcp-agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeName {
    Config,
    SharedApp,
}

impl VolumeName {
    pub const ALL: [VolumeName; 2] = [VolumeName::Config, VolumeName::SharedApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeName::Config => "config",
            VolumeName::SharedApp => "shared-app",
        }
    }

    /// Parse a volume name, returning `None` for volumes the workload does not declare
    pub fn parse(name: &str) -> Option<Self> {
        VolumeName::ALL.into_iter().find(|v| v.as_str() == name)
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OCI image reference in `repository:tag` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl FromStr for ImageReference {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return Err(OperatorError::Configuration(format!(
                "invalid image reference: {:?}",
                s
            )));
        }

        // A colon inside the registry host (e.g. "registry:5000/bess") is not a tag separator
        let (repository, tag) = match s.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') && !repo.is_empty() && !tag.is_empty() => {
                (repo, tag)
            }
            Some((_, tag)) if tag.is_empty() => {
                return Err(OperatorError::Configuration(format!(
                    "image reference has an empty tag: {}",
                    s
                )))
            }
            _ => (s, "latest"),
        };

        Ok(Self::new(repository, tag))
    }
}

/// A volume mounted into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub volume: VolumeName,
    pub path: String,
    /// Backing storage identity from the Storage Manager
    pub backing_id: String,
}

/// A mount as declared by the mount table or user configuration, not yet validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountDeclaration {
    pub container: ContainerName,
    pub volume: String,
    pub path: String,
}

impl MountDeclaration {
    pub fn new(container: ContainerName, volume: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            container,
            volume: volume.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for MountDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} on {}", self.volume, self.path, self.container)
    }
}

/// Security settings applied to a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_capabilities: Vec<String>,
}

/// Condition a container must meet before it counts as ready
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPredicate {
    /// Mount path that must be reported writable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writable_mount: Option<String>,
    /// Container that must be observed ready before this one is evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<ContainerName>,
}

impl ReadinessPredicate {
    pub fn is_satisfied_by(&self, probe: &ContainerProbe) -> bool {
        if !probe.running {
            return false;
        }
        match &self.writable_mount {
            Some(path) => probe.writable_mounts.iter().any(|p| p == path),
            None => true,
        }
    }
}

/// What the platform reports about a running container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerProbe {
    pub running: bool,
    #[serde(default)]
    pub writable_mounts: Vec<String>,
}

/// Declarative specification for one workload container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: ContainerName,
    pub image: ImageReference,
    pub mounts: Vec<Mount>,
    pub command: String,
    pub environment: BTreeMap<String, String>,
    pub security: SecuritySettings,
    pub readiness: ReadinessPredicate,
}

impl ContainerSpec {
    /// Stable content hash used to detect spec changes between passes
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}

/// Hex-encoded SHA-256 over the canonical JSON form
pub fn fingerprint_of<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

/// Filesystem type requested for a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filesystem {
    Filesystem,
}

/// Persistent volume requirements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: VolumeName,
    pub minimum_size_bytes: u64,
    pub filesystem: Filesystem,
}

impl VolumeSpec {
    pub fn new(name: VolumeName, minimum_size_bytes: u64) -> Self {
        Self {
            name,
            minimum_size_bytes,
            filesystem: Filesystem::Filesystem,
        }
    }
}

/// Handle to provisioned storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountHandle {
    pub volume: VolumeName,
    pub backing_id: String,
    pub capacity_bytes: u64,
}

/// A file the operator renders and pushes into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadFile {
    pub path: String,
    pub contents: String,
    pub permissions: u32,
}

/// Lifecycle phase of the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Waiting,
    Installing,
    Active,
    Blocked,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Installing => "installing",
            Phase::Active => "active",
            Phase::Blocked => "blocked",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status derived by each reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationStatus {
    pub phase: Phase,
    pub message: String,
}

impl ReconciliationStatus {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }

    pub fn active() -> Self {
        Self::new(Phase::Active, "")
    }
}

impl Default for ReconciliationStatus {
    fn default() -> Self {
        Self::new(Phase::Waiting, "waiting for install event")
    }
}

/// User-facing workload configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Overrides the default `<app>.<namespace>.svc.cluster.local` hostname
    pub upf_hostname: Option<String>,
    pub access_ip: String,
    pub core_ip: String,
    pub access_gateway_ip: String,
    pub core_gateway_ip: String,
    pub enable_hugepages: bool,
    pub config_storage_bytes: u64,
    pub shared_app_storage_bytes: u64,
    pub additional_mounts: Vec<MountDeclaration>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            upf_hostname: None,
            access_ip: "192.168.252.3/24".to_string(),
            core_ip: "192.168.250.3/24".to_string(),
            access_gateway_ip: "192.168.252.1".to_string(),
            core_gateway_ip: "192.168.250.1".to_string(),
            enable_hugepages: false,
            config_storage_bytes: MIB,
            shared_app_storage_bytes: MIB,
            additional_mounts: Vec::new(),
        }
    }
}

impl WorkloadConfig {
    /// Check user-supplied values; errors here are never retried automatically
    pub fn validate(&self) -> Result<()> {
        for (key, size) in [
            ("config-storage-size", self.config_storage_bytes),
            ("shared-app-storage-size", self.shared_app_storage_bytes),
        ] {
            if size < MIB {
                return Err(OperatorError::Configuration(format!(
                    "{} of {} bytes is below the 1 MiB floor",
                    key, size
                )));
            }
        }

        parse_cidr("access-ip", &self.access_ip)?;
        parse_cidr("core-ip", &self.core_ip)?;
        parse_ipv4("access-gateway-ip", &self.access_gateway_ip)?;
        parse_ipv4("core-gateway-ip", &self.core_gateway_ip)?;

        if let Some(hostname) = &self.upf_hostname {
            url::Host::parse(hostname).map_err(|e| {
                OperatorError::Configuration(format!("invalid upf-hostname {:?}: {}", hostname, e))
            })?;
        }

        Ok(())
    }

    /// Volume requirements derived from configured sizes
    pub fn volume_specs(&self) -> [VolumeSpec; 2] {
        [
            VolumeSpec::new(VolumeName::Config, self.config_storage_bytes),
            VolumeSpec::new(VolumeName::SharedApp, self.shared_app_storage_bytes),
        ]
    }
}

fn parse_ipv4(key: &str, value: &str) -> Result<Ipv4Addr> {
    value.parse::<Ipv4Addr>().map_err(|_| {
        OperatorError::Configuration(format!("{} must be an IPv4 address, got {:?}", key, value))
    })
}

fn parse_cidr(key: &str, value: &str) -> Result<(Ipv4Addr, u8)> {
    let invalid = || {
        OperatorError::Configuration(format!(
            "{} must be an IPv4 address with prefix length, got {:?}",
            key, value
        ))
    };
    let (addr, prefix) = value.split_once('/').ok_or_else(invalid)?;
    let addr = addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok((addr, prefix))
}
