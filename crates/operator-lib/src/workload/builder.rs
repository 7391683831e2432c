//! Container spec builder
//!
//! Turns resolved images, provisioned volume handles and the workload
//! configuration into the five container specs. The output depends only on
//! its inputs so that repeated passes over the same state are no-ops.

use crate::error::{OperatorError, Result};
use crate::models::{
    fingerprint_of, ContainerName, ContainerSpec, ImageReference, Mount, MountDeclaration,
    MountHandle, ReadinessPredicate, SecuritySettings, VolumeName, WorkloadConfig,
    CONFIG_FILE_NAME,
};
use std::collections::{BTreeMap, BTreeSet};

pub const BESSD_CONFIG_PATH: &str = "/etc/bess/conf/";
pub const PFCP_AGENT_CONFIG_PATH: &str = "/tmp/conf/";
pub const SHARED_APP_PATH: &str = "/pod-share/";

/// gRPC port bessd listens on for control
pub const BESSD_GRPC_PORT: u16 = 10514;

/// The fixed mount table of the workload
pub fn mount_table() -> Vec<MountDeclaration> {
    vec![
        MountDeclaration::new(ContainerName::Bessd, VolumeName::Config.as_str(), BESSD_CONFIG_PATH),
        MountDeclaration::new(ContainerName::Bessd, VolumeName::SharedApp.as_str(), SHARED_APP_PATH),
        MountDeclaration::new(
            ContainerName::PfcpAgent,
            VolumeName::Config.as_str(),
            PFCP_AGENT_CONFIG_PATH,
        ),
        MountDeclaration::new(
            ContainerName::PfcpAgent,
            VolumeName::SharedApp.as_str(),
            SHARED_APP_PATH,
        ),
    ]
}

/// Builds container specs from catalog, storage and configuration inputs
#[derive(Debug, Clone)]
pub struct ContainerSpecBuilder {
    table: Vec<MountDeclaration>,
}

impl Default for ContainerSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerSpecBuilder {
    pub fn new() -> Self {
        Self {
            table: mount_table(),
        }
    }

    /// Use a custom mount table instead of the fixed one
    pub fn with_mount_table(table: Vec<MountDeclaration>) -> Self {
        Self { table }
    }

    /// Produce the five container specs in reconciliation order
    pub fn build(
        &self,
        images: &BTreeMap<ContainerName, ImageReference>,
        volumes: &BTreeMap<VolumeName, MountHandle>,
        config: &WorkloadConfig,
    ) -> Result<[ContainerSpec; 5]> {
        config.validate()?;
        let mounts = self.resolve_mounts(volumes, config)?;

        let mut specs = Vec::with_capacity(ContainerName::ALL.len());
        for name in ContainerName::ALL {
            let image = images
                .get(&name)
                .cloned()
                .ok_or_else(|| OperatorError::ResourceUnavailable {
                    resource: crate::catalog::descriptor_for(name).name.to_string(),
                })?;

            specs.push(ContainerSpec {
                name,
                image,
                mounts: mounts.get(&name).cloned().unwrap_or_default(),
                command: command_for(name, config),
                environment: environment_for(name),
                security: security_for(name),
                readiness: readiness_for(name),
            });
        }

        specs
            .try_into()
            .map_err(|_| OperatorError::Configuration("workload must have five containers".into()))
    }

    /// Validate every declared mount and group them per container
    fn resolve_mounts(
        &self,
        volumes: &BTreeMap<VolumeName, MountHandle>,
        config: &WorkloadConfig,
    ) -> Result<BTreeMap<ContainerName, Vec<Mount>>> {
        let mut resolved: BTreeMap<ContainerName, Vec<Mount>> = BTreeMap::new();
        let mut seen = BTreeSet::new();

        for declaration in self.table.iter().chain(config.additional_mounts.iter()) {
            let volume = VolumeName::parse(&declaration.volume).ok_or_else(|| {
                OperatorError::Configuration(format!(
                    "mount {} references unknown volume {}",
                    declaration, declaration.volume
                ))
            })?;
            let handle = volumes.get(&volume).ok_or_else(|| {
                OperatorError::Configuration(format!(
                    "mount {} references volume {} which is not provisioned",
                    declaration, volume
                ))
            })?;
            if !declaration.path.starts_with('/') {
                return Err(OperatorError::Configuration(format!(
                    "mount {} must use an absolute path",
                    declaration
                )));
            }
            if !seen.insert((declaration.container, declaration.path.clone())) {
                return Err(OperatorError::Configuration(format!(
                    "mount {} conflicts with another mount at the same path",
                    declaration
                )));
            }

            resolved.entry(declaration.container).or_default().push(Mount {
                volume,
                path: declaration.path.clone(),
                backing_id: handle.backing_id.clone(),
            });
        }

        Ok(resolved)
    }
}

/// Fingerprint of every container's mounts; a change requires a full pod restart
pub fn mount_topology(specs: &[ContainerSpec]) -> String {
    let topology: Vec<(ContainerName, &[Mount])> =
        specs.iter().map(|s| (s.name, s.mounts.as_slice())).collect();
    fingerprint_of(&topology)
}

fn command_for(name: ContainerName, config: &WorkloadConfig) -> String {
    match name {
        ContainerName::Bessd => {
            let mut command = format!("bessd -f -grpc-url=0.0.0.0:{}", BESSD_GRPC_PORT);
            if !config.enable_hugepages {
                // "-m 0" runs bessd without hugepages
                command.push_str(" -m 0");
            }
            command
        }
        ContainerName::Routectl => "/opt/bess/bessctl/conf/route_control.py -i access core".into(),
        ContainerName::Web => "bessctl http 0.0.0.0 8000".into(),
        ContainerName::PfcpAgent => {
            format!("pfcpiface -config {}{}", PFCP_AGENT_CONFIG_PATH, CONFIG_FILE_NAME)
        }
        ContainerName::Arping => format!(
            "/bin/sh -c 'while true; do arping -c 3 -I core {}; sleep 10; done'",
            config.core_gateway_ip
        ),
    }
}

fn environment_for(name: ContainerName) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    match name {
        ContainerName::Bessd => {
            env.insert(
                "CONF_FILE".to_string(),
                format!("{}{}", BESSD_CONFIG_PATH, CONFIG_FILE_NAME),
            );
        }
        ContainerName::Routectl => {
            env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        }
        _ => {}
    }
    env
}

fn security_for(name: ContainerName) -> SecuritySettings {
    match name {
        ContainerName::Bessd => SecuritySettings {
            privileged: true,
            add_capabilities: vec!["NET_ADMIN".to_string()],
        },
        _ => SecuritySettings::default(),
    }
}

fn readiness_for(name: ContainerName) -> ReadinessPredicate {
    match name {
        ContainerName::Bessd => ReadinessPredicate {
            writable_mount: Some(SHARED_APP_PATH.to_string()),
            after: None,
        },
        // pfcp-agent reads the layout bessd creates on the shared volume
        ContainerName::PfcpAgent => ReadinessPredicate {
            writable_mount: Some(SHARED_APP_PATH.to_string()),
            after: Some(ContainerName::Bessd),
        },
        _ => ReadinessPredicate::default(),
    }
}
