//! Resource catalog for workload container images
//!
//! Describes the five image resources the workload needs and where they come
//! from upstream. Attachments are resolved once at startup and can be replaced
//! when the platform reports a newly attached resource.

use crate::error::{OperatorError, Result};
use crate::models::{ContainerName, ImageReference};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Static description of one image resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub name: &'static str,
    pub container: ContainerName,
    pub upstream_source: &'static str,
}

/// The image resources declared by the workload
pub const RESOURCES: [ResourceDescriptor; 5] = [
    ResourceDescriptor {
        name: "bessd-image",
        container: ContainerName::Bessd,
        upstream_source: "omecproject/upf-epc-bess:master-5786085",
    },
    ResourceDescriptor {
        name: "routectl-image",
        container: ContainerName::Routectl,
        upstream_source: "omecproject/upf-epc-bess:master-5786085",
    },
    ResourceDescriptor {
        name: "web-image",
        container: ContainerName::Web,
        upstream_source: "omecproject/upf-epc-bess:master-5786085",
    },
    ResourceDescriptor {
        name: "pfcp-agent-image",
        container: ContainerName::PfcpAgent,
        upstream_source: "omecproject/upf-epc-pfcpiface:master-5786085",
    },
    ResourceDescriptor {
        name: "arping-image",
        container: ContainerName::Arping,
        upstream_source: "registry.hub.docker.com/library/busybox:1.36",
    },
];

/// Look up the descriptor for a resource name
pub fn descriptor(name: &str) -> Option<&'static ResourceDescriptor> {
    RESOURCES.iter().find(|r| r.name == name)
}

/// Look up the descriptor backing a container
pub fn descriptor_for(container: ContainerName) -> &'static ResourceDescriptor {
    // RESOURCES lists every container exactly once, in ContainerName::ALL order
    &RESOURCES[ContainerName::ALL
        .iter()
        .position(|c| *c == container)
        .unwrap_or_default()]
}

/// Resolves resource names to attached image references
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    attached: BTreeMap<&'static str, ImageReference>,
}

impl ResourceCatalog {
    /// Create a catalog with nothing attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with every resource attached to its upstream source
    pub fn with_upstream_sources() -> Result<Self> {
        let mut catalog = Self::new();
        for resource in RESOURCES.iter() {
            catalog.attach(resource.name, resource.upstream_source.parse()?)?;
        }
        Ok(catalog)
    }

    /// Build the startup catalog from configured attachments
    pub fn from_attachments(
        attachments: &BTreeMap<String, String>,
        attach_upstream: bool,
    ) -> Result<Self> {
        let mut catalog = if attach_upstream {
            Self::with_upstream_sources()?
        } else {
            Self::new()
        };

        for (name, image) in attachments {
            catalog.attach(name, image.parse()?)?;
        }

        info!(
            attached = catalog.attached.len(),
            total = RESOURCES.len(),
            "Resource catalog initialized"
        );
        Ok(catalog)
    }

    /// Attach (or replace) the image for a resource
    pub fn attach(&mut self, name: &str, image: ImageReference) -> Result<()> {
        let descriptor = descriptor(name).ok_or_else(|| {
            OperatorError::Configuration(format!("unknown image resource: {}", name))
        })?;
        debug!(resource = descriptor.name, image = %image, "Attaching resource");
        self.attached.insert(descriptor.name, image);
        Ok(())
    }

    /// Resolve a resource name to its attached image
    pub fn resolve(&self, name: &str) -> Result<ImageReference> {
        self.attached
            .get(name)
            .cloned()
            .ok_or_else(|| OperatorError::ResourceUnavailable {
                resource: name.to_string(),
            })
    }

    /// Resolve every resource, failing on the first one missing in container order
    pub fn resolve_all(&self) -> Result<BTreeMap<ContainerName, ImageReference>> {
        RESOURCES
            .iter()
            .map(|r| Ok((r.container, self.resolve(r.name)?)))
            .collect()
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }
}
