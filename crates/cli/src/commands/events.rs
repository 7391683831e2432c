//! Lifecycle event commands

use anyhow::{Context, Result};
use std::path::Path;

use crate::client::{ApiClient, EventRequest};
use crate::output::{print_json, print_success, OutputFormat};

/// Deliver an event to the operator
pub async fn send_event(client: &ApiClient, event: EventRequest, format: OutputFormat) -> Result<()> {
    client.send_event(&event).await?;

    match format {
        OutputFormat::Json => print_json(&event)?,
        OutputFormat::Table => print_success(&format!("{} event queued", event_kind(&event))),
    }

    Ok(())
}

/// Read a workload configuration from a JSON file
pub fn load_config(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: serde_json::Value =
        serde_json::from_str(&content).context("Failed to parse workload configuration")?;
    anyhow::ensure!(
        config.is_object(),
        "workload configuration must be a JSON object"
    );
    Ok(config)
}

fn event_kind(event: &EventRequest) -> &'static str {
    match event {
        EventRequest::Install => "install",
        EventRequest::Remove => "remove",
        EventRequest::ConfigChanged { .. } => "config-changed",
        EventRequest::ResourceAttached { .. } => "resource-attached",
        EventRequest::RelationJoined { .. } => "relation-joined",
        EventRequest::RelationChanged { .. } => "relation-changed",
        EventRequest::RelationBroken { .. } => "relation-broken",
        EventRequest::ContainerReady { .. } => "container-ready",
        EventRequest::ContainerUnready { .. } => "container-unready",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_matches_wire_tag() {
        let event = EventRequest::RelationBroken { relation_id: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], event_kind(&event));
    }

    #[test]
    fn test_load_config_rejects_non_object() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[1, 2]").unwrap();
        assert!(load_config(file.path()).is_err());

        std::fs::write(file.path(), r#"{"enable_hugepages": true}"#).unwrap();
        assert_eq!(load_config(file.path()).unwrap()["enable_hugepages"], true);
    }
}
