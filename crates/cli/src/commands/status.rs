//! Workload status and relation commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, RelationRecord};
use crate::output::{
    color_phase, format_bytes, format_timestamp, print_json, print_warning, OutputFormat,
};

/// Row for the volumes table
#[derive(Tabled)]
struct MountRow {
    #[tabled(rename = "Volume")]
    volume: String,
    #[tabled(rename = "Backing")]
    backing_id: String,
    #[tabled(rename = "Capacity")]
    capacity: String,
}

/// Row for the relations table
#[derive(Tabled)]
struct RelationRow {
    #[tabled(rename = "ID")]
    relation_id: u32,
    #[tabled(rename = "Interface")]
    interface: String,
    #[tabled(rename = "Subscribers")]
    subscribers: String,
    #[tabled(rename = "Published")]
    published: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Show workload phase, ready containers and volumes
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result = client.status().await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            println!("{}", "UPF Workload".bold());
            println!("{}", "=".repeat(60));
            println!("Phase:      {}", color_phase(&result.status.phase));
            if !result.status.message.is_empty() {
                println!("Message:    {}", result.status.message);
            }
            println!("Installed:  {}", result.installed);
            println!("Passes:     {}", result.passes);
            println!("Observed:   {}", format_timestamp(result.observed_at));

            let ready = if result.ready.is_empty() {
                "none".dimmed().to_string()
            } else {
                result.ready.join(", ").cyan().to_string()
            };
            println!("Ready:      {}", ready);
            println!();

            if result.mounts.is_empty() {
                print_warning("No volumes provisioned");
                return Ok(());
            }

            let rows: Vec<MountRow> = result
                .mounts
                .values()
                .map(|m| MountRow {
                    volume: m.volume.clone(),
                    backing_id: m.backing_id.clone(),
                    capacity: format_bytes(m.capacity_bytes),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}

/// List relations and what is published on each
pub async fn show_relations(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result = client.relations().await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            if result.is_empty() {
                print_warning("No relations established");
                return Ok(());
            }

            let rows: Vec<RelationRow> = result.iter().map(relation_row).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} relations", result.len());
        }
    }

    Ok(())
}

fn relation_row(record: &RelationRecord) -> RelationRow {
    let published = match &record.published {
        Some(data) => summarize_published(data).green().to_string(),
        None => "withdrawn".yellow().to_string(),
    };

    RelationRow {
        relation_id: record.relation_id,
        interface: record.interface.clone(),
        subscribers: record.subscribers.join(", "),
        published,
        updated: format_timestamp(record.updated_at),
    }
}

/// One-line summary of published relation data
fn summarize_published(data: &serde_json::Value) -> String {
    if let Some(url) = data.get("url").and_then(|v| v.as_str()) {
        return url.to_string();
    }
    match data.get("targets").and_then(|v| v.as_array()) {
        Some(targets) => targets
            .iter()
            .filter_map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        None => "published".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summarize_upf_data_shows_url() {
        let data = json!({"type": "upf", "version": 1, "url": "upf.core.svc.cluster.local"});
        assert_eq!(summarize_published(&data), "upf.core.svc.cluster.local");
    }

    #[test]
    fn test_summarize_metrics_data_shows_targets() {
        let data = json!({"type": "metrics", "version": 1, "targets": ["upf.core:8080"]});
        assert_eq!(summarize_published(&data), "upf.core:8080");
    }
}
