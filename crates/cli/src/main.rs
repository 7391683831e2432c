//! UPF operator CLI
//!
//! A command-line tool for inspecting the UPF workload and delivering
//! lifecycle events to the operator.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::EventRequest;
use commands::{events, status};
use std::path::PathBuf;

/// UPF operator CLI
#[derive(Parser)]
#[command(name = "upfctl")]
#[command(author, version, about = "CLI for the UPF workload operator", long_about = None)]
pub struct Cli {
    /// Operator API URL (can also be set via UPF_OPERATOR_URL env var)
    #[arg(long, env = "UPF_OPERATOR_URL", default_value = "http://localhost:8090")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show workload phase, ready containers and volumes
    Status,

    /// List relations and published data
    Relations,

    /// Deliver a lifecycle event to the operator
    #[command(subcommand)]
    Event(EventCommands),
}

#[derive(Subcommand)]
pub enum EventCommands {
    /// Start managing the workload
    Install,

    /// Tear the workload down and stop the operator loop
    Remove,

    /// Replace the workload configuration
    Config {
        /// JSON file with the workload configuration
        file: PathBuf,
    },

    /// Attach an image to a resource
    Attach {
        /// Resource name (e.g. bessd-image)
        resource: String,

        /// Image reference
        image: String,
    },

    /// A remote unit joined a relation
    RelationJoined {
        /// Relation interface (upf, metrics-endpoint)
        #[arg(long, default_value = "upf")]
        interface: String,

        /// Relation ID
        #[arg(long)]
        id: u32,

        /// Remote unit name
        #[arg(long)]
        remote: String,
    },

    /// A remote unit changed its relation data
    RelationChanged {
        /// Relation interface (upf, metrics-endpoint)
        #[arg(long, default_value = "upf")]
        interface: String,

        /// Relation ID
        #[arg(long)]
        id: u32,

        /// Remote unit name
        #[arg(long)]
        remote: String,
    },

    /// A relation was removed
    RelationBroken {
        /// Relation ID
        #[arg(long)]
        id: u32,
    },

    /// A workload container reported ready
    ContainerReady {
        /// Container name
        container: String,
    },

    /// A workload container stopped being ready
    ContainerUnready {
        /// Container name
        container: String,
    },
}

impl EventCommands {
    fn into_request(self) -> Result<EventRequest> {
        Ok(match self {
            EventCommands::Install => EventRequest::Install,
            EventCommands::Remove => EventRequest::Remove,
            EventCommands::Config { file } => EventRequest::ConfigChanged {
                config: events::load_config(&file)?,
            },
            EventCommands::Attach { resource, image } => {
                EventRequest::ResourceAttached { resource, image }
            }
            EventCommands::RelationJoined {
                interface,
                id,
                remote,
            } => EventRequest::RelationJoined {
                interface,
                relation_id: id,
                remote,
            },
            EventCommands::RelationChanged {
                interface,
                id,
                remote,
            } => EventRequest::RelationChanged {
                interface,
                relation_id: id,
                remote,
            },
            EventCommands::RelationBroken { id } => EventRequest::RelationBroken { relation_id: id },
            EventCommands::ContainerReady { container } => EventRequest::ContainerReady { container },
            EventCommands::ContainerUnready { container } => {
                EventRequest::ContainerUnready { container }
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize client
    let client = client::ApiClient::new(&cli.api_url)?;

    // Execute command
    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Relations => status::show_relations(&client, cli.format).await?,
        Commands::Event(event_cmd) => {
            let event = event_cmd.into_request()?;
            events::send_event(&client, event, cli.format).await?;
        }
    }

    Ok(())
}
