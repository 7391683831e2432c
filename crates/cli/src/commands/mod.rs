//! CLI subcommand implementations

pub mod events;
pub mod status;
