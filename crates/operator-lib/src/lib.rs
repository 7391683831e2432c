//! Operator library for the UPF workload
//!
//! This crate provides the core functionality for:
//! - Container spec generation for the five-container UPF pod
//! - Image resource resolution and persistent volume provisioning
//! - The coalescing reconciliation loop and its status model
//! - Relation data published to SMF and metrics consumers
//! - Health checks and observability

pub mod catalog;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod platform;
pub mod reconciler;
pub mod relation;
pub mod storage;
pub mod workload;

pub use error::{OperatorError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OperatorMetrics, StructuredLogger};
