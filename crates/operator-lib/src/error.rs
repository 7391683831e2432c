//! Error taxonomy for the reconciliation pipeline

use crate::models::{ContainerName, VolumeName};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors raised by operator components
///
/// All of these are caught at the reconciliation boundary and converted into a
/// `ReconciliationStatus`; none escapes the control loop.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// An image resource has not been attached yet
    #[error("resource unavailable: {resource}")]
    ResourceUnavailable { resource: String },

    /// The storage backend cannot satisfy a volume spec
    #[error("storage provisioning failed for {volume}: {reason}")]
    StorageProvision { volume: VolumeName, reason: String },

    /// Invalid or contradictory user-supplied configuration
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The platform rejected a container spec
    #[error("platform rejected container {container}: {reason}")]
    ContainerApply {
        container: ContainerName,
        reason: String,
    },

    /// A call to an external collaborator exceeded its deadline
    #[error("{operation} timed out after {}ms", timeout.as_millis())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// Any other platform failure
    #[error("platform error during {operation}: {message}")]
    Platform {
        operation: String,
        message: String,
        retryable: bool,
    },
}

impl OperatorError {
    pub fn platform(operation: impl Into<String>, message: impl ToString, retryable: bool) -> Self {
        OperatorError::Platform {
            operation: operation.into(),
            message: message.to_string(),
            retryable,
        }
    }

    /// Whether repeating the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            OperatorError::ResourceUnavailable { .. } => true,
            OperatorError::StorageProvision { .. } => true,
            OperatorError::Configuration(_) => false,
            OperatorError::ContainerApply { .. } => true,
            OperatorError::Timeout { .. } => true,
            OperatorError::Platform { retryable, .. } => *retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OperatorError::ResourceUnavailable {
            resource: "bessd-image".into()
        }
        .is_retryable());
        assert!(!OperatorError::Configuration("bad".into()).is_retryable());
        assert!(!OperatorError::platform("apply", "forbidden", false).is_retryable());
        assert!(OperatorError::Timeout {
            operation: "probe bessd".into(),
            timeout: Duration::from_secs(5)
        }
        .is_retryable());
    }

    #[test]
    fn test_messages_name_the_subject() {
        let err = OperatorError::StorageProvision {
            volume: VolumeName::SharedApp,
            reason: "claim pending".into(),
        };
        assert_eq!(
            err.to_string(),
            "storage provisioning failed for shared-app: claim pending"
        );
    }
}
