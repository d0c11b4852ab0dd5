use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::EventError;
use crate::value::{TimedValue, ValueType};

/// Errors surfaced by the gateway core.
///
/// Every failure a command body or a submitter can observe is represented
/// here. Southbound handlers report [`crate::whiteboard::HandlerError`], which
/// the cache protocol folds into [`GatewayError::PullFailure`],
/// [`GatewayError::PushFailure`] or [`GatewayError::ActionFailure`].
#[derive(Error, Debug)]
pub enum GatewayError {
    // scheduling
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Command panicked: {0}")]
    CommandPanicked(String),

    #[error("Command timed out after {timeout:?}")]
    CommandTimeout { timeout: Duration },

    #[error("Command queue saturated (capacity {capacity})")]
    QueueSaturation { capacity: usize },

    #[error("Gateway is shut down")]
    ShutDown,

    #[error("Command was dropped before completion")]
    Cancelled,

    // resource cache protocol
    #[error(
        "Stale write on {resource}: incoming timestamp {attempted} is older than cached {cached}"
    )]
    StaleWrite {
        resource: String,
        cached: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("Pull failed on {resource}: {reason}")]
    PullFailure {
        resource: String,
        reason: String,
        cached: TimedValue,
    },

    #[error("Push failed on {resource}: {reason}")]
    PushFailure { resource: String, reason: String },

    #[error("Action failed on {resource}: {reason}")]
    ActionFailure { resource: String, reason: String },

    #[error("No {kind} handler registered for {resource}")]
    NoHandler { kind: &'static str, resource: String },

    // twin registry
    #[error("Handle used outside of its command scope: {0}")]
    InvalidScope(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Service not found: {provider}/{service}")]
    ServiceNotFound { provider: String, service: String },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Metadata {name} not found on {resource}")]
    MetadataNotFound { resource: String, name: String },

    #[error("Provider already exists: {0}")]
    ProviderAlreadyExists(String),

    #[error("Provider {provider} belongs to model {actual}, not {expected}")]
    ModelMismatch {
        provider: String,
        expected: String,
        actual: String,
    },

    #[error("Type mismatch on {resource}: expected {expected}, got {got}")]
    TypeMismatch {
        resource: String,
        expected: ValueType,
        got: ValueType,
    },

    #[error("Resource {0} is an action and has no value")]
    ActionResource(String),

    #[error("Resource {0} is not an action")]
    NotAnAction(String),

    // ambient
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn command<S: Into<String>>(message: S) -> Self {
        GatewayError::CommandFailed(message.into())
    }

    /// True when the error was produced by the scheduler rather than by the
    /// command body.
    pub fn is_scheduling_error(&self) -> bool {
        matches!(
            self,
            GatewayError::QueueSaturation { .. }
                | GatewayError::ShutDown
                | GatewayError::Cancelled
                | GatewayError::CommandTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::QueueSaturation { capacity: 4096 };
        assert_eq!(err.to_string(), "Command queue saturated (capacity 4096)");

        let err = GatewayError::command("boom");
        assert_eq!(err.to_string(), "Command failed: boom");
    }

    #[test]
    fn test_scheduling_errors() {
        assert!(GatewayError::ShutDown.is_scheduling_error());
        assert!(GatewayError::Cancelled.is_scheduling_error());
        assert!(!GatewayError::InvalidScope("r".into()).is_scheduling_error());
    }
}
