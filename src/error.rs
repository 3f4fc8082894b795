//! Error types for the subscription relay.

use crate::types::EntityId;
use thiserror::Error;

/// Main error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Subscription setup failed for {field}: {source}")]
    SetupFailed {
        field: String,
        #[source]
        source: Box<RelayError>,
    },

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Subscribe function panicked: {0}")]
    Panicked(String),

    #[error("Subscription field not found: {0}")]
    UnknownField(String),

    #[error("Subscription field has no subscribe function: {0}")]
    MissingSubscribe(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid global id: {0}")]
    InvalidGlobalId(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Pending subscription polled after it resolved")]
    AlreadyResolved,
}

impl RelayError {
    /// Wrap a cause as a setup failure of `field`.
    pub fn setup(field: impl Into<String>, source: RelayError) -> Self {
        RelayError::SetupFailed {
            field: field.into(),
            source: Box::new(source),
        }
    }

    /// True for failures raised before a subscription existed.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            RelayError::SetupFailed { .. }
                | RelayError::UnknownField(_)
                | RelayError::MissingSubscribe(_)
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for RelayError {
    fn from(e: hex::FromHexError) -> Self {
        RelayError::InvalidGlobalId(e.to_string())
    }
}

/// Error returned by an event bus handler.
///
/// Never reaches the publisher; the bus counts it and reports it according
/// to its [`HandlerErrorPolicy`](crate::bus::HandlerErrorPolicy).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError(message.into())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
