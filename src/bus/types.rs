//! Event bus types.

use crate::error::{HandlerError, Result};
use crate::types::{Event, SubscriptionId, Topic};
use serde::Deserialize;
use std::sync::Arc;

/// Outcome of a single handler invocation.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A registered event handler.
pub type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Callback receiving every isolated handler failure.
pub type FailureHook = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;

/// What the bus does with a handler failure besides isolating it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    /// Count it, nothing else.
    Silent,
    /// Count it and emit a `warn!` event.
    #[default]
    Log,
}

/// Configuration for an [`EventBus`](super::EventBus).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Reporting of handler failures.
    /// Default: Log
    pub handler_errors: HandlerErrorPolicy,

    /// Per-subscription buffer depth at which a warning is logged, once
    /// each time the depth rises to it. Buffers are never bounded; None
    /// disables the warning and Some(0) behaves like Some(1).
    /// Default: 1000
    pub buffer_warning_threshold: Option<usize>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            handler_errors: HandlerErrorPolicy::Log,
            buffer_warning_threshold: Some(1000),
        }
    }
}

impl BusConfig {
    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Handle returned by `subscribe`, used to request removal.
///
/// The bus owns the subscription record itself; the handle only names it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub topic: Topic,
}

/// A handler failure isolated during a publish pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerFailure {
    pub topic: Topic,
    pub subscription: SubscriptionId,
    pub message: String,
}

/// Bus statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Topics with at least one active subscription.
    pub topics: usize,
    /// Currently active subscriptions.
    pub subscriptions: usize,
    /// Subscriptions ever created.
    pub subscriptions_created: u64,
    /// Subscriptions ever removed.
    pub subscriptions_removed: u64,
    /// Publish calls.
    pub events_published: u64,
    /// Handler errors and panics isolated during publish.
    pub handler_failures: u64,
}
