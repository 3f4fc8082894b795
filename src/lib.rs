//! # Subscription Relay
//!
//! Bridges subscribable fields to a process-wide event bus, producing one
//! disposable stream of update payloads per client subscription.
//!
//! ## Core Concepts
//!
//! - **Event Bus**: keyed publish/subscribe registry with isolated handlers
//! - **Topic Iterator**: one topic's events as a pull-based async stream
//! - **Disposal**: a release callback that fires exactly once, however the
//!   subscription ends (exhaustion, cancellation, error, drop)
//! - **Resolver**: turns a field's `subscribe` function into a disposable stream
//!
//! ## Example
//!
//! ```ignore
//! use subscription_relay::{EventBus, Schema, SubscriptionInput};
//!
//! let bus = Arc::new(EventBus::new());
//! let schema = Schema::new(bus.clone());
//!
//! let created = schema.create_entity(json!({ "name": "Ann" }))?;
//! let id = created["entity"]["id"].as_str().unwrap();
//!
//! let mut changes = schema
//!     .subscribe("entityChanges", SubscriptionInput::new().with("id", id))
//!     .await?;
//!
//! schema.update_entity(json!({ "id": id, "name": "Anne" }))?;
//! let payload = changes.next().await;
//!
//! // Client went away
//! changes.close();
//! ```

pub mod bus;
pub mod error;
pub mod global_id;
pub mod schema;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use bus::{
    BusConfig, BusStats, EventBus, HandlerErrorPolicy, HandlerFailure, HandlerResult,
    SubscriptionHandle,
};
pub use error::{HandlerError, RelayError, Result};
pub use global_id::{from_global_id, to_global_id, ResolvedGlobalId};
pub use schema::{entity_view, RelayContext, Schema};
pub use store::{EntityStore, MemoryStore};
pub use subscriptions::{
    attach_disposal, attach_disposal_deferred, Closer, Disposable, DisposableFuture,
    IteratorState, Release, Sequence, Subscribed, SubscriptionField, SubscriptionInput,
    SubscriptionStream, Terminate, TopicIterator, CLIENT_SUBSCRIPTION_ID,
};
pub use types::*;
