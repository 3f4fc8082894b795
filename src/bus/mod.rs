//! Process-wide keyed publish/subscribe registry.
//!
//! The bus is an explicitly owned object (usually behind an `Arc`) rather
//! than ambient global state, so every test can build a fresh one.
//!
//! - `publish` runs every active handler of a topic synchronously, in
//!   registration order, against a snapshot taken at the start of the pass
//! - handler errors and panics are isolated, counted and reported according
//!   to [`HandlerErrorPolicy`]
//! - `unsubscribe` is idempotent
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::new();
//! let handle = bus.subscribe("entity-changes:42".into(), |event| {
//!     println!("changed: {}", event);
//!     Ok(())
//! });
//!
//! bus.publish(&"entity-changes:42".into(), json!({ "id": "42" }));
//! bus.unsubscribe(&handle);
//! ```

mod registry;
mod types;

pub(crate) use registry::panic_message;
pub use registry::EventBus;
pub use types::{
    BusConfig, BusStats, FailureHook, Handler, HandlerErrorPolicy, HandlerFailure,
    HandlerResult, SubscriptionHandle,
};
