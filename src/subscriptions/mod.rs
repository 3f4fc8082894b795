//! Subscription lifecycle: topic iterators, the disposal protocol and the
//! resolver adapter that ties them to subscribable fields.
//!
//! Data flows from the bus into a [`TopicIterator`], through a
//! [`Disposable`] wrapper, out to the protocol layer as a
//! [`SubscriptionStream`]. Teardown runs the other way: closing (or
//! dropping) the stream fires the release exactly once, which closes the
//! iterator, which removes its bus subscription.
//!
//! # Example
//!
//! ```ignore
//! let field = SubscriptionField::new("entityChanges", |input, bus: &Arc<EventBus>| {
//!     let topic = Topic::new(input.require_str("topic")?);
//!     Ok(Subscribed::immediate(TopicIterator::identity(bus.clone(), topic, "entity")))
//! });
//!
//! let mut stream = field.resolve(input, &bus).await?;
//! while let Some(payload) = stream.next().await {
//!     send_to_client(payload?);
//! }
//! ```

mod disposal;
mod iterator;
mod resolver;
mod sequence;

pub use disposal::{attach_disposal, attach_disposal_deferred, Disposable, DisposableFuture, Release};
pub use iterator::{IteratorState, TopicIterator, Transform};
pub use resolver::{
    BoxedSequence, PendingSequence, SubscribeFn, Subscribed, SubscriptionField, SubscriptionInput,
    SubscriptionStream, CLIENT_SUBSCRIPTION_ID,
};
pub use sequence::{Closer, Sequence, Terminate};
