//! Adapter from a field's `subscribe` function to a disposable payload stream.

use crate::bus::panic_message;
use crate::error::{RelayError, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt, TryFutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use super::disposal::{attach_disposal, attach_disposal_deferred, Disposable};
use super::sequence::{Closer, Sequence, Terminate};

/// Input key echoed back in every payload of a subscription.
pub const CLIENT_SUBSCRIPTION_ID: &str = "clientSubscriptionId";

pub type BoxedSequence = Box<dyn Sequence>;

pub type PendingSequence = BoxFuture<'static, Result<BoxedSequence>>;

/// What a `subscribe` function hands back.
pub enum Subscribed {
    /// A sequence, ready to pull.
    Immediate(BoxedSequence),
    /// A pending value resolving to a sequence.
    Deferred(PendingSequence),
}

impl Subscribed {
    pub fn immediate<S: Sequence + 'static>(sequence: S) -> Self {
        Subscribed::Immediate(Box::new(sequence))
    }

    pub fn deferred<F, S>(pending: F) -> Self
    where
        F: Future<Output = Result<S>> + Send + 'static,
        S: Sequence + 'static,
    {
        Subscribed::Deferred(
            pending
                .map_ok(|sequence| Box::new(sequence) as BoxedSequence)
                .boxed(),
        )
    }
}

/// Input fields of a subscription request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionInput(Map<String, Value>);

impl SubscriptionInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(RelayError::InvalidInput(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A string field that must be present.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(RelayError::InvalidInput(format!(
                "{} must be a string, got {}",
                key, other
            ))),
            None => Err(RelayError::InvalidInput(format!("{} is required", key))),
        }
    }

    pub fn client_subscription_id(&self) -> Option<&str> {
        self.0.get(CLIENT_SUBSCRIPTION_ID).and_then(Value::as_str)
    }
}

/// User-supplied `subscribe` function of a field.
pub type SubscribeFn<C> = Arc<dyn Fn(&SubscriptionInput, &C) -> Result<Subscribed> + Send + Sync>;

/// One subscribable field.
pub struct SubscriptionField<C> {
    name: String,
    subscribe: Option<SubscribeFn<C>>,
}

impl<C> SubscriptionField<C> {
    pub fn new<F>(name: impl Into<String>, subscribe: F) -> Self
    where
        F: Fn(&SubscriptionInput, &C) -> Result<Subscribed> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            subscribe: Some(Arc::new(subscribe)),
        }
    }

    /// A field declared without a `subscribe` function; resolving it always fails.
    pub fn without_subscribe(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribe: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a subscription for one client request.
    ///
    /// Setup failures (the `subscribe` function erroring or panicking, or its
    /// pending value rejecting) come back as [`RelayError::SetupFailed`]. A
    /// `subscribe` function that fails synchronously allocates nothing and
    /// runs no release.
    pub async fn resolve(&self, input: SubscriptionInput, context: &C) -> Result<SubscriptionStream> {
        let Some(subscribe) = self.subscribe.as_ref() else {
            warn!(field = %self.name, "Field has no subscribe function");
            return Err(RelayError::MissingSubscribe(self.name.clone()));
        };

        let subscribed = match panic::catch_unwind(AssertUnwindSafe(|| subscribe(&input, context))) {
            Ok(Ok(subscribed)) => subscribed,
            Ok(Err(e)) => return Err(self.setup_failed(e)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                return Err(self.setup_failed(RelayError::Panicked(message)));
            }
        };

        // Filled once a sequence exists; the release closes it.
        let slot: Arc<Mutex<Option<Closer>>> = Arc::new(Mutex::new(None));
        let release = {
            let slot = Arc::clone(&slot);
            let field = self.name.clone();
            move || {
                close_bound(&slot);
                debug!(field = %field, "Subscription released");
            }
        };

        let sequence = match subscribed {
            Subscribed::Immediate(sequence) => {
                *slot.lock() = Some(sequence.closer());
                attach_disposal(sequence, release)
            }
            Subscribed::Deferred(pending) => {
                let bind = Arc::clone(&slot);
                let pending = pending
                    .map_ok(move |sequence| {
                        *bind.lock() = Some(sequence.closer());
                        sequence
                    })
                    .boxed();
                attach_disposal_deferred(pending, release)
                    .await
                    .map_err(|e| self.setup_failed(e))?
            }
        };

        debug!(field = %self.name, "Subscription established");
        Ok(SubscriptionStream::new(
            sequence,
            input.client_subscription_id().map(str::to_owned),
        ))
    }

    fn setup_failed(&self, cause: RelayError) -> RelayError {
        warn!(field = %self.name, error = %cause, "Subscription setup failed");
        RelayError::setup(self.name.clone(), cause)
    }
}

/// Close the sequence bound to `slot`, if any, with the slot unlocked.
fn close_bound(slot: &Mutex<Option<Closer>>) {
    let closer = slot.lock().take();
    if let Some(closer) = closer {
        closer.close();
    }
}

/// Disposable stream of payloads handed to the protocol layer.
///
/// Pull it to completion, or `close()` (or drop) it on client disconnect.
pub struct SubscriptionStream {
    inner: Disposable<BoxedSequence>,
    client_subscription_id: Option<String>,
}

impl SubscriptionStream {
    pub fn new(inner: Disposable<BoxedSequence>, client_subscription_id: Option<String>) -> Self {
        Self {
            inner,
            client_subscription_id,
        }
    }

    pub async fn next(&mut self) -> Option<Result<Value>> {
        StreamExt::next(self).await
    }

    /// External cancellation. Idempotent.
    pub fn close(&mut self) {
        self.inner.terminate();
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_released()
    }

    pub fn client_subscription_id(&self) -> Option<&str> {
        self.client_subscription_id.as_deref()
    }
}

impl Stream for SubscriptionStream {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(mut payload))) => {
                if let (Some(id), Value::Object(map)) =
                    (&this.client_subscription_id, &mut payload)
                {
                    map.insert(CLIENT_SUBSCRIPTION_ID.to_string(), Value::String(id.clone()));
                }
                Poll::Ready(Some(Ok(payload)))
            }
            other => other,
        }
    }
}

impl Terminate for SubscriptionStream {
    fn terminate(&mut self) {
        self.close();
    }
}
