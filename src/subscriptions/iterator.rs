//! Pull-based stream bound to a single bus topic.

use crate::bus::{EventBus, SubscriptionHandle};
use crate::error::Result;
use crate::types::{Event, Topic};
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use futures::task::AtomicWaker;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use super::sequence::{Closer, Sequence, Terminate};

/// Maps a raw event to the value placed under the root field.
pub type Transform = Arc<dyn Fn(Event) -> Result<Value> + Send + Sync>;

/// Lifecycle of a [`TopicIterator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IteratorState {
    /// Constructed, not yet subscribed.
    Created,
    /// Subscribed; events are buffered until pulled.
    Active,
    /// Close requested while a pulled event was being delivered.
    Draining,
    /// Unsubscribed. Terminal.
    Closed,
}

struct Inner {
    state: IteratorState,
    /// At most one live bus subscription.
    subscription: Option<SubscriptionHandle>,
    /// Unbounded FIFO of undelivered events. Taken on close.
    receiver: Option<Receiver<Event>>,
    in_flight: bool,
}

struct Shared {
    bus: Arc<EventBus>,
    topic: Topic,
    waker: Arc<AtomicWaker>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn close(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            IteratorState::Closed | IteratorState::Draining => {}
            IteratorState::Created | IteratorState::Active => {
                if inner.in_flight {
                    inner.state = IteratorState::Draining;
                    debug!(topic = %self.topic, "Topic iterator draining");
                } else {
                    self.finish_close(&mut inner);
                }
            }
        }
    }

    /// Unsubscribes before the state becomes `Closed`.
    fn finish_close(&self, inner: &mut Inner) {
        if let Some(handle) = inner.subscription.take() {
            self.bus.unsubscribe(&handle);
        }
        if let Some(receiver) = inner.receiver.take() {
            let discarded = receiver.len();
            if discarded > 0 {
                debug!(topic = %self.topic, discarded, "Discarded undelivered events");
            }
        }
        inner.state = IteratorState::Closed;
        debug!(topic = %self.topic, "Topic iterator closed");

        // Resolve a suspended pull with "done".
        self.waker.wake();
    }
}

/// Marks a pulled event as in flight until dropped.
struct Delivery<'a> {
    shared: &'a Shared,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.in_flight = false;
        if inner.state == IteratorState::Draining {
            self.shared.finish_close(&mut inner);
        }
    }
}

/// One topic's event stream as a pull-based asynchronous sequence.
///
/// Subscribes on construction and buffers every event published to the
/// topic until it is pulled. Each item is shaped `{ <root_field>: transform(event) }`.
/// Events are yielded in publish order; nothing is reordered or coalesced.
///
/// The buffer is unbounded. Crossing [`BusConfig::buffer_warning_threshold`](crate::bus::BusConfig)
/// only logs a warning.
///
/// Dropping the iterator closes it.
pub struct TopicIterator {
    shared: Arc<Shared>,
    root_field: String,
    transform: Transform,
}

impl TopicIterator {
    /// Subscribe to `topic`, shaping each event with `transform`.
    pub fn new<F>(bus: Arc<EventBus>, topic: Topic, root_field: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Event) -> Result<Value> + Send + Sync + 'static,
    {
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared {
            bus,
            topic: topic.clone(),
            waker: Arc::new(AtomicWaker::new()),
            inner: Mutex::new(Inner {
                state: IteratorState::Created,
                subscription: None,
                receiver: Some(receiver),
                in_flight: false,
            }),
        });

        let waker = Arc::clone(&shared.waker);
        let threshold = shared.bus.config().buffer_warning_threshold;
        let handler_topic = topic.clone();
        let handle = shared.bus.subscribe(topic, move |event: &Event| {
            // Fails only once close() discarded the receiver.
            if sender.send(event.clone()).is_err() {
                return Ok(());
            }
            if let Some(limit) = threshold {
                let buffered = sender.len();
                // The depth is at least 1 after a send, so 0 warns like 1.
                if buffered == limit.max(1) {
                    warn!(topic = %handler_topic, buffered, "Subscription buffer is not being drained");
                }
            }
            waker.wake();
            Ok(())
        });

        {
            let mut inner = shared.inner.lock();
            inner.subscription = Some(handle);
            inner.state = IteratorState::Active;
        }
        debug!(topic = %shared.topic, "Topic iterator active");

        Self {
            shared,
            root_field: root_field.into(),
            transform: Arc::new(transform),
        }
    }

    /// Subscribe to `topic`, placing each raw event under `root_field`.
    pub fn identity(bus: Arc<EventBus>, topic: Topic, root_field: impl Into<String>) -> Self {
        Self::new(bus, topic, root_field, Ok)
    }

    /// Pull the next payload.
    ///
    /// Suspends until an event is published or the iterator is closed.
    /// Returns `None` once closed.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        StreamExt::next(self).await
    }

    /// Stop listening. Idempotent.
    ///
    /// Buffered events are discarded and a suspended `next()` resolves to `None`.
    /// If a pulled event is being delivered, the iterator drains first and
    /// closes as soon as that delivery completes.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn state(&self) -> IteratorState {
        self.shared.inner.lock().state
    }

    /// Events received but not yet pulled.
    pub fn backlog(&self) -> usize {
        self.shared
            .inner
            .lock()
            .receiver
            .as_ref()
            .map_or(0, Receiver::len)
    }

    pub fn topic(&self) -> &Topic {
        &self.shared.topic
    }

    fn shape(&self, event: Event) -> Result<Value> {
        let value = (self.transform)(event)?;
        let mut payload = Map::with_capacity(1);
        payload.insert(self.root_field.clone(), value);
        Ok(Value::Object(payload))
    }
}

impl Stream for TopicIterator {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let event = {
            let mut inner = this.shared.inner.lock();
            if inner.state != IteratorState::Active {
                return Poll::Ready(None);
            }
            let Some(receiver) = inner.receiver.as_ref() else {
                return Poll::Ready(None);
            };

            // Register before checking so a concurrent publish cannot be missed.
            this.shared.waker.register(cx.waker());
            match receiver.try_recv() {
                Ok(event) => {
                    inner.in_flight = true;
                    event
                }
                Err(TryRecvError::Empty) => return Poll::Pending,
                Err(TryRecvError::Disconnected) => {
                    this.shared.finish_close(&mut inner);
                    return Poll::Ready(None);
                }
            }
        };

        let delivery = Delivery {
            shared: &this.shared,
        };
        let payload = this.shape(event);
        drop(delivery);

        Poll::Ready(Some(payload))
    }
}

impl Terminate for TopicIterator {
    fn terminate(&mut self) {
        self.close();
    }
}

impl Sequence for TopicIterator {
    fn closer(&self) -> Closer {
        let shared = Arc::clone(&self.shared);
        Closer::new(move || shared.close())
    }
}

impl Drop for TopicIterator {
    fn drop(&mut self) {
        self.shared.close();
    }
}
