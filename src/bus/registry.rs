//! Topic registry with snapshot-based publishing.

use crate::types::{Event, SubscriptionId, Topic};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{
    BusConfig, BusStats, FailureHook, Handler, HandlerErrorPolicy, HandlerFailure, HandlerResult,
    SubscriptionHandle,
};

/// Internal subscription record, owned by the bus.
struct SubscriptionRecord {
    id: SubscriptionId,
    handler: Handler,
    /// Flips to false exactly once; the handler is never invoked afterwards.
    active: AtomicBool,
}

impl SubscriptionRecord {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true for the single call that deactivated the record.
    fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

/// Keyed publish/subscribe registry.
pub struct EventBus {
    /// Active records per topic, in registration order.
    topics: RwLock<HashMap<Topic, Vec<Arc<SubscriptionRecord>>>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    config: BusConfig,
    failure_hook: Option<FailureHook>,

    subscriptions_created: AtomicU64,
    subscriptions_removed: AtomicU64,
    events_published: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventBus {
    /// Create a bus with the default configuration.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a bus with a custom configuration.
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
            failure_hook: None,
            subscriptions_created: AtomicU64::new(0),
            subscriptions_removed: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Attach a hook that observes every isolated handler failure.
    pub fn with_failure_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandlerFailure) + Send + Sync + 'static,
    {
        self.failure_hook = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register `handler` for `topic`.
    ///
    /// Several subscriptions to one topic are independent of each other.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = Arc::new(SubscriptionRecord {
            id,
            handler: Arc::new(handler),
            active: AtomicBool::new(true),
        });

        self.topics
            .write()
            .entry(topic.clone())
            .or_default()
            .push(record);
        self.subscriptions_created.fetch_add(1, Ordering::Relaxed);

        debug!(topic = %topic, subscription = id.0, "Subscription registered");

        SubscriptionHandle { id, topic }
    }

    /// Deactivate and remove a subscription.
    ///
    /// Idempotent: returns true only for the call that actually removed it.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = {
            let mut topics = self.topics.write();
            let Some(records) = topics.get_mut(&handle.topic) else {
                return false;
            };
            let Some(pos) = records.iter().position(|r| r.id == handle.id) else {
                return false;
            };

            let record = records.remove(pos);
            if records.is_empty() {
                topics.remove(&handle.topic);
            }
            record.deactivate()
        };

        if removed {
            self.subscriptions_removed.fetch_add(1, Ordering::Relaxed);
            debug!(topic = %handle.topic, subscription = handle.id.0, "Subscription removed");
        }
        removed
    }

    /// Deliver `event` to every active handler of `topic`.
    ///
    /// Handlers run synchronously, in registration order, against the set
    /// that was registered when the pass started. A failing or panicking
    /// handler never affects its siblings or the caller.
    ///
    /// A record removed before the pass reaches it is skipped. The check is
    /// not atomic with the call: if `unsubscribe` runs on another thread
    /// while this pass is past the check, that handler may run once more
    /// after `unsubscribe` returned. Callers needing a hard cutoff publish
    /// and unsubscribe from the same thread.
    pub fn publish(&self, topic: &Topic, event: Event) {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let snapshot: Vec<Arc<SubscriptionRecord>> = match self.topics.read().get(topic) {
            Some(records) => records.clone(),
            None => {
                debug!(topic = %topic, "Event dropped (no subscribers)");
                return;
            }
        };

        for record in &snapshot {
            // Removed after the snapshot was taken.
            if !record.is_active() {
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (record.handler)(&event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.report_failure(topic, record.id, e.to_string()),
                Err(payload) => {
                    self.report_failure(topic, record.id, panic_message(payload.as_ref()))
                }
            }
        }

        debug!(topic = %topic, receivers = snapshot.len(), "Event published");
    }

    fn report_failure(&self, topic: &Topic, subscription: SubscriptionId, message: String) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);

        if self.config.handler_errors == HandlerErrorPolicy::Log {
            warn!(
                topic = %topic,
                subscription = subscription.0,
                error = %message,
                "Event handler failed"
            );
        }

        if let Some(hook) = &self.failure_hook {
            hook(&HandlerFailure {
                topic: topic.clone(),
                subscription,
                message,
            });
        }
    }

    /// Number of active subscriptions to `topic`.
    pub fn subscription_count(&self, topic: &Topic) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Number of topics with at least one active subscription.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    pub fn stats(&self) -> BusStats {
        let topics = self.topics.read();
        BusStats {
            topics: topics.len(),
            subscriptions: topics.values().map(Vec::len).sum(),
            subscriptions_created: self.subscriptions_created.load(Ordering::Relaxed),
            subscriptions_removed: self.subscriptions_removed.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
