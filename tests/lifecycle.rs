//! Lifecycle guarantees of topic iterators and the disposal protocol.

use futures::executor::block_on;
use futures::future::{self, BoxFuture, FutureExt};
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use subscription_relay::{
    attach_disposal, attach_disposal_deferred, EventBus, IteratorState, RelayError, Result,
    Sequence, Topic, TopicIterator,
};

fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&count);
    (count, move || {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}

// --- Release exactly once ---

#[tokio::test]
async fn test_release_once_on_exhaustion() {
    let bus = Arc::new(EventBus::new());
    let topic = Topic::from("t");
    let iter = TopicIterator::identity(Arc::clone(&bus), topic.clone(), "v");
    let closer = iter.closer();
    let (count, release) = counter();
    let mut seq = attach_disposal(iter, release);

    bus.publish(&topic, json!(1));
    assert!(seq.next().await.unwrap().is_ok());

    // The iterator ends on its own; the wrapper sees exhaustion.
    closer.close();
    assert!(seq.next().await.is_none());
    assert_eq!(count.load(Ordering::SeqCst), 1);

    seq.close();
    drop(seq);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_release_once_on_cancellation() {
    let bus = Arc::new(EventBus::new());
    let topic = Topic::from("t");
    let iter = TopicIterator::identity(Arc::clone(&bus), topic.clone(), "v");
    let (count, release) = counter();
    let mut seq = attach_disposal(iter, release);

    seq.close();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(seq.get_ref().state(), IteratorState::Closed);
    assert_eq!(bus.subscription_count(&topic), 0);

    assert!(seq.next().await.is_none());
    seq.close();
    drop(seq);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(bus.stats().subscriptions_removed, 1);
}

#[tokio::test]
async fn test_release_once_on_rejection() {
    let (count, release) = counter();
    let pending: BoxFuture<'static, Result<TopicIterator>> =
        future::ready(Err(RelayError::Subscribe("rejected".to_string()))).boxed();

    let result = attach_disposal_deferred(pending, release).await;

    assert!(result.is_err());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_release_once_when_deferred_sequence_is_cancelled() {
    let bus = Arc::new(EventBus::new());
    let topic = Topic::from("t");
    let iter = TopicIterator::identity(Arc::clone(&bus), topic.clone(), "v");
    let (count, release) = counter();
    let pending: BoxFuture<'static, Result<TopicIterator>> = future::ready(Ok(iter)).boxed();

    let mut seq = attach_disposal_deferred(pending, release).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);

    seq.close();
    drop(seq);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(bus.subscription_count(&topic), 0);
}

// --- Iterator scenarios ---

#[tokio::test]
async fn test_entity_change_scenario() {
    let bus = Arc::new(EventBus::new());
    let topic = Topic::from("entity-changes:42");
    let mut iter = TopicIterator::identity(Arc::clone(&bus), topic.clone(), "entityChanged");

    bus.publish(&topic, json!({ "id": "42", "name": "Ann" }));

    assert_eq!(
        iter.next().await.unwrap().unwrap(),
        json!({ "entityChanged": { "id": "42", "name": "Ann" } })
    );
}

#[test]
fn test_close_idle_iterator_unsubscribes_once() {
    let bus = Arc::new(EventBus::new());
    let iter = TopicIterator::identity(Arc::clone(&bus), "t".into(), "v");

    iter.close();
    iter.close();
    assert_eq!(iter.state(), IteratorState::Closed);
    assert_eq!(bus.stats().subscriptions_removed, 1);
}

// --- Ordering ---

proptest! {
    #[test]
    fn prop_iterator_yields_publish_order(events in prop::collection::vec(any::<i64>(), 0..64)) {
        let bus = Arc::new(EventBus::new());
        let topic = Topic::from("prop");
        let mut iter = TopicIterator::identity(Arc::clone(&bus), topic.clone(), "v");

        for event in &events {
            bus.publish(&topic, json!(event));
        }

        let received: Vec<i64> = block_on(async {
            let mut out = Vec::with_capacity(events.len());
            for _ in 0..events.len() {
                let payload = iter.next().await.unwrap().unwrap();
                out.push(payload["v"].as_i64().unwrap());
            }
            out
        });

        prop_assert_eq!(received, events);
        prop_assert_eq!(iter.backlog(), 0);
    }

    #[test]
    fn prop_independent_subscribers_see_same_order(
        events in prop::collection::vec(any::<u32>(), 1..32),
        split in any::<prop::sample::Index>(),
    ) {
        let bus = Arc::new(EventBus::new());
        let topic = Topic::from("prop");
        let mut a = TopicIterator::identity(Arc::clone(&bus), topic.clone(), "v");
        let mut b = TopicIterator::identity(Arc::clone(&bus), topic.clone(), "v");
        let split = split.index(events.len());

        // `a` pulls midway; `b` only at the end.
        let mut from_a = Vec::new();
        for event in &events[..split] {
            bus.publish(&topic, json!(event));
        }
        block_on(async {
            for _ in 0..split {
                from_a.push(a.next().await.unwrap().unwrap());
            }
        });
        for event in &events[split..] {
            bus.publish(&topic, json!(event));
        }
        let from_b: Vec<_> = block_on(async {
            let mut out = Vec::new();
            for _ in 0..events.len() {
                out.push(b.next().await.unwrap().unwrap());
            }
            out
        });
        block_on(async {
            for _ in split..events.len() {
                from_a.push(a.next().await.unwrap().unwrap());
            }
        });

        prop_assert_eq!(from_a, from_b);
    }
}
