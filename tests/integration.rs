//! End-to-end tests through the schema: mutations drive the bus, subscriptions
//! stream the changes back.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use subscription_relay::schema::{
    ENTITY_CHANGES, ENTITY_CHANGES_DEFERRED, INVALID_SUBSCRIPTION, SUBSCRIBE_THROWS,
};
use subscription_relay::{
    EventBus, RelayError, Schema, SubscriptionInput, Topic, CLIENT_SUBSCRIPTION_ID,
};
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn test_schema() -> (Arc<EventBus>, Schema) {
    init_tracing();
    let bus = Arc::new(EventBus::new());
    let schema = Schema::new(Arc::clone(&bus));
    (bus, schema)
}

/// Create an entity and return its global id.
fn create(schema: &Schema, name: &str) -> String {
    let created = schema.create_entity(json!({ "name": name })).unwrap();
    created["entity"]["id"].as_str().unwrap().to_string()
}

fn rename(schema: &Schema, id: &str, name: &str) {
    schema
        .update_entity(json!({ "id": id, "name": name }))
        .unwrap();
}

fn subscription_input(id: &str) -> SubscriptionInput {
    SubscriptionInput::new().with("id", id)
}

fn entity_name(payload: &Value) -> &str {
    payload["entity"]["name"].as_str().unwrap()
}

// --- Streaming ---

#[tokio::test]
async fn test_entity_changes_stream_updates() {
    let (_bus, schema) = test_schema();
    let id = create(&schema, "Ann");

    let mut changes = schema
        .subscribe(ENTITY_CHANGES, subscription_input(&id))
        .await
        .unwrap();

    rename(&schema, &id, "Anne");
    rename(&schema, &id, "Annie");

    let first = changes.next().await.unwrap().unwrap();
    assert_eq!(first["entity"]["id"], json!(id));
    // Read-through: the payload reflects the store at pull time.
    assert_eq!(entity_name(&first), "Annie");

    let second = changes.next().await.unwrap().unwrap();
    assert_eq!(entity_name(&second), "Annie");
    assert!(second["entity"]["idAndName"]
        .as_str()
        .unwrap()
        .ends_with(":Annie"));
}

#[tokio::test]
async fn test_deferred_entity_changes_stream_updates() {
    let (bus, schema) = test_schema();
    let id = create(&schema, "Bob");

    let mut changes = schema
        .subscribe(ENTITY_CHANGES_DEFERRED, subscription_input(&id))
        .await
        .unwrap();
    assert_eq!(bus.stats().subscriptions, 1);

    rename(&schema, &id, "Robert");
    let payload = changes.next().await.unwrap().unwrap();
    assert_eq!(entity_name(&payload), "Robert");
}

#[tokio::test]
async fn test_client_subscription_id_echoed_in_payloads() {
    let (_bus, schema) = test_schema();
    let id = create(&schema, "Cy");

    let mut changes = schema
        .subscribe(
            ENTITY_CHANGES,
            subscription_input(&id).with(CLIENT_SUBSCRIPTION_ID, "client-7"),
        )
        .await
        .unwrap();

    rename(&schema, &id, "Cyrus");
    let payload = changes.next().await.unwrap().unwrap();
    assert_eq!(payload[CLIENT_SUBSCRIPTION_ID], json!("client-7"));
    assert_eq!(entity_name(&payload), "Cyrus");
}

#[tokio::test]
async fn test_two_clients_receive_every_change_independently() {
    let (bus, schema) = test_schema();
    let id = create(&schema, "Dee");

    let mut eager = schema
        .subscribe(ENTITY_CHANGES, subscription_input(&id))
        .await
        .unwrap();
    let mut lazy = schema
        .subscribe(ENTITY_CHANGES_DEFERRED, subscription_input(&id))
        .await
        .unwrap();
    assert_eq!(bus.stats().subscriptions, 2);

    rename(&schema, &id, "one");
    assert!(eager.next().await.unwrap().is_ok());
    rename(&schema, &id, "two");
    assert!(eager.next().await.unwrap().is_ok());

    assert!(lazy.next().await.unwrap().is_ok());
    assert!(lazy.next().await.unwrap().is_ok());

    eager.close();
    rename(&schema, &id, "three");
    assert_eq!(entity_name(&lazy.next().await.unwrap().unwrap()), "three");
    assert!(eager.next().await.is_none());
}

#[tokio::test]
async fn test_changes_to_other_entities_are_not_delivered() {
    let (_bus, schema) = test_schema();
    let watched = create(&schema, "Eve");
    let other = create(&schema, "Mal");

    let mut changes = schema
        .subscribe(ENTITY_CHANGES, subscription_input(&watched))
        .await
        .unwrap();

    rename(&schema, &other, "Mallory");
    assert!(timeout(Duration::from_millis(50), changes.next())
        .await
        .is_err());

    rename(&schema, &watched, "Evelyn");
    let payload = timeout(Duration::from_secs(1), changes.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(entity_name(&payload), "Evelyn");
}

// --- Teardown ---

#[tokio::test]
async fn test_cancel_before_any_event() {
    let (bus, schema) = test_schema();
    let id = create(&schema, "Fay");

    let mut changes = schema
        .subscribe(ENTITY_CHANGES, subscription_input(&id))
        .await
        .unwrap();
    changes.close();

    assert!(changes.next().await.is_none());
    assert!(changes.is_released());

    let stats = bus.stats();
    assert_eq!(stats.subscriptions, 0);
    assert_eq!(stats.subscriptions_removed, 1);

    // Later mutations publish into the void.
    rename(&schema, &id, "Faye");
    assert!(changes.next().await.is_none());
}

#[tokio::test]
async fn test_client_disconnect_drops_subscription() {
    let (bus, schema) = test_schema();
    let id = create(&schema, "Gus");

    let changes = schema
        .subscribe(ENTITY_CHANGES_DEFERRED, subscription_input(&id))
        .await
        .unwrap();
    assert_eq!(bus.stats().subscriptions, 1);

    drop(changes);
    let stats = bus.stats();
    assert_eq!(stats.subscriptions, 0);
    assert_eq!(stats.subscriptions_removed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_aborted_consumer_releases_subscription() {
    let (bus, schema) = test_schema();
    let id = create(&schema, "Hal");

    let changes = schema
        .subscribe(ENTITY_CHANGES, subscription_input(&id))
        .await
        .unwrap();

    let consumer = tokio::spawn(async move {
        let mut changes = changes;
        let mut received = 0;
        while let Some(payload) = changes.next().await {
            payload.unwrap();
            received += 1;
        }
        received
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    rename(&schema, &id, "Hank");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bus.stats().subscriptions, 1);

    consumer.abort();
    let _ = consumer.await;
    assert_eq!(bus.stats().subscriptions, 0);
}

#[tokio::test]
async fn test_change_for_unknown_entity_ends_stream_with_error() {
    let (bus, schema) = test_schema();
    let id = create(&schema, "Ivy");

    let mut changes = schema
        .subscribe(ENTITY_CHANGES, subscription_input(&id))
        .await
        .unwrap();

    // The read-through lookup cannot find the entity named by the event.
    let entity = subscription_relay::global_id::entity_id(&id).unwrap();
    bus.publish(
        &Topic::entity_changes(&entity),
        json!({ "id": "not-in-store", "name": "?" }),
    );

    assert!(matches!(
        changes.next().await,
        Some(Err(RelayError::EntityNotFound(_)))
    ));
    assert!(changes.is_released());
    assert_eq!(bus.stats().subscriptions, 0);
    assert!(changes.next().await.is_none());
}

// --- Setup failures ---

#[tokio::test]
async fn test_subscribe_throws_creates_no_bus_subscription() {
    let (bus, schema) = test_schema();
    let id = create(&schema, "Jo");

    let err = schema
        .subscribe(SUBSCRIBE_THROWS, subscription_input(&id))
        .await
        .err()
        .unwrap();

    assert!(err.is_setup_failure());
    assert!(err.to_string().contains("subscribe error"));
    assert_eq!(bus.stats().subscriptions_created, 0);
}

#[tokio::test]
async fn test_invalid_subscription_has_no_subscribe_function() {
    let (bus, schema) = test_schema();

    let err = schema
        .subscribe(INVALID_SUBSCRIPTION, SubscriptionInput::new().with("id", "x"))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, RelayError::MissingSubscribe(_)));
    assert_eq!(bus.stats().subscriptions_created, 0);
}

#[tokio::test]
async fn test_unknown_field() {
    let (_bus, schema) = test_schema();
    let err = schema
        .subscribe("nope", SubscriptionInput::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RelayError::UnknownField(ref f) if f == "nope"));
}

#[tokio::test]
async fn test_bad_global_id_is_setup_failure() {
    let (bus, schema) = test_schema();

    for field in [ENTITY_CHANGES, ENTITY_CHANGES_DEFERRED] {
        let err = schema
            .subscribe(field, SubscriptionInput::new().with("id", "not-a-global-id"))
            .await
            .err()
            .unwrap();
        match err {
            RelayError::SetupFailed { source, .. } => {
                assert!(matches!(*source, RelayError::InvalidGlobalId(_)))
            }
            other => panic!("Expected setup failure, got {:?}", other),
        }
    }

    let err = schema
        .subscribe(ENTITY_CHANGES, SubscriptionInput::new())
        .await
        .err()
        .unwrap();
    assert!(err.is_setup_failure());
    assert_eq!(bus.stats().subscriptions_created, 0);
}
