//! Field set exposed to the protocol layer.
//!
//! Subscriptions:
//! - `entityChanges`: returns a topic iterator directly
//! - `entityChangesDeferred`: returns a pending value resolving to one
//! - `subscribeThrows`: its `subscribe` function always fails
//! - `invalidSubscription`: declared without a `subscribe` function
//!
//! Mutations `createEntity` / `updateEntity` and the `entity` query round
//! out the set so changes can be driven end to end.

use crate::bus::EventBus;
use crate::error::{RelayError, Result};
use crate::global_id::{self, to_global_id, ENTITY_TYPE};
use crate::store::{EntityStore, MemoryStore};
use crate::subscriptions::{
    Subscribed, SubscriptionField, SubscriptionInput, SubscriptionStream, TopicIterator,
};
use crate::types::{Entity, EntityFields, Topic};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const ENTITY_CHANGES: &str = "entityChanges";
pub const ENTITY_CHANGES_DEFERRED: &str = "entityChangesDeferred";
pub const SUBSCRIBE_THROWS: &str = "subscribeThrows";
pub const INVALID_SUBSCRIPTION: &str = "invalidSubscription";

/// Root field of entity change payloads.
pub const ENTITY_ROOT_FIELD: &str = "entity";

/// Execution context handed to every `subscribe` function.
#[derive(Clone)]
pub struct RelayContext {
    pub bus: Arc<EventBus>,
    pub store: Arc<dyn EntityStore>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEntityInput {
    name: String,
    #[serde(default)]
    client_mutation_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEntityInput {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    client_mutation_id: Option<String>,
}

/// The subscribable, mutable and queryable fields.
pub struct Schema {
    context: RelayContext,
    subscriptions: HashMap<String, SubscriptionField<RelayContext>>,
}

impl Schema {
    /// Build a schema over a fresh in-memory store publishing to `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        let store = Arc::new(MemoryStore::with_bus(Arc::clone(&bus)));
        Self::with_store(bus, store)
    }

    pub fn with_store(bus: Arc<EventBus>, store: Arc<dyn EntityStore>) -> Self {
        let fields = [
            SubscriptionField::new(ENTITY_CHANGES, entity_changes),
            SubscriptionField::new(ENTITY_CHANGES_DEFERRED, entity_changes_deferred),
            SubscriptionField::new(SUBSCRIBE_THROWS, subscribe_throws),
            SubscriptionField::without_subscribe(INVALID_SUBSCRIPTION),
        ];

        Self {
            context: RelayContext { bus, store },
            subscriptions: fields
                .into_iter()
                .map(|field| (field.name().to_string(), field))
                .collect(),
        }
    }

    pub fn context(&self) -> &RelayContext {
        &self.context
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.context.bus
    }

    /// Names of the subscription fields, sorted.
    pub fn subscription_fields(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.subscriptions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Open a subscription on `field`.
    pub async fn subscribe(&self, field: &str, input: SubscriptionInput) -> Result<SubscriptionStream> {
        let Some(subscription) = self.subscriptions.get(field) else {
            return Err(RelayError::UnknownField(field.to_string()));
        };
        subscription.resolve(input, &self.context).await
    }

    /// `createEntity(input: { name, clientMutationId })`
    pub fn create_entity(&self, input: Value) -> Result<Value> {
        let input: CreateEntityInput = parse_input(input)?;
        let entity = self
            .context
            .store
            .create_entity(EntityFields::named(input.name))?;

        Ok(json!({
            "entity": entity_view(&entity),
            "clientMutationId": input.client_mutation_id,
        }))
    }

    /// `updateEntity(input: { id, name, clientMutationId })`
    pub fn update_entity(&self, input: Value) -> Result<Value> {
        let input: UpdateEntityInput = parse_input(input)?;
        let id = global_id::entity_id(&input.id)?;
        debug!(entity = %id, "updateEntity");

        let entity = self
            .context
            .store
            .update_entity(&id, EntityFields { name: input.name })?;

        Ok(json!({
            "entity": entity_view(&entity),
            "clientMutationId": input.client_mutation_id,
        }))
    }

    /// `entity(id)`. `None` when no entity has that id.
    pub fn entity(&self, global_id: &str) -> Result<Option<Value>> {
        let id = global_id::entity_id(global_id)?;
        Ok(self.context.store.get_entity(&id).as_ref().map(entity_view))
    }
}

/// Client-facing shape of an entity.
pub fn entity_view(entity: &Entity) -> Value {
    let name = entity.name.as_deref().unwrap_or_default();
    json!({
        "id": to_global_id(ENTITY_TYPE, entity.id.as_str()),
        "name": entity.name,
        "idAndName": format!("{}:{}", entity.id, name),
    })
}

fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> Result<T> {
    serde_json::from_value(input).map_err(|e| RelayError::InvalidInput(e.to_string()))
}

fn entity_iterator(input: &SubscriptionInput, context: &RelayContext) -> Result<TopicIterator> {
    let id = global_id::entity_id(input.require_str("id")?)?;
    let topic = Topic::entity_changes(&id);
    debug!(topic = %topic, entity = %id, "Subscribing to entity changes");

    let store = Arc::clone(&context.store);
    Ok(TopicIterator::new(
        Arc::clone(&context.bus),
        topic,
        ENTITY_ROOT_FIELD,
        move |event| {
            let changed: Entity = serde_json::from_value(event)?;
            // Read through so the payload reflects the stored entity.
            let entity = store
                .get_entity(&changed.id)
                .ok_or_else(|| RelayError::EntityNotFound(changed.id.clone()))?;
            Ok(entity_view(&entity))
        },
    ))
}

fn entity_changes(input: &SubscriptionInput, context: &RelayContext) -> Result<Subscribed> {
    Ok(Subscribed::immediate(entity_iterator(input, context)?))
}

fn entity_changes_deferred(input: &SubscriptionInput, context: &RelayContext) -> Result<Subscribed> {
    let iterator = entity_iterator(input, context)?;
    Ok(Subscribed::deferred(async move { Ok(iterator) }))
}

fn subscribe_throws(_input: &SubscriptionInput, _context: &RelayContext) -> Result<Subscribed> {
    Err(RelayError::Subscribe("subscribe error".to_string()))
}
