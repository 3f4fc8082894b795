//! In-memory entity store backing queries, mutations and change events.

use crate::bus::EventBus;
use crate::error::{RelayError, Result};
use crate::types::{Entity, EntityFields, EntityId, Topic};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Storage consumed by the schema.
pub trait EntityStore: Send + Sync {
    fn create_entity(&self, fields: EntityFields) -> Result<Entity>;

    /// Apply `fields` to an existing entity. Absent fields are kept.
    fn update_entity(&self, id: &EntityId, fields: EntityFields) -> Result<Entity>;

    fn get_entity(&self, id: &EntityId) -> Option<Entity>;
}

/// Entity store held in memory.
///
/// When a bus is attached, every update publishes the updated entity to
/// `entity-changes:<id>`.
pub struct MemoryStore {
    entities: RwLock<HashMap<EntityId, Entity>>,
    /// Counter for generating entity IDs.
    next_id: AtomicU64,
    bus: Option<Arc<EventBus>>,
}

impl MemoryStore {
    /// Create a store that publishes nothing.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            bus: None,
        }
    }

    /// Create a store publishing entity changes to `bus`.
    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    fn publish_change(&self, entity: &Entity) -> Result<()> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        let event = serde_json::to_value(entity)?;
        bus.publish(&Topic::entity_changes(&entity.id), event);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for MemoryStore {
    fn create_entity(&self, fields: EntityFields) -> Result<Entity> {
        let id = EntityId(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        let entity = Entity {
            id: id.clone(),
            name: fields.name,
        };

        self.entities.write().insert(id, entity.clone());
        debug!(entity = %entity.id, "Entity created");
        Ok(entity)
    }

    fn update_entity(&self, id: &EntityId, fields: EntityFields) -> Result<Entity> {
        let entity = {
            let mut entities = self.entities.write();
            let entity = entities
                .get_mut(id)
                .ok_or_else(|| RelayError::EntityNotFound(id.clone()))?;
            if let Some(name) = fields.name {
                entity.name = Some(name);
            }
            entity.clone()
        };
        debug!(entity = %id, "Entity updated");

        // Lock released: handlers may read the store.
        self.publish_change(&entity)?;
        Ok(entity)
    }

    fn get_entity(&self, id: &EntityId) -> Option<Entity> {
        self.entities.read().get(id).cloned()
    }
}
