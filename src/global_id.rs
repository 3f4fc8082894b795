//! Opaque global identifiers.
//!
//! A global id is the hex encoding of `"<Type>:<id>"`, so clients can pass
//! ids around without knowing which type they belong to.
//!
//! Relay's reference `toGlobalId` uses base64 instead, so these ids do not
//! interoperate with clients that decode ids themselves.

use crate::error::{RelayError, Result};
use crate::types::EntityId;

/// Type name used for entity global ids.
pub const ENTITY_TYPE: &str = "Entity";

/// A decoded global id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedGlobalId {
    pub type_name: String,
    pub id: String,
}

/// Encode a type name and concrete id.
pub fn to_global_id(type_name: &str, id: &str) -> String {
    hex::encode(format!("{}:{}", type_name, id))
}

/// Decode a global id produced by [`to_global_id`].
pub fn from_global_id(global_id: &str) -> Result<ResolvedGlobalId> {
    let bytes = hex::decode(global_id)?;
    let decoded = String::from_utf8(bytes)
        .map_err(|_| RelayError::InvalidGlobalId(global_id.to_string()))?;

    match decoded.split_once(':') {
        Some((type_name, id)) if !type_name.is_empty() && !id.is_empty() => Ok(ResolvedGlobalId {
            type_name: type_name.to_string(),
            id: id.to_string(),
        }),
        _ => Err(RelayError::InvalidGlobalId(global_id.to_string())),
    }
}

/// Decode a global id that must name an entity.
pub fn entity_id(global_id: &str) -> Result<EntityId> {
    let resolved = from_global_id(global_id)?;
    if resolved.type_name != ENTITY_TYPE {
        return Err(RelayError::InvalidGlobalId(format!(
            "{} is a {}, expected {}",
            global_id, resolved.type_name, ENTITY_TYPE
        )));
    }
    Ok(EntityId(resolved.id))
}
