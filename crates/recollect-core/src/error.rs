//! Error types for `recollect-core`.

use thiserror::Error;

use crate::{
  entity::EntityType,
  id::{AttachmentId, ComponentId, EntityId, EventId},
};

#[derive(Debug, Error)]
pub enum Error {
  /// An event that updates an existing entity arrived before any snapshot
  /// for that entity exists.
  #[error(
    "can't apply an event of type {event_type} to entity {entity_id} without a prior snapshot"
  )]
  MissingSnapshot {
    event_type: &'static str,
    entity_id:  EntityId,
  },

  #[error("event {event_id} of type {event_type} can't apply to a {found} entity")]
  EntityTypeMismatch {
    event_id:   EventId,
    event_type: &'static str,
    found:      EntityType,
  },

  #[error("event {event_id} targets unknown component {component_id} of {entity_id}")]
  UnknownComponent {
    event_id:     EventId,
    entity_id:    EntityId,
    component_id: ComponentId,
  },

  #[error("invalid event {event_id}: {reason}")]
  InvalidEvent { event_id: EventId, reason: String },

  #[error("invalid query: {0}")]
  InvalidQuery(String),

  /// A pagination cursor named a record this store has never seen.
  #[error("unknown cursor: {0}")]
  UnknownCursor(String),

  #[error("attachment {claimed} failed integrity check (content hashes to {actual})")]
  AttachmentIntegrity {
    claimed: AttachmentId,
    actual:  AttachmentId,
  },

  #[error("unsupported attachment MIME type: {0:?}")]
  UnsupportedMimeType(String),

  #[error("migration error: {0}")]
  Migration(String),

  /// A storage engine failed while the reducer was reading event history
  /// inside a write transaction.
  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
