//! Entities (projections of event histories) and the rows derived from
//! them.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
  attachment::AttachmentMimeType,
  id::{ComponentId, EntityId},
  task::Task,
};

/// The discriminant stored alongside every entity record.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum EntityType {
  Task,
  AttachmentReference,
}

/// Records that an attachment with this ID is part of the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentReference {
  pub id:                          EntityId,
  pub created_at_timestamp_millis: i64,
  pub mime_type:                   AttachmentMimeType,
}

/// Any entity the reducer can produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Entity {
  Task(Task),
  AttachmentReference(AttachmentReference),
}

impl Entity {
  pub fn id(&self) -> &EntityId {
    match self {
      Self::Task(t) => &t.id,
      Self::AttachmentReference(a) => &a.id,
    }
  }

  pub fn entity_type(&self) -> EntityType {
    match self {
      Self::Task(_) => EntityType::Task,
      Self::AttachmentReference(_) => EntityType::AttachmentReference,
    }
  }

  pub fn as_task(&self) -> Option<&Task> {
    match self {
      Self::Task(t) => Some(t),
      Self::AttachmentReference(_) => None,
    }
  }

  pub fn into_task(self) -> Option<Task> {
    match self {
      Self::Task(t) => Some(t),
      Self::AttachmentReference(_) => None,
    }
  }
}

// ─── Derived index ───────────────────────────────────────────────────────────

/// One row of the due-time index: a component of a non-deleted task.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DerivedIndexRow {
  pub task_id:              EntityId,
  pub component_id:         ComponentId,
  pub due_timestamp_millis: i64,
}

/// The index rows an entity snapshot contributes.
///
/// This is the only definition of the index: every engine rewrites a touched
/// entity's rows from this function, and migrations rebuild the whole index
/// by calling it over the stored snapshots.
pub fn derived_index_rows(entity: &Entity) -> Vec<DerivedIndexRow> {
  match entity {
    Entity::Task(task) if !task.is_deleted => task
      .component_states
      .iter()
      .map(|(component_id, state)| DerivedIndexRow {
        task_id:              task.id.clone(),
        component_id:         component_id.clone(),
        due_timestamp_millis: state.due_timestamp_millis,
      })
      .collect(),
    Entity::Task(_) | Entity::AttachmentReference(_) => Vec::new(),
  }
}
