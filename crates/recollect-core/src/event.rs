//! Events: the only source of truth in a Recollect store.
//!
//! Events are immutable once appended. Every entity is the fold of its
//! events through [`crate::reducer::reduce`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  attachment::AttachmentMimeType,
  entity::EntityType,
  id::{ComponentId, EntityId, EventId},
  task::{TaskContent, TaskProvenance, TaskSpec},
};

/// How a review of one task component went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepetitionOutcome {
  Remembered,
  Forgotten,
  Skipped,
}

/// Type-specific payload of an [`Event`]. Serialized inline with the event
/// under a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
  TaskIngest {
    spec:       TaskSpec,
    provenance: Option<TaskProvenance>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata:   BTreeMap<String, String>,
  },
  TaskRepetition {
    #[serde(rename = "componentID")]
    component_id:      ComponentId,
    #[serde(rename = "reviewSessionID")]
    review_session_id: String,
    outcome:           RepetitionOutcome,
  },
  TaskReschedule {
    #[serde(rename = "componentID")]
    component_id:             ComponentId,
    #[serde(rename = "newDueTimestampMillis")]
    new_due_timestamp_millis: i64,
  },
  TaskUpdateDeleted {
    #[serde(rename = "isDeleted")]
    is_deleted: bool,
  },
  TaskUpdateSpec {
    spec: TaskSpec,
  },
  TaskUpdateProvenance {
    provenance: Option<TaskProvenance>,
  },
  TaskUpdateMetadata {
    metadata: BTreeMap<String, String>,
  },
  AttachmentIngest {
    #[serde(rename = "mimeType")]
    mime_type: AttachmentMimeType,
  },
}

impl EventPayload {
  /// The serialized `type` tag of this payload.
  pub fn event_type(&self) -> &'static str {
    match self {
      Self::TaskIngest { .. } => "taskIngest",
      Self::TaskRepetition { .. } => "taskRepetition",
      Self::TaskReschedule { .. } => "taskReschedule",
      Self::TaskUpdateDeleted { .. } => "taskUpdateDeleted",
      Self::TaskUpdateSpec { .. } => "taskUpdateSpec",
      Self::TaskUpdateProvenance { .. } => "taskUpdateProvenance",
      Self::TaskUpdateMetadata { .. } => "taskUpdateMetadata",
      Self::AttachmentIngest { .. } => "attachmentIngest",
    }
  }

  /// The kind of entity this payload targets.
  pub fn entity_type(&self) -> EntityType {
    match self {
      Self::AttachmentIngest { .. } => EntityType::AttachmentReference,
      _ => EntityType::Task,
    }
  }
}

/// Largest timestamp an event may carry: the top of the range every peer can
/// represent exactly as a double.
pub const MAX_TIMESTAMP_MILLIS: i64 = (1 << 53) - 1;

/// An immutable, append-only record of something that happened to an
/// entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
  pub id:               EventId,
  #[serde(rename = "entityID")]
  pub entity_id:        EntityId,
  #[serde(rename = "timestampMillis")]
  pub timestamp_millis: i64,
  #[serde(flatten)]
  pub payload:          EventPayload,
}

impl Event {
  /// A new event with a freshly generated ID.
  pub fn new(
    entity_id: EntityId,
    timestamp_millis: i64,
    payload: EventPayload,
  ) -> Self {
    Self { id: EventId::generate(), entity_id, timestamp_millis, payload }
  }

  pub fn event_type(&self) -> &'static str { self.payload.event_type() }

  /// Reject events no store should accept.
  ///
  /// Runs before anything is written, so a malformed event from a peer
  /// cannot poison the log.
  pub fn validate(&self) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidEvent {
      event_id: self.id.clone(),
      reason:   reason.to_owned(),
    };

    if self.id.as_str().is_empty() {
      return Err(invalid("empty event ID"));
    }
    if self.entity_id.as_str().is_empty() {
      return Err(invalid("empty entity ID"));
    }
    if self.timestamp_millis < 0 {
      return Err(invalid("negative timestamp"));
    }
    if self.timestamp_millis > MAX_TIMESTAMP_MILLIS {
      return Err(invalid("timestamp out of range"));
    }

    match &self.payload {
      EventPayload::TaskIngest { spec, .. }
      | EventPayload::TaskUpdateSpec { spec } => validate_content(&spec.content)
        .map_err(|reason| invalid(reason)),
      EventPayload::TaskRepetition { component_id, .. }
      | EventPayload::TaskReschedule { component_id, .. }
        if component_id.as_str().is_empty() =>
      {
        Err(invalid("empty component ID"))
      }
      EventPayload::TaskReschedule { new_due_timestamp_millis, .. }
        if !(0..=MAX_TIMESTAMP_MILLIS).contains(new_due_timestamp_millis) =>
      {
        Err(invalid("due timestamp out of range"))
      }
      EventPayload::AttachmentIngest { .. }
        if !is_sha256_hex(self.entity_id.as_str()) =>
      {
        Err(invalid("attachment entity ID is not a lowercase hex SHA-256"))
      }
      _ => Ok(()),
    }
  }
}

fn is_sha256_hex(id: &str) -> bool {
  id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn validate_content(content: &TaskContent) -> Result<(), &'static str> {
  match content {
    TaskContent::Cloze { components, .. } => {
      if components.is_empty() {
        Err("cloze content has no components")
      } else if components.keys().any(|k| k.as_str().is_empty()) {
        Err("empty component ID")
      } else {
        Ok(())
      }
    }
    TaskContent::Qa { .. } | TaskContent::Plain { .. } => Ok(()),
  }
}
