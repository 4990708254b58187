//! Task types, the spaced-repetition unit of the Recollect store.
//!
//! A [`Task`] is never stored as a source of truth: it is a projection of the
//! events addressed to its ID, rebuilt by [`crate::reducer`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::{AttachmentId, ComponentId, EntityId};

/// Component ID used by content types that have no sub-components.
pub const MAIN_COMPONENT_ID: &str = "main";

// ─── Content ─────────────────────────────────────────────────────────────────

/// A piece of displayable text plus the attachments it references.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskContentField {
  pub text:        String,
  #[serde(default)]
  pub attachments: Vec<AttachmentId>,
}

impl TaskContentField {
  pub fn text(text: impl Into<String>) -> Self {
    Self { text: text.into(), attachments: Vec::new() }
  }
}

/// One deleted span of a cloze body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClozeRange {
  pub start_index: u32,
  pub length:      u32,
  pub hint:        Option<String>,
}

/// A cloze deletion; each one is scheduled as its own component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClozeComponent {
  pub order:  u32,
  pub ranges: Vec<ClozeRange>,
}

/// What the user sees when reviewing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskContent {
  Qa {
    body:   TaskContentField,
    answer: TaskContentField,
  },
  Cloze {
    body:       TaskContentField,
    components: BTreeMap<ComponentId, ClozeComponent>,
  },
  Plain {
    body: TaskContentField,
  },
}

impl TaskContent {
  /// The component IDs this content implies. Content types without
  /// sub-components have the single [`MAIN_COMPONENT_ID`].
  pub fn component_ids(&self) -> Vec<ComponentId> {
    match self {
      Self::Cloze { components, .. } => components.keys().cloned().collect(),
      Self::Qa { .. } | Self::Plain { .. } => {
        vec![ComponentId::from(MAIN_COMPONENT_ID)]
      }
    }
  }

  /// Every attachment referenced from any field of the content.
  pub fn attachment_ids(&self) -> Vec<&AttachmentId> {
    let fields: Vec<&TaskContentField> = match self {
      Self::Qa { body, answer } => vec![body, answer],
      Self::Cloze { body, .. } | Self::Plain { body } => vec![body],
    };
    fields.into_iter().flat_map(|f| f.attachments.iter()).collect()
  }
}

// ─── Spec ────────────────────────────────────────────────────────────────────

/// Scheduling behaviour family. Only memory tasks exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSpecType {
  #[default]
  Memory,
}

/// Content plus the behaviour descriptor for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
  #[serde(rename = "type")]
  pub spec_type: TaskSpecType,
  pub content:   TaskContent,
}

impl TaskSpec {
  pub fn memory(content: TaskContent) -> Self {
    Self { spec_type: TaskSpecType::Memory, content }
  }
}

// ─── Provenance ──────────────────────────────────────────────────────────────

/// Where a task came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProvenance {
  /// Source identifier shared by tasks from the same origin; a URL or any
  /// stable string.
  pub identifier:         String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url:                Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title:              Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub container_title:    Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub color_palette_name: Option<String>,
}

// ─── State ───────────────────────────────────────────────────────────────────

/// Scheduling state of one task component. Due time and interval change
/// independently: rescheduling moves only the due time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskComponentState {
  pub created_at_timestamp_millis:      i64,
  pub last_repetition_timestamp_millis: Option<i64>,
  pub interval_millis:                  i64,
  pub due_timestamp_millis:             i64,
}

impl TaskComponentState {
  /// State of a component that has never been reviewed.
  pub fn new(created_at_timestamp_millis: i64) -> Self {
    Self {
      created_at_timestamp_millis,
      last_repetition_timestamp_millis: None,
      interval_millis: 0,
      due_timestamp_millis: created_at_timestamp_millis,
    }
  }
}

// ─── Task ────────────────────────────────────────────────────────────────────

/// The projected state of a task.
///
/// `component_states` holds exactly the components implied by `spec` at
/// ingest time; a later `TaskUpdateSpec` does not add or remove components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id:                          EntityId,
  pub created_at_timestamp_millis: i64,
  pub spec:                        TaskSpec,
  pub provenance:                  Option<TaskProvenance>,
  pub component_states:            BTreeMap<ComponentId, TaskComponentState>,
  pub is_deleted:                  bool,
  #[serde(default)]
  pub metadata:                    BTreeMap<String, String>,
}

impl Task {
  /// The earliest due time across all components, if any.
  pub fn next_due_timestamp_millis(&self) -> Option<i64> {
    self
      .component_states
      .values()
      .map(|s| s.due_timestamp_millis)
      .min()
  }
}
