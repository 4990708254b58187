//! The `StorageBackend` trait and supporting query types.
//!
//! The trait is implemented by storage engines (`recollect-store-sqlite`,
//! `recollect-store-redb`, `recollect-store-memory`). The
//! [`Database`](crate::database::Database) façade and the sync engine depend
//! on this abstraction, not on any concrete engine.

use std::{
  collections::{HashMap, HashSet},
  future::Future,
};

use crate::{
  entity::{Entity, EntityType},
  event::Event,
  id::{EntityId, EventId},
};

/// Metadata key under which every engine persists its schema version.
pub const SCHEMA_VERSION_KEY: &str = "version";

// ─── Records ─────────────────────────────────────────────────────────────────

/// What a backend persists per entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
  pub entity:                      Entity,
  /// ID of the last event folded into `entity`.
  pub last_event_id:               EventId,
  /// Timestamp of that event; the façade compares incoming events against it
  /// to decide whether they apply on top of the snapshot.
  pub last_event_timestamp_millis: i64,
}

impl EntityRecord {
  pub fn id(&self) -> &EntityId { self.entity.id() }

  pub fn entity_type(&self) -> EntityType { self.entity.entity_type() }
}

/// Read access to already-stored events, from inside a write transaction.
pub trait EventHistory {
  /// Every stored event for `entity_id`, in log order. Events pending in the
  /// current batch are not included.
  fn events_for_entity(&self, entity_id: &EntityId) -> crate::Result<Vec<Event>>;
}

// ─── Query types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
  Lt,
  Le,
  Eq,
  Gt,
  Ge,
}

impl Comparison {
  pub fn matches(self, lhs: i64, rhs: i64) -> bool {
    match self {
      Self::Lt => lhs < rhs,
      Self::Le => lhs <= rhs,
      Self::Eq => lhs == rhs,
      Self::Gt => lhs > rhs,
      Self::Ge => lhs >= rhs,
    }
  }

  pub fn as_sql(self) -> &'static str {
    match self {
      Self::Lt => "<",
      Self::Le => "<=",
      Self::Eq => "=",
      Self::Gt => ">",
      Self::Ge => ">=",
    }
  }
}

/// Restricts a task query to tasks with at least one component whose due
/// time compares to `timestamp_millis` as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuePredicate {
  pub comparison:       Comparison,
  pub timestamp_millis: i64,
}

impl DuePredicate {
  /// Tasks with any component due at or before `timestamp_millis`.
  pub fn due_by(timestamp_millis: i64) -> Self {
    Self { comparison: Comparison::Le, timestamp_millis }
  }
}

/// Parameters for [`StorageBackend::list_events`].
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
  /// Restrict to events for one entity.
  pub entity_id: Option<EntityId>,
  /// Resume strictly after this event's position in the log.
  pub after_id:  Option<EventId>,
  pub limit:     Option<usize>,
}

/// Parameters for [`StorageBackend::list_entities`].
#[derive(Debug, Clone)]
pub struct EntityQuery {
  pub entity_type: EntityType,
  /// Only valid for [`EntityType::Task`]; resolved through the derived
  /// due-time index.
  pub predicate:   Option<DuePredicate>,
  /// Resume strictly after this entity's insertion position.
  pub after_id:    Option<EntityId>,
  pub limit:       Option<usize>,
}

impl EntityQuery {
  pub fn new(entity_type: EntityType) -> Self {
    Self { entity_type, predicate: None, after_id: None, limit: None }
  }

  pub fn tasks() -> Self { Self::new(EntityType::Task) }

  pub fn with_predicate(mut self, predicate: DuePredicate) -> Self {
    self.predicate = Some(predicate);
    self
  }

  pub fn after(mut self, after_id: EntityId) -> Self {
    self.after_id = Some(after_id);
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Recollect storage engine.
///
/// A backend holds three things: an append-only event log, one
/// [`EntityRecord`] per entity, and the derived due-time index computed by
/// [`crate::entity::derived_index_rows`]. All three change together, only
/// inside [`update_entities`](Self::update_entities).
///
/// All methods return `Send` futures so backends can be shared across tasks
/// in a multi-threaded tokio runtime.
pub trait StorageBackend: Send + Sync {
  type Error: std::error::Error + From<crate::Error> + Send + Sync + 'static;

  // ── Point lookups ─────────────────────────────────────────────────────

  /// Fetch events by ID. Unknown IDs are absent from the result.
  fn get_events(
    &self,
    ids: Vec<EventId>,
  ) -> impl Future<Output = Result<HashMap<EventId, Event>, Self::Error>> + Send + '_;

  /// Fetch entity records by ID. Unknown IDs are absent from the result.
  fn get_entities(
    &self,
    ids: Vec<EntityId>,
  ) -> impl Future<Output = Result<HashMap<EntityId, EntityRecord>, Self::Error>>
  + Send
  + '_;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Append `events` and recompute the records of every entity they touch,
  /// in one atomic transaction.
  ///
  /// Events whose ID is already in the log, and repeats within the batch,
  /// are dropped first; if nothing remains the call is a no-op. `compute`
  /// receives the remaining events in receipt order, the current records of
  /// the entities they touch, and the stored history of those entities. The
  /// records it returns replace the stored ones, and each touched entity's
  /// index rows are rewritten. If `compute` fails nothing is written.
  ///
  /// Returns the events actually appended.
  fn update_entities<F>(
    &self,
    events: Vec<Event>,
    compute: F,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + '_
  where
    F: FnOnce(
        &[Event],
        &HashMap<EntityId, EntityRecord>,
        &dyn EventHistory,
      ) -> crate::Result<Vec<EntityRecord>>
      + Send
      + 'static;

  // ── Scans ─────────────────────────────────────────────────────────────

  /// Events in log order. An `after_id` this store has never seen is
  /// [`crate::Error::UnknownCursor`].
  fn list_events(
    &self,
    query: EventQuery,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + '_;

  /// Entity records of one type in insertion order. An unknown `after_id` is
  /// [`crate::Error::UnknownCursor`].
  fn list_entities(
    &self,
    query: EntityQuery,
  ) -> impl Future<Output = Result<Vec<EntityRecord>, Self::Error>> + Send + '_;

  // ── Metadata ──────────────────────────────────────────────────────────

  fn get_metadata_values(
    &self,
    keys: Vec<String>,
  ) -> impl Future<Output = Result<HashMap<String, String>, Self::Error>> + Send + '_;

  /// Upsert metadata values; a `None` value deletes the key.
  fn set_metadata_values(
    &self,
    values: HashMap<String, Option<String>>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The schema version the store was migrated to when opened.
  fn schema_version(
    &self,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + '_;
}

// ─── Engine helpers ──────────────────────────────────────────────────────────

/// Drop repeats within a batch, keeping the first occurrence of each ID.
pub fn dedup_batch(events: Vec<Event>) -> Vec<Event> {
  let mut seen = HashSet::new();
  events
    .into_iter()
    .filter(|e| seen.insert(e.id.clone()))
    .collect()
}
