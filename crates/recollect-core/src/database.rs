//! The engine-agnostic `Database` façade.
//!
//! [`Database`] owns one [`StorageBackend`] and runs the reducer inside the
//! backend's write transaction, so an event batch and the snapshots it
//! produces become visible together or not at all.

use std::collections::HashMap;

use tracing::debug;

use crate::{
  Error, Result,
  backend::{EntityQuery, EntityRecord, EventHistory, EventQuery, StorageBackend},
  entity::{Entity, EntityType},
  event::Event,
  id::{EntityId, EventId},
  reducer::{self, EventReducer},
  task::Task,
};

pub struct Database<B> {
  backend: B,
  reducer: EventReducer,
}

impl<B: StorageBackend> Database<B> {
  /// A façade over `backend` using the standard [`reducer::reduce`].
  pub fn new(backend: B) -> Self { Self::with_reducer(backend, reducer::reduce) }

  /// A façade with a substitute reducer. Used by tests that need to observe
  /// fold order.
  pub fn with_reducer(backend: B, reducer: EventReducer) -> Self {
    Self { backend, reducer }
  }

  pub fn backend(&self) -> &B { &self.backend }

  // ── Writes ────────────────────────────────────────────────────────────

  /// Validate and durably record `events`, updating every entity they touch.
  ///
  /// Events already in the store are ignored. Returns the events that were
  /// newly appended.
  pub async fn put_events(&self, events: Vec<Event>) -> Result<Vec<Event>, B::Error> {
    for event in &events {
      event.validate()?;
    }
    if events.is_empty() {
      return Ok(Vec::new());
    }

    let received = events.len();
    let reducer = self.reducer;
    let applied = self
      .backend
      .update_entities(events, move |pending, records, history| {
        compute_snapshots(reducer, pending, records, history)
      })
      .await?;

    debug!(received, applied = applied.len(), "put events");
    Ok(applied)
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub async fn get_events(
    &self,
    ids: Vec<EventId>,
  ) -> Result<HashMap<EventId, Event>, B::Error> {
    self.backend.get_events(ids).await
  }

  pub async fn get_entities(
    &self,
    ids: Vec<EntityId>,
  ) -> Result<HashMap<EntityId, Entity>, B::Error> {
    let records = self.backend.get_entities(ids).await?;
    Ok(records.into_iter().map(|(id, r)| (id, r.entity)).collect())
  }

  /// Convenience lookup of a single task. `None` if the ID is unknown or
  /// names a non-task entity.
  pub async fn get_task(&self, id: &EntityId) -> Result<Option<Task>, B::Error> {
    let mut entities = self.get_entities(vec![id.clone()]).await?;
    Ok(entities.remove(id).and_then(Entity::into_task))
  }

  pub async fn list_events(&self, query: EventQuery) -> Result<Vec<Event>, B::Error> {
    validate_limit(query.limit)?;
    self.backend.list_events(query).await
  }

  pub async fn list_entities(
    &self,
    query: EntityQuery,
  ) -> Result<Vec<Entity>, B::Error> {
    validate_limit(query.limit)?;
    if query.predicate.is_some() && query.entity_type != EntityType::Task {
      return Err(
        Error::InvalidQuery(format!(
          "due-time predicates only apply to tasks, not {}",
          query.entity_type
        ))
        .into(),
      );
    }
    let records = self.backend.list_entities(query).await?;
    Ok(records.into_iter().map(|r| r.entity).collect())
  }

  // ── Metadata ──────────────────────────────────────────────────────────

  pub async fn get_metadata_values(
    &self,
    keys: Vec<String>,
  ) -> Result<HashMap<String, String>, B::Error> {
    self.backend.get_metadata_values(keys).await
  }

  pub async fn set_metadata_values(
    &self,
    values: HashMap<String, Option<String>>,
  ) -> Result<(), B::Error> {
    self.backend.set_metadata_values(values).await
  }

  pub async fn schema_version(&self) -> Result<u32, B::Error> {
    self.backend.schema_version().await
  }
}

fn validate_limit(limit: Option<usize>) -> Result<()> {
  match limit {
    Some(0) => Err(Error::InvalidQuery("limit must be positive".into())),
    _ => Ok(()),
  }
}

// ─── Snapshot computation ────────────────────────────────────────────────────

/// Fold a batch of new events into entity records.
///
/// Events are grouped by entity (groups in order of first appearance) and
/// each group is ordered by timestamp, ties keeping receipt order. A group
/// whose earliest event is strictly later than the stored record's last
/// event applies on top of the stored snapshot. Otherwise the entity's whole
/// stored history is merged with the group and replayed from scratch, so an
/// event that arrives late still lands in timestamp order.
pub fn compute_snapshots(
  reducer: EventReducer,
  pending: &[Event],
  records: &HashMap<EntityId, EntityRecord>,
  history: &dyn EventHistory,
) -> Result<Vec<EntityRecord>> {
  let mut order: Vec<&EntityId> = Vec::new();
  let mut groups: HashMap<&EntityId, Vec<&Event>> = HashMap::new();
  for event in pending {
    groups
      .entry(&event.entity_id)
      .or_insert_with(|| {
        order.push(&event.entity_id);
        Vec::new()
      })
      .push(event);
  }

  let mut out = Vec::with_capacity(order.len());
  for entity_id in order {
    let Some(mut group) = groups.remove(entity_id) else {
      continue;
    };
    group.sort_by_key(|e| e.timestamp_millis);

    let record = match records.get(entity_id) {
      None => fold(reducer, None, group)?,
      Some(existing)
        if group[0].timestamp_millis > existing.last_event_timestamp_millis =>
      {
        fold(reducer, Some(existing.entity.clone()), group)?
      }
      Some(_) => {
        let stored = history.events_for_entity(entity_id)?;
        debug!(
          %entity_id,
          stored = stored.len(),
          pending = group.len(),
          "replaying entity history"
        );
        let mut merged: Vec<&Event> = stored.iter().chain(group).collect();
        merged.sort_by_key(|e| e.timestamp_millis);
        fold(reducer, None, merged)?
      }
    };
    out.push(record);
  }
  Ok(out)
}

fn fold(
  reducer: EventReducer,
  initial: Option<Entity>,
  events: Vec<&Event>,
) -> Result<EntityRecord> {
  let mut snapshot = initial;
  let mut last: Option<&Event> = None;
  for event in events {
    snapshot = Some(reducer(snapshot, event)?);
    last = Some(event);
  }
  match (snapshot, last) {
    (Some(entity), Some(last)) => Ok(EntityRecord {
      entity,
      last_event_id: last.id.clone(),
      last_event_timestamp_millis: last.timestamp_millis,
    }),
    _ => Err(Error::InvalidQuery("no events to fold".into())),
  }
}
