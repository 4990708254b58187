//! [`MemoryBackend`]: an in-process implementation of [`StorageBackend`].

use std::{
  collections::{BTreeSet, HashMap},
  ops::Bound,
  sync::Arc,
};

use recollect_core::{
  backend::{
    Comparison, DuePredicate, EntityQuery, EntityRecord, EventHistory, EventQuery,
    SCHEMA_VERSION_KEY, StorageBackend, dedup_batch,
  },
  entity::derived_index_rows,
  event::Event,
  id::{ComponentId, EntityId, EventId},
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{Error, Result};

/// Version reported by [`StorageBackend::schema_version`]. The in-memory
/// layout is rebuilt on every start, so it never needs migrating.
pub const SCHEMA_VERSION: u32 = 1;

// ─── State ───────────────────────────────────────────────────────────────────

/// Everything the store holds. Positions in `log` and `rows` give the log
/// order and the entity insertion order.
#[derive(Default)]
struct State {
  log:        Vec<Event>,
  event_pos:  HashMap<EventId, usize>,
  by_entity:  HashMap<EntityId, Vec<usize>>,
  rows:       Vec<EntityRecord>,
  entity_pos: HashMap<EntityId, usize>,
  // (due timestamp, entity row, component)
  due:        BTreeSet<(i64, usize, ComponentId)>,
  task_due:   HashMap<EntityId, Vec<(ComponentId, i64)>>,
  metadata:   HashMap<String, String>,
}

impl State {
  fn write_record(&mut self, record: EntityRecord) {
    let id = record.id().clone();
    let row = match self.entity_pos.get(&id) {
      Some(&row) => row,
      None => {
        self.entity_pos.insert(id.clone(), self.rows.len());
        self.rows.push(record.clone());
        self.rows.len() - 1
      }
    };

    for (component_id, due) in self.task_due.remove(&id).unwrap_or_default() {
      self.due.remove(&(due, row, component_id));
    }
    let index_rows: Vec<_> = derived_index_rows(&record.entity)
      .into_iter()
      .map(|r| (r.component_id, r.due_timestamp_millis))
      .collect();
    for (component_id, due) in &index_rows {
      self.due.insert((*due, row, component_id.clone()));
    }
    if !index_rows.is_empty() {
      self.task_due.insert(id, index_rows);
    }

    self.rows[row] = record;
  }

  fn append(&mut self, event: Event) {
    let pos = self.log.len();
    self.event_pos.insert(event.id.clone(), pos);
    self.by_entity.entry(event.entity_id.clone()).or_default().push(pos);
    self.log.push(event);
  }

  /// Rows of tasks with a component matching `predicate`.
  fn matching_task_rows(&self, predicate: DuePredicate) -> BTreeSet<usize> {
    let Some(bounds) = due_bounds(predicate) else {
      return BTreeSet::new();
    };
    self.due.range(bounds).map(|(_, row, _)| *row).collect()
  }
}

/// Key in the due index: (due timestamp, entity row, component).
pub(crate) type DueKey = (i64, usize, ComponentId);

/// The first key any entry due at `ts` can have.
fn first_key_at(ts: i64) -> DueKey { (ts, 0, ComponentId::from("")) }

/// Key bounds of the index entries matching `predicate`, or `None` when
/// nothing can match.
pub(crate) fn due_bounds(
  predicate: DuePredicate,
) -> Option<(Bound<DueKey>, Bound<DueKey>)> {
  let ts = predicate.timestamp_millis;
  // Everything due at or before `ts` sorts below this bound.
  let past = || match ts.checked_add(1) {
    Some(next) => Bound::Excluded(first_key_at(next)),
    None => Bound::Unbounded,
  };
  let bounds = match predicate.comparison {
    Comparison::Lt => (Bound::Unbounded, Bound::Excluded(first_key_at(ts))),
    Comparison::Le => (Bound::Unbounded, past()),
    Comparison::Eq => (Bound::Included(first_key_at(ts)), past()),
    Comparison::Gt => {
      (Bound::Included(first_key_at(ts.checked_add(1)?)), Bound::Unbounded)
    }
    Comparison::Ge => (Bound::Included(first_key_at(ts)), Bound::Unbounded),
  };
  Some(bounds)
}

impl EventHistory for State {
  fn events_for_entity(
    &self,
    entity_id: &EntityId,
  ) -> recollect_core::Result<Vec<Event>> {
    Ok(
      self
        .by_entity
        .get(entity_id)
        .map(|positions| positions.iter().map(|&p| self.log[p].clone()).collect())
        .unwrap_or_default(),
    )
  }
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// A Recollect store held entirely in memory.
///
/// Cloning is cheap and clones share state. Writers serialize on one lock,
/// held for the whole of [`StorageBackend::update_entities`].
#[derive(Clone)]
pub struct MemoryBackend {
  state: Arc<Mutex<State>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    let mut state = State::default();
    state
      .metadata
      .insert(SCHEMA_VERSION_KEY.to_owned(), SCHEMA_VERSION.to_string());
    Self { state: Arc::new(Mutex::new(state)) }
  }
}

impl Default for MemoryBackend {
  fn default() -> Self { Self::new() }
}

// ─── StorageBackend impl ─────────────────────────────────────────────────────

impl StorageBackend for MemoryBackend {
  type Error = Error;

  async fn get_events(&self, ids: Vec<EventId>) -> Result<HashMap<EventId, Event>> {
    let state = self.state.lock().await;
    Ok(
      ids
        .into_iter()
        .filter_map(|id| {
          let pos = *state.event_pos.get(&id)?;
          Some((id, state.log[pos].clone()))
        })
        .collect(),
    )
  }

  async fn get_entities(
    &self,
    ids: Vec<EntityId>,
  ) -> Result<HashMap<EntityId, EntityRecord>> {
    let state = self.state.lock().await;
    Ok(
      ids
        .into_iter()
        .filter_map(|id| {
          let row = *state.entity_pos.get(&id)?;
          Some((id, state.rows[row].clone()))
        })
        .collect(),
    )
  }

  async fn update_entities<F>(&self, events: Vec<Event>, compute: F) -> Result<Vec<Event>>
  where
    F: FnOnce(
        &[Event],
        &HashMap<EntityId, EntityRecord>,
        &dyn EventHistory,
      ) -> recollect_core::Result<Vec<EntityRecord>>
      + Send
      + 'static,
  {
    let mut state = self.state.lock().await;

    let pending: Vec<Event> = dedup_batch(events)
      .into_iter()
      .filter(|e| !state.event_pos.contains_key(&e.id))
      .collect();
    if pending.is_empty() {
      return Ok(pending);
    }

    let records: HashMap<EntityId, EntityRecord> = pending
      .iter()
      .filter_map(|e| {
        let row = *state.entity_pos.get(&e.entity_id)?;
        Some((e.entity_id.clone(), state.rows[row].clone()))
      })
      .collect();
    let snapshots = compute(&pending, &records, &*state)?;

    for event in &pending {
      state.append(event.clone());
    }
    for record in snapshots {
      state.write_record(record);
    }

    debug!(appended = pending.len(), "memory batch committed");
    Ok(pending)
  }

  async fn list_events(&self, query: EventQuery) -> Result<Vec<Event>> {
    let state = self.state.lock().await;
    let start = match &query.after_id {
      None => 0,
      Some(id) => {
        state
          .event_pos
          .get(id)
          .ok_or_else(|| recollect_core::Error::UnknownCursor(id.to_string()))?
          + 1
      }
    };
    let limit = query.limit.unwrap_or(usize::MAX);

    let events = match &query.entity_id {
      Some(entity_id) => state
        .by_entity
        .get(entity_id)
        .map(|positions| {
          positions
            .iter()
            .filter(|&&p| p >= start)
            .take(limit)
            .map(|&p| state.log[p].clone())
            .collect()
        })
        .unwrap_or_default(),
      None => state.log.iter().skip(start).take(limit).cloned().collect(),
    };
    Ok(events)
  }

  async fn list_entities(&self, query: EntityQuery) -> Result<Vec<EntityRecord>> {
    let state = self.state.lock().await;
    let start = match &query.after_id {
      None => 0,
      Some(id) => {
        state
          .entity_pos
          .get(id)
          .ok_or_else(|| recollect_core::Error::UnknownCursor(id.to_string()))?
          + 1
      }
    };
    let limit = query.limit.unwrap_or(usize::MAX);

    let records = match query.predicate {
      Some(predicate) => state
        .matching_task_rows(predicate)
        .range(start..)
        .take(limit)
        .map(|&row| state.rows[row].clone())
        .collect(),
      None => state
        .rows
        .iter()
        .skip(start)
        .filter(|r| r.entity_type() == query.entity_type)
        .take(limit)
        .cloned()
        .collect(),
    };
    Ok(records)
  }

  async fn get_metadata_values(
    &self,
    keys: Vec<String>,
  ) -> Result<HashMap<String, String>> {
    let state = self.state.lock().await;
    Ok(
      keys
        .into_iter()
        .filter_map(|key| {
          let value = state.metadata.get(&key)?.clone();
          Some((key, value))
        })
        .collect(),
    )
  }

  async fn set_metadata_values(
    &self,
    values: HashMap<String, Option<String>>,
  ) -> Result<()> {
    let mut state = self.state.lock().await;
    for (key, value) in values {
      match value {
        Some(value) => {
          state.metadata.insert(key, value);
        }
        None => {
          state.metadata.remove(&key);
        }
      }
    }
    Ok(())
  }

  async fn schema_version(&self) -> Result<u32> {
    let state = self.state.lock().await;
    let value = state.metadata.get(SCHEMA_VERSION_KEY);
    value
      .and_then(|v| v.parse().ok())
      .ok_or_else(|| {
        recollect_core::Error::Migration(format!("schema version {value:?}")).into()
      })
  }
}
