//! [`RedbBackend`], the redb implementation of [`StorageBackend`].

use std::{
  collections::{BTreeSet, HashMap},
  ops::Bound,
  path::{Path, PathBuf},
  sync::Arc,
};

use recollect_core::{
  backend::{
    Comparison, DuePredicate, EntityQuery, EntityRecord, EventHistory, EventQuery,
    SCHEMA_VERSION_KEY, StorageBackend, dedup_batch,
  },
  entity::derived_index_rows,
  event::Event,
  id::{EntityId, EventId},
};
use redb::{
  Database, ReadTransaction, ReadableTable as _, WriteTransaction,
  backends::InMemoryBackend,
};
use tracing::{debug, info};

use crate::{
  Error, Result,
  encode::{TxHistory, decode_event, decode_record, encode_event, encode_record},
  tables::{
    self, DERIVED_BY_TASK, DERIVED_DUE, ENTITIES, ENTITIES_BY_TYPE, ENTITY_IDS,
    EVENT_IDS, EVENTS, EVENTS_BY_ENTITY, LATEST_SCHEMA_VERSION, METADATA,
  },
};

// ─── Backend ─────────────────────────────────────────────────────────────────

/// A Recollect store backed by a redb database.
///
/// Cloning is cheap: the database handle is reference-counted.
#[derive(Clone)]
pub struct RedbBackend {
  db: Arc<Database>,
}

impl RedbBackend {
  /// Open (or create) a store at `path`, migrating it to the latest schema.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with_schema_version(path, LATEST_SCHEMA_VERSION).await
  }

  /// Open a store and migrate it only as far as `version`.
  pub async fn open_with_schema_version(
    path: impl AsRef<Path>,
    version: u32,
  ) -> Result<Self> {
    let path: PathBuf = path.as_ref().to_owned();
    let db = tokio::task::spawn_blocking(move || {
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
          .map_err(|e| Error::Database(redb::StorageError::Io(e).into()))?;
      }
      let db = Database::create(&path)?;
      info!(path = %path.display(), "opened redb database");
      Ok::<_, Error>(db)
    })
    .await??;
    Self::init(db, version).await
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
    Self::init(db, LATEST_SCHEMA_VERSION).await
  }

  async fn init(db: Database, version: u32) -> Result<Self> {
    if version == 0 {
      return Err(
        recollect_core::Error::Migration("schema version must be at least 1".into())
          .into(),
      );
    }
    let backend = Self { db: Arc::new(db) };
    backend.blocking(move |db| tables::migrate(db, version)).await?;
    Ok(backend)
  }

  /// Run `f` against the database on the blocking pool.
  async fn blocking<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
  {
    let db = Arc::clone(&self.db);
    tokio::task::spawn_blocking(move || f(&db)).await?
  }

  pub(crate) async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&ReadTransaction) -> Result<T> + Send + 'static,
  {
    self.blocking(move |db| f(&db.begin_read()?)).await
  }

  /// Apply a raw mutation. Tests use this to fabricate stale layouts.
  #[cfg(test)]
  pub(crate) async fn write_raw<F>(&self, f: F) -> Result<()>
  where
    F: FnOnce(&WriteTransaction) -> Result<()> + Send + 'static,
  {
    self
      .blocking(move |db| {
        let tx = db.begin_write()?;
        f(&tx)?;
        tx.commit()?;
        Ok(())
      })
      .await
  }
}

// ─── Transaction helpers ─────────────────────────────────────────────────────

fn load_records<'a>(
  tx: &WriteTransaction,
  ids: impl IntoIterator<Item = &'a str>,
) -> Result<HashMap<EntityId, EntityRecord>> {
  let entity_ids = tx.open_table(ENTITY_IDS)?;
  let entities = tx.open_table(ENTITIES)?;
  let mut records = HashMap::new();
  for id in ids {
    let Some(row) = entity_ids.get(id)?.map(|g| g.value()) else {
      continue;
    };
    let data = entities
      .get(row)?
      .ok_or_else(|| Error::Corrupt(format!("entity row {row} for {id} is missing")))?;
    records.insert(EntityId::from(id), decode_record(data.value())?);
  }
  Ok(records)
}

fn append_events(tx: &WriteTransaction, events: &[Event]) -> Result<()> {
  let mut log = tx.open_table(EVENTS)?;
  let mut ids = tx.open_table(EVENT_IDS)?;
  let mut by_entity = tx.open_table(EVENTS_BY_ENTITY)?;

  let mut next = log.last()?.map_or(1, |(k, _)| k.value() + 1);
  for event in events {
    let data = encode_event(event)?;
    log.insert(next, data.as_str())?;
    ids.insert(event.id.as_str(), next)?;
    by_entity.insert((event.entity_id.as_str(), next), ())?;
    next += 1;
  }
  Ok(())
}

fn write_record(tx: &WriteTransaction, record: &EntityRecord) -> Result<()> {
  let id = record.id().as_str();
  let data = encode_record(record)?;

  let row = {
    let mut entity_ids = tx.open_table(ENTITY_IDS)?;
    let mut entities = tx.open_table(ENTITIES)?;
    let existing = entity_ids.get(id)?.map(|g| g.value());
    let row = match existing {
      Some(row) => row,
      None => {
        let row = entities.last()?.map_or(1, |(k, _)| k.value() + 1);
        entity_ids.insert(id, row)?;
        tx.open_table(ENTITIES_BY_TYPE)?
          .insert((record.entity_type().as_ref(), row), ())?;
        row
      }
    };
    entities.insert(row, data.as_str())?;
    row
  };

  let mut due = tx.open_table(DERIVED_DUE)?;
  let mut by_task = tx.open_table(DERIVED_BY_TASK)?;

  let mut stale = Vec::new();
  for entry in by_task.range((id, "")..)? {
    let (key, value) = entry?;
    let (task_id, component_id) = key.value();
    if task_id != id {
      break;
    }
    stale.push((component_id.to_owned(), value.value()));
  }
  for (component_id, due_timestamp_millis) in &stale {
    by_task.remove((id, component_id.as_str()))?;
    due.remove((*due_timestamp_millis, row, component_id.as_str()))?;
  }

  for index_row in derived_index_rows(&record.entity) {
    let component_id = index_row.component_id.as_str();
    due.insert((index_row.due_timestamp_millis, row, component_id), ())?;
    by_task.insert((id, component_id), index_row.due_timestamp_millis)?;
  }
  Ok(())
}

/// Translate a due predicate into bounds on the due timestamp.
fn due_bounds(predicate: DuePredicate) -> (Bound<i64>, Bound<i64>) {
  let ts = predicate.timestamp_millis;
  match predicate.comparison {
    Comparison::Lt => (Bound::Unbounded, Bound::Excluded(ts)),
    Comparison::Le => (Bound::Unbounded, Bound::Included(ts)),
    Comparison::Eq => (Bound::Included(ts), Bound::Included(ts)),
    Comparison::Gt => (Bound::Excluded(ts), Bound::Unbounded),
    Comparison::Ge => (Bound::Included(ts), Bound::Unbounded),
  }
}

/// Entity rows of tasks with a component matching `predicate`, scanning
/// only the matching slice of the due index.
fn matching_task_rows(tx: &ReadTransaction, predicate: DuePredicate) -> Result<BTreeSet<u64>> {
  let due = tx.open_table(DERIVED_DUE)?;
  let (lower, upper) = due_bounds(predicate);
  let lower = match lower {
    Bound::Unbounded => Bound::Unbounded,
    Bound::Included(ts) => Bound::Included((ts, 0u64, "")),
    Bound::Excluded(ts) => match ts.checked_add(1) {
      Some(next) => Bound::Included((next, 0u64, "")),
      None => return Ok(BTreeSet::new()),
    },
  };
  let upper = match upper {
    Bound::Unbounded => Bound::Unbounded,
    Bound::Excluded(ts) => Bound::Excluded((ts, 0u64, "")),
    Bound::Included(ts) => match ts.checked_add(1) {
      Some(next) => Bound::Excluded((next, 0u64, "")),
      None => Bound::Unbounded,
    },
  };

  let mut rows = BTreeSet::new();
  for entry in due.range::<(i64, u64, &str)>((lower, upper))? {
    let (key, _) = entry?;
    rows.insert(key.value().1);
  }
  Ok(rows)
}

fn read_entity_row(tx: &ReadTransaction, row: u64) -> Result<EntityRecord> {
  let entities = tx.open_table(ENTITIES)?;
  let data = entities
    .get(row)?
    .ok_or_else(|| Error::Corrupt(format!("entity row {row} is missing")))?;
  Ok(decode_record(data.value())?)
}

// ─── StorageBackend impl ─────────────────────────────────────────────────────

impl StorageBackend for RedbBackend {
  type Error = Error;

  // ── Point lookups ─────────────────────────────────────────────────────────

  async fn get_events(&self, ids: Vec<EventId>) -> Result<HashMap<EventId, Event>> {
    self
      .read(move |tx| {
        let event_ids = tx.open_table(EVENT_IDS)?;
        let log = tx.open_table(EVENTS)?;
        let mut out = HashMap::new();
        for id in ids {
          let Some(sequence) = event_ids.get(id.as_str())?.map(|g| g.value()) else {
            continue;
          };
          if let Some(data) = log.get(sequence)? {
            out.insert(id, decode_event(data.value())?);
          }
        }
        Ok(out)
      })
      .await
  }

  async fn get_entities(
    &self,
    ids: Vec<EntityId>,
  ) -> Result<HashMap<EntityId, EntityRecord>> {
    self
      .read(move |tx| {
        let entity_ids = tx.open_table(ENTITY_IDS)?;
        let mut out = HashMap::new();
        for id in ids {
          if let Some(row) = entity_ids.get(id.as_str())?.map(|g| g.value()) {
            out.insert(id, read_entity_row(tx, row)?);
          }
        }
        Ok(out)
      })
      .await
  }

  // ── Writes ────────────────────────────────────────────────────────────────

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
    let events = dedup_batch(events);
    if events.is_empty() {
      return Ok(events);
    }

    let appended = self
      .blocking(move |db| {
        let tx = db.begin_write()?;

        let pending = {
          let ids = tx.open_table(EVENT_IDS)?;
          let mut pending = Vec::with_capacity(events.len());
          for event in events {
            if ids.get(event.id.as_str())?.is_none() {
              pending.push(event);
            }
          }
          pending
        };
        if pending.is_empty() {
          tx.abort()?;
          return Ok(pending);
        }

        let touched: BTreeSet<&str> =
          pending.iter().map(|e| e.entity_id.as_str()).collect();
        let records = load_records(&tx, touched)?;
        let snapshots = compute(&pending, &records, &TxHistory(&tx))?;

        append_events(&tx, &pending)?;
        for record in &snapshots {
          write_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(pending)
      })
      .await?;

    debug!(appended = appended.len(), "redb batch committed");
    Ok(appended)
  }

  // ── Scans ─────────────────────────────────────────────────────────────────

  async fn list_events(&self, query: EventQuery) -> Result<Vec<Event>> {
    self
      .read(move |tx| {
        let event_ids = tx.open_table(EVENT_IDS)?;
        let log = tx.open_table(EVENTS)?;

        let after = match &query.after_id {
          None => 0,
          Some(id) => event_ids.get(id.as_str())?.map(|g| g.value()).ok_or_else(
            || recollect_core::Error::UnknownCursor(id.to_string()),
          )?,
        };
        let limit = query.limit.unwrap_or(usize::MAX);

        let mut out = Vec::new();
        match &query.entity_id {
          Some(entity_id) => {
            let by_entity = tx.open_table(EVENTS_BY_ENTITY)?;
            let entity_id = entity_id.as_str();
            let range = (
              Bound::Excluded((entity_id, after)),
              Bound::Included((entity_id, u64::MAX)),
            );
            for entry in by_entity.range::<(&str, u64)>(range)?.take(limit) {
              let (key, _) = entry?;
              let (_, sequence) = key.value();
              let data = log.get(sequence)?.ok_or_else(|| {
                Error::Corrupt(format!("event {sequence} is missing"))
              })?;
              out.push(decode_event(data.value())?);
            }
          }
          None => {
            for entry in log.range((after + 1)..)?.take(limit) {
              let (_, data) = entry?;
              out.push(decode_event(data.value())?);
            }
          }
        }
        Ok(out)
      })
      .await
  }

  async fn list_entities(&self, query: EntityQuery) -> Result<Vec<EntityRecord>> {
    self
      .read(move |tx| {
        let after = match &query.after_id {
          None => 0,
          Some(id) => tx
            .open_table(ENTITY_IDS)?
            .get(id.as_str())?
            .map(|g| g.value())
            .ok_or_else(|| recollect_core::Error::UnknownCursor(id.to_string()))?,
        };
        let limit = query.limit.unwrap_or(usize::MAX);

        let rows: Vec<u64> = match query.predicate {
          Some(predicate) => matching_task_rows(tx, predicate)?
            .range((after + 1)..)
            .copied()
            .take(limit)
            .collect(),
          None => {
            let by_type = tx.open_table(ENTITIES_BY_TYPE)?;
            let entity_type = query.entity_type.as_ref();
            let range = (
              Bound::Excluded((entity_type, after)),
              Bound::Included((entity_type, u64::MAX)),
            );
            by_type
              .range::<(&str, u64)>(range)?
              .take(limit)
              .map(|entry| entry.map(|(key, _)| key.value().1))
              .collect::<std::result::Result<_, _>>()?
          }
        };

        rows.into_iter().map(|row| read_entity_row(tx, row)).collect()
      })
      .await
  }

  // ── Metadata ──────────────────────────────────────────────────────────────

  async fn get_metadata_values(
    &self,
    keys: Vec<String>,
  ) -> Result<HashMap<String, String>> {
    self
      .read(move |tx| {
        let metadata = tx.open_table(METADATA)?;
        let mut out = HashMap::new();
        for key in keys {
          if let Some(value) = metadata.get(key.as_str())?.map(|g| g.value().to_owned()) {
            out.insert(key, value);
          }
        }
        Ok(out)
      })
      .await
  }

  async fn set_metadata_values(
    &self,
    values: HashMap<String, Option<String>>,
  ) -> Result<()> {
    self
      .blocking(move |db| {
        let tx = db.begin_write()?;
        {
          let mut metadata = tx.open_table(METADATA)?;
          for (key, value) in &values {
            match value {
              Some(value) => {
                metadata.insert(key.as_str(), value.as_str())?;
              }
              None => {
                metadata.remove(key.as_str())?;
              }
            }
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn schema_version(&self) -> Result<u32> {
    self
      .read(|tx| {
        let metadata = tx.open_table(METADATA)?;
        let value = metadata.get(SCHEMA_VERSION_KEY)?.map(|g| g.value().to_owned());
        value
          .as_deref()
          .and_then(|v| v.parse().ok())
          .ok_or_else(|| Error::Corrupt(format!("schema version {value:?}")))
      })
      .await
  }
}
