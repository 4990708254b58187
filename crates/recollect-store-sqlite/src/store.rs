//! [`SqliteBackend`], the SQLite implementation of [`StorageBackend`].

use std::{
  collections::{BTreeSet, HashMap},
  path::Path,
};

use recollect_core::{
  backend::{
    EntityQuery, EntityRecord, EventHistory, EventQuery, SCHEMA_VERSION_KEY,
    StorageBackend, dedup_batch,
  },
  entity::derived_index_rows,
  event::Event,
  id::{EntityId, EventId},
};
use rusqlite::OptionalExtension as _;
use tracing::debug;

use crate::{
  Error, Result,
  encode::{RawEntity, TxHistory, decode_event, encode_entity, encode_event},
  error::core,
  schema::{self, LATEST_SCHEMA_VERSION, PRAGMAS},
};

const ENTITY_COLUMNS: &str =
  "e.id, e.entity_type, e.last_event_id, e.last_event_timestamp_millis, e.data";

/// SQLite `LIMIT` for an optional limit; negative means unbounded.
fn sql_limit(limit: Option<usize>) -> i64 {
  limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// A Recollect store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteBackend {
  conn: tokio_rusqlite::Connection,
}

impl SqliteBackend {
  /// Open (or create) a store at `path`, migrating it to the latest schema.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with_schema_version(path, LATEST_SCHEMA_VERSION).await
  }

  /// Open a store and migrate it only as far as `version`. Tests use this to
  /// exercise later migrations against older layouts.
  pub async fn open_with_schema_version(
    path: impl AsRef<Path>,
    version: u32,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, version).await
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, LATEST_SCHEMA_VERSION).await
  }

  async fn init(conn: tokio_rusqlite::Connection, version: u32) -> Result<Self> {
    if version == 0 {
      return Err(
        recollect_core::Error::Migration("schema version must be at least 1".into())
          .into(),
      );
    }
    conn
      .call(move |conn| {
        conn.execute_batch(PRAGMAS)?;
        schema::migrate(conn, version)
      })
      .await?;
    Ok(Self { conn })
  }

  /// Run `sql` through `EXPLAIN QUERY PLAN` and return the plan details.
  #[cfg(test)]
  pub(crate) async fn explain(&self, sql: String, due: i64) -> Result<Vec<String>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}"))?;
          let rows = stmt
            .query_map(rusqlite::params![due, 0i64, -1i64], |r| r.get::<_, String>(3))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  /// Execute raw SQL. Tests use this to fabricate legacy layouts.
  #[cfg(test)]
  pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

/// The due-predicate listing query. Forcing the due index makes SQLite fail
/// to prepare the statement rather than silently scan every row.
pub(crate) fn due_query_sql(comparison: &str) -> String {
  format!(
    "SELECT DISTINCT e.row_id, {ENTITY_COLUMNS}
     FROM derived_task_components AS dt
       INDEXED BY derived_task_components_due
     CROSS JOIN entities AS e
     WHERE dt.due_timestamp_millis {comparison} ?1
       AND e.id = dt.task_id
       AND e.row_id > ?2
     ORDER BY e.row_id
     LIMIT ?3"
  )
}

// ─── Transaction helpers ─────────────────────────────────────────────────────

fn load_records(
  conn: &rusqlite::Connection,
  ids: impl IntoIterator<Item = String>,
) -> tokio_rusqlite::Result<HashMap<EntityId, EntityRecord>> {
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT {ENTITY_COLUMNS} FROM entities AS e WHERE e.id = ?1"
  ))?;
  let mut records = HashMap::new();
  for id in ids {
    let raw = stmt.query_row([&id], RawEntity::from_row).optional()?;
    if let Some(raw) = raw {
      let record = raw.into_record().map_err(core)?;
      records.insert(EntityId::from(id), record);
    }
  }
  Ok(records)
}

fn write_record(
  conn: &rusqlite::Connection,
  record: &EntityRecord,
) -> tokio_rusqlite::Result<()> {
  let id = record.id().as_str();
  let data = encode_entity(&record.entity).map_err(core)?;
  // Upsert rather than REPLACE so the row keeps its row_id.
  conn.prepare_cached(
    "INSERT INTO entities
       (id, entity_type, last_event_id, last_event_timestamp_millis, data)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(id) DO UPDATE SET
       entity_type                 = excluded.entity_type,
       last_event_id               = excluded.last_event_id,
       last_event_timestamp_millis = excluded.last_event_timestamp_millis,
       data                        = excluded.data",
  )?
  .execute(rusqlite::params![
    id,
    record.entity_type().as_ref(),
    record.last_event_id.as_str(),
    record.last_event_timestamp_millis,
    data,
  ])?;

  conn
    .prepare_cached("DELETE FROM derived_task_components WHERE task_id = ?1")?
    .execute([id])?;
  let mut insert = conn.prepare_cached(
    "INSERT INTO derived_task_components (task_id, component_id, due_timestamp_millis)
     VALUES (?1, ?2, ?3)",
  )?;
  for row in derived_index_rows(&record.entity) {
    insert.execute(rusqlite::params![
      row.task_id.as_str(),
      row.component_id.as_str(),
      row.due_timestamp_millis,
    ])?;
  }
  Ok(())
}

fn event_position(
  conn: &rusqlite::Connection,
  id: &str,
) -> tokio_rusqlite::Result<Option<i64>> {
  Ok(
    conn
      .query_row(
        "SELECT sequence_number FROM events WHERE id = ?1",
        [id],
        |r| r.get(0),
      )
      .optional()?,
  )
}

fn entity_position(
  conn: &rusqlite::Connection,
  id: &str,
) -> tokio_rusqlite::Result<Option<i64>> {
  Ok(
    conn
      .query_row("SELECT row_id FROM entities WHERE id = ?1", [id], |r| r.get(0))
      .optional()?,
  )
}

// ─── StorageBackend impl ─────────────────────────────────────────────────────

impl StorageBackend for SqliteBackend {
  type Error = Error;

  // ── Point lookups ─────────────────────────────────────────────────────────

  async fn get_events(&self, ids: Vec<EventId>) -> Result<HashMap<EventId, Event>> {
    let rows: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached("SELECT data FROM events WHERE id = ?1")?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in &ids {
          if let Some(data) =
            stmt.query_row([id.as_str()], |r| r.get(0)).optional()?
          {
            rows.push(data);
          }
        }
        Ok(rows)
      })
      .await?;

    rows
      .iter()
      .map(|data| {
        let event = decode_event(data)?;
        Ok((event.id.clone(), event))
      })
      .collect()
  }

  async fn get_entities(
    &self,
    ids: Vec<EntityId>,
  ) -> Result<HashMap<EntityId, EntityRecord>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          load_records(conn, ids.into_iter().map(EntityId::into_string))
        })
        .await?,
    )
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
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let mut pending = Vec::with_capacity(events.len());
        for event in events {
          if event_position(&tx, event.id.as_str())?.is_none() {
            pending.push(event);
          }
        }
        if pending.is_empty() {
          return Ok(pending);
        }

        let touched: BTreeSet<String> =
          pending.iter().map(|e| e.entity_id.as_str().to_owned()).collect();
        let records = load_records(&tx, touched)?;
        let snapshots =
          compute(&pending, &records, &TxHistory(&tx)).map_err(core)?;

        {
          let mut insert = tx.prepare_cached(
            "INSERT INTO events (id, entity_id, data) VALUES (?1, ?2, ?3)",
          )?;
          for event in &pending {
            let data = encode_event(event).map_err(core)?;
            insert.execute(rusqlite::params![
              event.id.as_str(),
              event.entity_id.as_str(),
              data,
            ])?;
          }
        }
        for record in &snapshots {
          write_record(&tx, record)?;
        }

        tx.commit()?;
        Ok(pending)
      })
      .await?;

    debug!(appended = appended.len(), "sqlite batch committed");
    Ok(appended)
  }

  // ── Scans ─────────────────────────────────────────────────────────────────

  async fn list_events(&self, query: EventQuery) -> Result<Vec<Event>> {
    let rows: Vec<String> = self
      .conn
      .call(move |conn| {
        let after = match &query.after_id {
          None => 0,
          Some(id) => event_position(conn, id.as_str())?.ok_or_else(|| {
            core(recollect_core::Error::UnknownCursor(id.to_string()))
          })?,
        };
        let limit = sql_limit(query.limit);

        let rows = match &query.entity_id {
          Some(entity_id) => conn
            .prepare_cached(
              "SELECT data FROM events
               WHERE entity_id = ?1 AND sequence_number > ?2
               ORDER BY sequence_number LIMIT ?3",
            )?
            .query_map(rusqlite::params![entity_id.as_str(), after, limit], |r| {
              r.get(0)
            })?
            .collect::<rusqlite::Result<Vec<String>>>()?,
          None => conn
            .prepare_cached(
              "SELECT data FROM events
               WHERE sequence_number > ?1
               ORDER BY sequence_number LIMIT ?2",
            )?
            .query_map(rusqlite::params![after, limit], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?,
        };
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .iter()
        .map(|data| decode_event(data))
        .collect::<recollect_core::Result<_>>()?,
    )
  }

  async fn list_entities(&self, query: EntityQuery) -> Result<Vec<EntityRecord>> {
    let raws: Vec<RawEntity> = self
      .conn
      .call(move |conn| {
        let after = match &query.after_id {
          None => 0,
          Some(id) => entity_position(conn, id.as_str())?.ok_or_else(|| {
            core(recollect_core::Error::UnknownCursor(id.to_string()))
          })?,
        };
        let limit = sql_limit(query.limit);
        // Skip the leading row_id column.
        let from_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<RawEntity> {
          Ok(RawEntity {
            id:                          row.get(1)?,
            entity_type:                 row.get(2)?,
            last_event_id:               row.get(3)?,
            last_event_timestamp_millis: row.get(4)?,
            data:                        row.get(5)?,
          })
        };

        let raws = match query.predicate {
          Some(predicate) => conn
            .prepare_cached(&due_query_sql(predicate.comparison.as_sql()))?
            .query_map(
              rusqlite::params![predicate.timestamp_millis, after, limit],
              from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?,
          None => conn
            .prepare_cached(&format!(
              "SELECT e.row_id, {ENTITY_COLUMNS} FROM entities AS e
               WHERE e.entity_type = ?1 AND e.row_id > ?2
               ORDER BY e.row_id LIMIT ?3"
            ))?
            .query_map(
              rusqlite::params![query.entity_type.as_ref(), after, limit],
              from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(raws)
      })
      .await?;

    Ok(
      raws
        .into_iter()
        .map(RawEntity::into_record)
        .collect::<recollect_core::Result<_>>()?,
    )
  }

  // ── Metadata ──────────────────────────────────────────────────────────────

  async fn get_metadata_values(
    &self,
    keys: Vec<String>,
  ) -> Result<HashMap<String, String>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt =
            conn.prepare_cached("SELECT value FROM metadata WHERE key = ?1")?;
          let mut values = HashMap::new();
          for key in keys {
            if let Some(value) =
              stmt.query_row([&key], |r| r.get::<_, String>(0)).optional()?
            {
              values.insert(key, value);
            }
          }
          Ok(values)
        })
        .await?,
    )
  }

  async fn set_metadata_values(
    &self,
    values: HashMap<String, Option<String>>,
  ) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for (key, value) in &values {
          match value {
            Some(value) => tx.execute(
              "INSERT INTO metadata (key, value) VALUES (?1, ?2)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value",
              rusqlite::params![key, value],
            )?,
            None => tx.execute("DELETE FROM metadata WHERE key = ?1", [key])?,
          };
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn schema_version(&self) -> Result<u32> {
    let value: Option<String> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT value FROM metadata WHERE key = ?1",
              [SCHEMA_VERSION_KEY],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    value
      .as_deref()
      .and_then(|v| v.parse().ok())
      .ok_or_else(|| Error::Corrupt(format!("schema version {value:?}")))
  }
}
