//! SQL schema and migrations for the Recollect SQLite store.
//!
//! The applied version lives in the `metadata` table under
//! [`SCHEMA_VERSION_KEY`]. On open, pending migrations run in ascending
//! order inside a single transaction.

use recollect_core::{
  backend::SCHEMA_VERSION_KEY,
  entity::derived_index_rows,
  migration::{self, Migration},
};
use rusqlite::{OptionalExtension as _, Transaction};
use tracing::info;

use crate::{encode::RawEntity, error::core};

/// Connection settings applied on every open, outside any transaction.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

const CREATE_TABLES: &str = "
-- Append-only. No UPDATE or DELETE is ever issued against this table.
CREATE TABLE events (
    sequence_number INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT    NOT NULL UNIQUE,
    entity_id       TEXT    NOT NULL,
    data            TEXT    NOT NULL  -- JSON-encoded Event
);
CREATE INDEX events_entity_id ON events(entity_id);

-- One row per entity; row_id fixes the entity's listing position.
CREATE TABLE entities (
    row_id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    id                          TEXT    NOT NULL UNIQUE,
    entity_type                 TEXT    NOT NULL,
    last_event_id               TEXT    NOT NULL,
    last_event_timestamp_millis INTEGER NOT NULL,
    data                        TEXT    NOT NULL  -- JSON-encoded Entity
);
CREATE INDEX entities_entity_type ON entities(entity_type, row_id);

-- Derived from entity snapshots; safe to drop and rebuild.
CREATE TABLE derived_task_components (
    task_id              TEXT    NOT NULL,
    component_id         TEXT    NOT NULL,
    due_timestamp_millis INTEGER NOT NULL,
    PRIMARY KEY (task_id, component_id)
);
CREATE INDEX derived_task_components_due
    ON derived_task_components(due_timestamp_millis);

CREATE TABLE metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

type MigrateFn = fn(&Transaction<'_>) -> tokio_rusqlite::Result<()>;

pub const MIGRATIONS: &[Migration<MigrateFn>] = &[
  Migration {
    version:     1,
    description: "create tables",
    apply:       create_tables,
  },
  Migration {
    version:     2,
    description: "rebuild derived task component index",
    apply:       rebuild_derived_index,
  },
];

pub const LATEST_SCHEMA_VERSION: u32 = 2;

fn create_tables(tx: &Transaction<'_>) -> tokio_rusqlite::Result<()> {
  tx.execute_batch(CREATE_TABLES)?;
  Ok(())
}

/// Recompute every index row from the stored snapshots. Deleted tasks
/// contribute none.
pub fn rebuild_derived_index(tx: &Transaction<'_>) -> tokio_rusqlite::Result<()> {
  tx.execute("DELETE FROM derived_task_components", [])?;

  let mut select = tx.prepare(
    "SELECT id, entity_type, last_event_id, last_event_timestamp_millis, data
     FROM entities ORDER BY row_id",
  )?;
  let raws = select
    .query_map([], RawEntity::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut insert = tx.prepare(
    "INSERT INTO derived_task_components (task_id, component_id, due_timestamp_millis)
     VALUES (?1, ?2, ?3)",
  )?;
  let mut count = 0usize;
  for raw in raws {
    let record = raw.into_record().map_err(core)?;
    for row in derived_index_rows(&record.entity) {
      insert.execute(rusqlite::params![
        row.task_id.as_str(),
        row.component_id.as_str(),
        row.due_timestamp_millis,
      ])?;
      count += 1;
    }
  }
  info!(rows = count, "rebuilt derived task component index");
  Ok(())
}

/// The stored schema version, or `None` for a fresh database.
fn stored_version(tx: &Transaction<'_>) -> tokio_rusqlite::Result<Option<u32>> {
  let has_metadata = tx
    .query_row(
      "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
      [],
      |_| Ok(()),
    )
    .optional()?
    .is_some();
  if !has_metadata {
    return Ok(None);
  }

  let value: Option<String> = tx
    .query_row(
      "SELECT value FROM metadata WHERE key = ?1",
      [SCHEMA_VERSION_KEY],
      |r| r.get(0),
    )
    .optional()?;
  let Some(value) = value else {
    return Err(core(recollect_core::Error::Migration(format!(
      "metadata table has no {SCHEMA_VERSION_KEY:?} entry"
    ))));
  };
  value
    .parse::<u32>()
    .map(Some)
    .map_err(|_| {
      core(recollect_core::Error::Migration(format!(
        "unparseable schema version {value:?}"
      )))
    })
}

/// Bring the database to `target`, returning the resulting version.
pub fn migrate(
  conn: &mut rusqlite::Connection,
  target: u32,
) -> tokio_rusqlite::Result<u32> {
  let tx = conn.transaction()?;
  let current = stored_version(&tx)?;
  let plan = migration::pending(MIGRATIONS, current, target).map_err(core)?;

  for step in plan {
    info!(version = step.version, description = step.description, "applying migration");
    (step.apply)(&tx)?;
  }

  tx.execute(
    "INSERT INTO metadata (key, value) VALUES (?1, ?2)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    rusqlite::params![SCHEMA_VERSION_KEY, target.to_string()],
  )?;
  tx.commit()?;
  Ok(target)
}
