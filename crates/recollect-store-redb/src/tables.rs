//! redb table definitions and migrations.
//!
//! Sequence numbers and entity row numbers start at 1 and only grow; they
//! give the log order and the entity listing order.

use recollect_core::{
  backend::SCHEMA_VERSION_KEY,
  entity::derived_index_rows,
  migration::{self, Migration},
};
use redb::{ReadableTable as _, TableDefinition, TableHandle as _, WriteTransaction};
use tracing::info;

use crate::{Error, Result, encode::decode_record};

// Key: sequence number, Value: JSON-encoded Event
pub const EVENTS: TableDefinition<u64, &str> = TableDefinition::new("events");

// Key: event ID, Value: sequence number
pub const EVENT_IDS: TableDefinition<&str, u64> = TableDefinition::new("event_ids");

// Key: (entity ID, sequence number)
pub const EVENTS_BY_ENTITY: TableDefinition<(&str, u64), ()> =
  TableDefinition::new("events_by_entity");

// Key: entity row number, Value: JSON-encoded entity record
pub const ENTITIES: TableDefinition<u64, &str> = TableDefinition::new("entities");

// Key: entity ID, Value: entity row number
pub const ENTITY_IDS: TableDefinition<&str, u64> = TableDefinition::new("entity_ids");

// Key: (entity type, entity row number)
pub const ENTITIES_BY_TYPE: TableDefinition<(&str, u64), ()> =
  TableDefinition::new("entities_by_type");

// Key: (due timestamp, task row number, component ID)
pub const DERIVED_DUE: TableDefinition<(i64, u64, &str), ()> =
  TableDefinition::new("derived_task_components_due");

// Key: (task ID, component ID), Value: due timestamp
pub const DERIVED_BY_TASK: TableDefinition<(&str, &str), i64> =
  TableDefinition::new("derived_task_components");

// Key: metadata key, Value: metadata value
pub const METADATA: TableDefinition<&str, &str> = TableDefinition::new("metadata");

type MigrateFn = fn(&WriteTransaction) -> Result<()>;

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

fn create_tables(tx: &WriteTransaction) -> Result<()> {
  tx.open_table(EVENTS)?;
  tx.open_table(EVENT_IDS)?;
  tx.open_table(EVENTS_BY_ENTITY)?;
  tx.open_table(ENTITIES)?;
  tx.open_table(ENTITY_IDS)?;
  tx.open_table(ENTITIES_BY_TYPE)?;
  tx.open_table(DERIVED_DUE)?;
  tx.open_table(DERIVED_BY_TASK)?;
  tx.open_table(METADATA)?;
  Ok(())
}

/// Drop both index tables and refill them from the stored snapshots.
/// Deleted tasks contribute no rows.
pub fn rebuild_derived_index(tx: &WriteTransaction) -> Result<()> {
  tx.delete_table(DERIVED_DUE)?;
  tx.delete_table(DERIVED_BY_TASK)?;

  let entities = tx.open_table(ENTITIES)?;
  let mut due = tx.open_table(DERIVED_DUE)?;
  let mut by_task = tx.open_table(DERIVED_BY_TASK)?;

  let mut count = 0usize;
  for entry in entities.iter()? {
    let (row, data) = entry?;
    let record = decode_record(data.value())?;
    for index_row in derived_index_rows(&record.entity) {
      let task_id = index_row.task_id.as_str();
      let component_id = index_row.component_id.as_str();
      due.insert((index_row.due_timestamp_millis, row.value(), component_id), ())?;
      by_task.insert((task_id, component_id), index_row.due_timestamp_millis)?;
      count += 1;
    }
  }
  info!(
    rows = count,
    table = DERIVED_DUE.name(),
    "rebuilt derived task component index"
  );
  Ok(())
}

/// Bring the database to `target` inside one write transaction.
pub fn migrate(db: &redb::Database, target: u32) -> Result<u32> {
  let tx = db.begin_write()?;
  let current = {
    let metadata = tx.open_table(METADATA)?;
    let stored = metadata.get(SCHEMA_VERSION_KEY)?.map(|v| v.value().to_owned());
    stored
      .map(|v| {
        v.parse::<u32>()
          .map_err(|_| Error::Corrupt(format!("schema version {v:?}")))
      })
      .transpose()?
  };

  let plan = migration::pending(MIGRATIONS, current, target)?;
  for step in plan {
    info!(version = step.version, description = step.description, "applying migration");
    (step.apply)(&tx)?;
  }

  {
    let mut metadata = tx.open_table(METADATA)?;
    metadata.insert(SCHEMA_VERSION_KEY, target.to_string().as_str())?;
  }
  tx.commit()?;
  Ok(target)
}
