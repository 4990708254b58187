//! Encoding and decoding between domain types and SQLite rows.
//!
//! Events and entity snapshots are stored as compact JSON in `data`
//! columns. The entity type is duplicated into its own column so listings
//! can filter without parsing JSON.

use recollect_core::{
  backend::{EntityRecord, EventHistory},
  entity::{Entity, EntityType},
  event::Event,
  id::{EntityId, EventId},
};

// ─── Events ──────────────────────────────────────────────────────────────────

pub fn encode_event(event: &Event) -> recollect_core::Result<String> {
  Ok(serde_json::to_string(event)?)
}

pub fn decode_event(data: &str) -> recollect_core::Result<Event> {
  Ok(serde_json::from_str(data)?)
}

// ─── Entities ────────────────────────────────────────────────────────────────

pub fn encode_entity(entity: &Entity) -> recollect_core::Result<String> {
  Ok(serde_json::to_string(entity)?)
}

/// Raw row from the `entities` table, before JSON decoding.
pub struct RawEntity {
  pub id:                          String,
  pub entity_type:                 String,
  pub last_event_id:               String,
  pub last_event_timestamp_millis: i64,
  pub data:                        String,
}

impl RawEntity {
  /// Read the columns `id, entity_type, last_event_id,
  /// last_event_timestamp_millis, data` in that order.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                          row.get(0)?,
      entity_type:                 row.get(1)?,
      last_event_id:               row.get(2)?,
      last_event_timestamp_millis: row.get(3)?,
      data:                        row.get(4)?,
    })
  }

  pub fn into_record(self) -> recollect_core::Result<EntityRecord> {
    let entity: Entity = serde_json::from_str(&self.data)?;
    let column_type: Option<EntityType> = self.entity_type.parse().ok();
    if column_type != Some(entity.entity_type()) || entity.id().as_str() != self.id
    {
      return Err(recollect_core::Error::Storage(
        format!(
          "entity row {} ({}) does not match its snapshot",
          self.id, self.entity_type
        )
        .into(),
      ));
    }
    Ok(EntityRecord {
      entity,
      last_event_id: EventId::from(self.last_event_id),
      last_event_timestamp_millis: self.last_event_timestamp_millis,
    })
  }
}

// ─── History view ────────────────────────────────────────────────────────────

/// [`EventHistory`] over an open transaction.
pub struct TxHistory<'a>(pub &'a rusqlite::Connection);

impl EventHistory for TxHistory<'_> {
  fn events_for_entity(
    &self,
    entity_id: &EntityId,
  ) -> recollect_core::Result<Vec<Event>> {
    let storage = |e: rusqlite::Error| recollect_core::Error::Storage(Box::new(e));
    let mut stmt = self
      .0
      .prepare_cached(
        "SELECT data FROM events WHERE entity_id = ?1 ORDER BY sequence_number",
      )
      .map_err(storage)?;
    let rows = stmt
      .query_map([entity_id.as_str()], |r| r.get::<_, String>(0))
      .map_err(storage)?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(storage)?;
    rows.iter().map(|data| decode_event(data)).collect()
  }
}
