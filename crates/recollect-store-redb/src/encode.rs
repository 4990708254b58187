//! Row encodings for the redb tables.

use recollect_core::{
  backend::{EntityRecord, EventHistory},
  entity::Entity,
  event::Event,
  id::{EntityId, EventId},
};
use redb::{ReadableTable as _, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::tables::{EVENTS, EVENTS_BY_ENTITY};

/// The value stored in the `entities` table.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
  entity:                      Entity,
  #[serde(rename = "lastEventID")]
  last_event_id:               EventId,
  last_event_timestamp_millis: i64,
}

pub fn encode_record(record: &EntityRecord) -> recollect_core::Result<String> {
  Ok(serde_json::to_string(&StoredRecord {
    entity:                      record.entity.clone(),
    last_event_id:               record.last_event_id.clone(),
    last_event_timestamp_millis: record.last_event_timestamp_millis,
  })?)
}

pub fn decode_record(data: &str) -> recollect_core::Result<EntityRecord> {
  let stored: StoredRecord = serde_json::from_str(data)?;
  Ok(EntityRecord {
    entity:                      stored.entity,
    last_event_id:               stored.last_event_id,
    last_event_timestamp_millis: stored.last_event_timestamp_millis,
  })
}

pub fn encode_event(event: &Event) -> recollect_core::Result<String> {
  Ok(serde_json::to_string(event)?)
}

pub fn decode_event(data: &str) -> recollect_core::Result<Event> {
  Ok(serde_json::from_str(data)?)
}

// ─── History view ────────────────────────────────────────────────────────────

/// [`EventHistory`] over an open write transaction.
pub struct TxHistory<'a>(pub &'a WriteTransaction);

fn storage(err: impl Into<redb::Error>) -> recollect_core::Error {
  recollect_core::Error::Storage(Box::new(err.into()))
}

impl EventHistory for TxHistory<'_> {
  fn events_for_entity(
    &self,
    entity_id: &EntityId,
  ) -> recollect_core::Result<Vec<Event>> {
    let by_entity = self.0.open_table(EVENTS_BY_ENTITY).map_err(storage)?;
    let events = self.0.open_table(EVENTS).map_err(storage)?;
    let id = entity_id.as_str();

    let mut out = Vec::new();
    for entry in by_entity.range((id, 0u64)..=(id, u64::MAX)).map_err(storage)? {
      let (key, _) = entry.map_err(storage)?;
      let (_, sequence) = key.value();
      let data = events.get(sequence).map_err(storage)?.ok_or_else(|| {
        recollect_core::Error::Storage(
          format!("event {sequence} indexed for {id} is missing").into(),
        )
      })?;
      out.push(decode_event(data.value())?);
    }
    Ok(out)
  }
}
