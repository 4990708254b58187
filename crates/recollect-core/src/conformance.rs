//! Behaviour every [`StorageBackend`] must exhibit.
//!
//! Engine crates enable the `testing` feature in their dev-dependencies and
//! instantiate the whole suite with [`backend_conformance_tests!`]:
//!
//! ```ignore
//! mod conformance {
//!   recollect_core::backend_conformance_tests!(async {
//!     my_engine::Backend::open_in_memory().await.unwrap()
//!   });
//! }
//! ```
//!
//! The fixture constructors are public so other crates' tests can build
//! events without repeating payload boilerplate.

use std::{
  collections::{BTreeMap, HashMap},
  sync::Arc,
};

use crate::{
  Error, Result,
  attachment::AttachmentMimeType,
  backend::{
    Comparison, DuePredicate, EntityQuery, EventQuery, SCHEMA_VERSION_KEY,
    StorageBackend,
  },
  database::Database,
  entity::{Entity, EntityType},
  event::{Event, EventPayload, RepetitionOutcome},
  id::{ComponentId, EntityId, EventId},
  reducer,
  task::{
    ClozeComponent, ClozeRange, MAIN_COMPONENT_ID, Task, TaskContent,
    TaskContentField, TaskSpec,
  },
};

/// Generate one `#[tokio::test]` per conformance check. `$make` is an async
/// expression producing a fresh, empty backend; it is evaluated once per
/// test.
#[macro_export]
macro_rules! backend_conformance_tests {
  ($make:expr) => {
    $crate::backend_conformance_tests!(@each $make;
      put_events_round_trip,
      empty_batch_is_a_no_op,
      known_events_are_ignored,
      late_events_replay_in_timestamp_order,
      equal_timestamps_keep_receipt_order,
      entities_keep_insertion_order,
      failed_compute_writes_nothing,
      failed_reduce_writes_nothing,
      list_events_paginates,
      unknown_cursors_are_errors,
      list_entities_paginates,
      due_predicates_use_the_derived_index,
      deleted_tasks_leave_the_due_index,
      metadata_values_round_trip,
      schema_version_is_persisted,
      concurrent_writes_converge,
    );
  };
  (@each $make:expr; $($name:ident),* $(,)?) => {
    $(
      #[tokio::test]
      async fn $name() {
        let backend = $make.await;
        $crate::conformance::$name(backend).await;
      }
    )*
  };
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

pub fn event(id: &str, entity_id: &str, ts: i64, payload: EventPayload) -> Event {
  Event {
    id: EventId::from(id),
    entity_id: EntityId::from(entity_id),
    timestamp_millis: ts,
    payload,
  }
}

pub fn qa_spec(question: &str, answer: &str) -> TaskSpec {
  TaskSpec::memory(TaskContent::Qa {
    body:   TaskContentField::text(question),
    answer: TaskContentField::text(answer),
  })
}

pub fn cloze_spec(body: &str, component_ids: &[&str]) -> TaskSpec {
  let components = component_ids
    .iter()
    .enumerate()
    .map(|(order, id)| {
      (ComponentId::from(*id), ClozeComponent {
        order:  order as u32,
        ranges: vec![ClozeRange {
          start_index: 0,
          length:      1,
          hint:        None,
        }],
      })
    })
    .collect();
  TaskSpec::memory(TaskContent::Cloze {
    body: TaskContentField::text(body),
    components,
  })
}

pub fn ingest(id: &str, task_id: &str, ts: i64, spec: TaskSpec) -> Event {
  event(id, task_id, ts, EventPayload::TaskIngest {
    spec,
    provenance: None,
    metadata: BTreeMap::new(),
  })
}

pub fn ingest_qa(id: &str, task_id: &str, ts: i64) -> Event {
  ingest(id, task_id, ts, qa_spec("Q", "A"))
}

pub fn repetition(
  id: &str,
  task_id: &str,
  component_id: &str,
  ts: i64,
  outcome: RepetitionOutcome,
) -> Event {
  event(id, task_id, ts, EventPayload::TaskRepetition {
    component_id: ComponentId::from(component_id),
    review_session_id: "session".into(),
    outcome,
  })
}

pub fn reschedule(
  id: &str,
  task_id: &str,
  component_id: &str,
  ts: i64,
  new_due: i64,
) -> Event {
  event(id, task_id, ts, EventPayload::TaskReschedule {
    component_id:             ComponentId::from(component_id),
    new_due_timestamp_millis: new_due,
  })
}

pub fn set_deleted(id: &str, task_id: &str, ts: i64, is_deleted: bool) -> Event {
  event(id, task_id, ts, EventPayload::TaskUpdateDeleted { is_deleted })
}

/// Content-hash-shaped attachment IDs for tests that never touch the bytes.
pub const ATTACHMENT_PNG: &str =
  "a3f1c0d9e2b4a6c8d0e2f4a6b8c0d2e4f6a8b0c2d4e6f8a0b2c4d6e8f0a2b4c6";
pub const ATTACHMENT_SVG: &str =
  "5b2e9d7c1a3f5e7d9c1b3a5f7e9d1c3b5a7f9e1d3c5b7a9f1e3d5c7b9a1f3e5d";

pub fn attachment_ingest(
  id: &str,
  attachment_id: &str,
  ts: i64,
  mime_type: AttachmentMimeType,
) -> Event {
  event(id, attachment_id, ts, EventPayload::AttachmentIngest { mime_type })
}

fn ids(entities: &[Entity]) -> Vec<&str> {
  entities.iter().map(|e| e.id().as_str()).collect()
}

fn event_ids(events: &[Event]) -> Vec<&str> {
  events.iter().map(|e| e.id.as_str()).collect()
}

/// Appends each folded event's ID to the task's `order` metadata, so tests
/// can observe the order events were reduced in.
fn recording_reducer(prior: Option<Entity>, event: &Event) -> Result<Entity> {
  let mut task = match prior {
    Some(Entity::Task(task)) => task,
    _ => Task {
      id: event.entity_id.clone(),
      created_at_timestamp_millis: event.timestamp_millis,
      spec: qa_spec("Q", "A"),
      provenance: None,
      component_states: BTreeMap::new(),
      is_deleted: false,
      metadata: BTreeMap::new(),
    },
  };
  let order = task.metadata.entry("order".into()).or_default();
  if !order.is_empty() {
    order.push(',');
  }
  order.push_str(event.id.as_str());
  Ok(Entity::Task(task))
}

async fn recorded_order<B: StorageBackend>(db: &Database<B>, task_id: &str) -> String {
  let task = db
    .get_task(&EntityId::from(task_id))
    .await
    .unwrap()
    .expect("task exists");
  task.metadata.get("order").cloned().unwrap_or_default()
}

// ─── Writes ──────────────────────────────────────────────────────────────────

pub async fn put_events_round_trip<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  let events = vec![
    ingest_qa("e1", "t1", 1000),
    attachment_ingest("e2", ATTACHMENT_PNG, 1000, AttachmentMimeType::Png),
  ];
  let applied = db.put_events(events.clone()).await.unwrap();
  assert_eq!(applied, events);

  let stored = db
    .get_events(vec![EventId::from("e1"), EventId::from("e2"), EventId::from("x")])
    .await
    .unwrap();
  assert_eq!(stored.len(), 2);
  assert_eq!(stored[&EventId::from("e1")], events[0]);
  assert_eq!(stored[&EventId::from("e2")], events[1]);

  let records = db
    .backend()
    .get_entities(vec![EntityId::from("t1"), EntityId::from(ATTACHMENT_PNG)])
    .await
    .unwrap();
  let task_record = &records[&EntityId::from("t1")];
  assert_eq!(task_record.last_event_id, EventId::from("e1"));
  assert_eq!(task_record.last_event_timestamp_millis, 1000);
  assert_eq!(
    records[&EntityId::from(ATTACHMENT_PNG)].entity_type(),
    EntityType::AttachmentReference
  );

  let task = db.get_task(&EntityId::from("t1")).await.unwrap().unwrap();
  assert_eq!(task.spec, qa_spec("Q", "A"));
  assert_eq!(task.component_states.len(), 1);
  let main = &task.component_states[&ComponentId::from(MAIN_COMPONENT_ID)];
  assert_eq!(main.due_timestamp_millis, 1000);

  // A second ingest of the same attachment leaves the reference unchanged.
  db.put_events(vec![attachment_ingest(
    "e3",
    ATTACHMENT_PNG,
    2000,
    AttachmentMimeType::Png,
  )])
  .await
  .unwrap();
  let entities = db.get_entities(vec![EntityId::from(ATTACHMENT_PNG)]).await.unwrap();
  match &entities[&EntityId::from(ATTACHMENT_PNG)] {
    Entity::AttachmentReference(reference) => {
      assert_eq!(reference.created_at_timestamp_millis, 1000);
    }
    other => panic!("unexpected entity {other:?}"),
  }
}

pub async fn empty_batch_is_a_no_op<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  assert!(db.put_events(Vec::new()).await.unwrap().is_empty());
  assert!(
    db.backend()
      .update_entities(Vec::new(), |_, _, _| Ok(Vec::new()))
      .await
      .unwrap()
      .is_empty()
  );
  assert!(db.list_events(EventQuery::default()).await.unwrap().is_empty());
}

pub async fn known_events_are_ignored<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  let first = vec![
    ingest_qa("e1", "t1", 1000),
    repetition("e2", "t1", MAIN_COMPONENT_ID, 2000, RepetitionOutcome::Remembered),
  ];
  db.put_events(first.clone()).await.unwrap();
  let before = db.get_task(&EntityId::from("t1")).await.unwrap().unwrap();

  let mut again = first.clone();
  again.push(first[1].clone());
  let applied = db.put_events(again).await.unwrap();
  assert!(applied.is_empty());
  let after = db.get_task(&EntityId::from("t1")).await.unwrap().unwrap();
  assert_eq!(before, after);

  let mixed = vec![
    first[0].clone(),
    set_deleted("e3", "t1", 3000, true),
    set_deleted("e3", "t1", 3000, true),
  ];
  let applied = db.put_events(mixed).await.unwrap();
  assert_eq!(event_ids(&applied), vec!["e3"]);

  let log = db.list_events(EventQuery::default()).await.unwrap();
  assert_eq!(event_ids(&log), vec!["e1", "e2", "e3"]);
  assert!(db.get_task(&EntityId::from("t1")).await.unwrap().unwrap().is_deleted);
}

pub async fn late_events_replay_in_timestamp_order<B: StorageBackend>(backend: B) {
  let db = Database::with_reducer(backend, recording_reducer);
  db.put_events(vec![
    set_deleted("b", "t1", 1000, false),
    set_deleted("a", "t1", 3000, false),
  ])
  .await
  .unwrap();
  assert_eq!(recorded_order(&db, "t1").await, "b,a");

  // Older than the stored snapshot: the whole history is replayed.
  db.put_events(vec![set_deleted("z", "t1", 2000, false)])
    .await
    .unwrap();
  assert_eq!(recorded_order(&db, "t1").await, "b,z,a");

  // Newer: applied on top.
  db.put_events(vec![set_deleted("q", "t1", 4000, false)])
    .await
    .unwrap();
  assert_eq!(recorded_order(&db, "t1").await, "b,z,a,q");

  let record = db
    .backend()
    .get_entities(vec![EntityId::from("t1")])
    .await
    .unwrap()
    .remove(&EntityId::from("t1"))
    .unwrap();
  assert_eq!(record.last_event_id, EventId::from("q"));
  assert_eq!(record.last_event_timestamp_millis, 4000);
}

pub async fn equal_timestamps_keep_receipt_order<B: StorageBackend>(backend: B) {
  let db = Database::with_reducer(backend, recording_reducer);
  db.put_events(vec![
    set_deleted("n", "t1", 500, false),
    set_deleted("m", "t1", 500, false),
    set_deleted("k", "t1", 100, false),
  ])
  .await
  .unwrap();
  assert_eq!(recorded_order(&db, "t1").await, "k,n,m");
}

pub async fn entities_keep_insertion_order<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  db.put_events(vec![ingest_qa("e1", "t3", 100), ingest_qa("e2", "t1", 100)])
    .await
    .unwrap();
  db.put_events(vec![ingest_qa("e3", "t2", 100)]).await.unwrap();
  // Updating an existing entity must not move it.
  db.put_events(vec![repetition(
    "e4",
    "t3",
    MAIN_COMPONENT_ID,
    200,
    RepetitionOutcome::Remembered,
  )])
  .await
  .unwrap();

  let tasks = db.list_entities(EntityQuery::tasks()).await.unwrap();
  assert_eq!(ids(&tasks), vec!["t3", "t1", "t2"]);
}

pub async fn failed_compute_writes_nothing<B: StorageBackend>(backend: B) {
  let result = backend
    .update_entities(vec![ingest_qa("e1", "t1", 100)], |_, _, _| {
      Err(Error::InvalidQuery("compute failed".into()))
    })
    .await;
  assert!(result.is_err());
  assert!(backend.list_events(EventQuery::default()).await.unwrap().is_empty());
  assert!(
    backend
      .get_entities(vec![EntityId::from("t1")])
      .await
      .unwrap()
      .is_empty()
  );
}

pub async fn failed_reduce_writes_nothing<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  db.put_events(vec![ingest_qa("e1", "t1", 100)]).await.unwrap();

  // The second entity's repetition has no snapshot to apply to, so the whole
  // batch fails, including the valid event for t1.
  let result = db
    .put_events(vec![
      set_deleted("e2", "t1", 200, true),
      repetition("e3", "t2", MAIN_COMPONENT_ID, 200, RepetitionOutcome::Forgotten),
    ])
    .await;
  assert!(result.is_err());

  let log = db.list_events(EventQuery::default()).await.unwrap();
  assert_eq!(event_ids(&log), vec!["e1"]);
  assert!(!db.get_task(&EntityId::from("t1")).await.unwrap().unwrap().is_deleted);
  let due = db
    .list_entities(EntityQuery::tasks().with_predicate(DuePredicate::due_by(i64::MAX)))
    .await
    .unwrap();
  assert_eq!(ids(&due), vec!["t1"]);
}

// ─── Scans ───────────────────────────────────────────────────────────────────

pub async fn list_events_paginates<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  db.put_events(vec![
    ingest_qa("e1", "t1", 100),
    ingest_qa("e2", "t2", 100),
    set_deleted("e3", "t1", 200, true),
  ])
  .await
  .unwrap();
  db.put_events(vec![set_deleted("e4", "t2", 300, true), set_deleted("e5", "t1", 300, false)])
    .await
    .unwrap();

  let all = db.list_events(EventQuery::default()).await.unwrap();
  assert_eq!(event_ids(&all), vec!["e1", "e2", "e3", "e4", "e5"]);

  let page = db
    .list_events(EventQuery { limit: Some(2), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(event_ids(&page), vec!["e1", "e2"]);

  let page = db
    .list_events(EventQuery {
      after_id: Some(EventId::from("e2")),
      limit: Some(2),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(event_ids(&page), vec!["e3", "e4"]);

  let t1 = db
    .list_events(EventQuery {
      entity_id: Some(EntityId::from("t1")),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(event_ids(&t1), vec!["e1", "e3", "e5"]);

  let t1_after = db
    .list_events(EventQuery {
      entity_id: Some(EntityId::from("t1")),
      after_id:  Some(EventId::from("e2")),
      limit:     Some(1),
    })
    .await
    .unwrap();
  assert_eq!(event_ids(&t1_after), vec!["e3"]);

  let end = db
    .list_events(EventQuery {
      after_id: Some(EventId::from("e5")),
      ..Default::default()
    })
    .await
    .unwrap();
  assert!(end.is_empty());

  assert!(
    db.list_events(EventQuery { limit: Some(0), ..Default::default() })
      .await
      .is_err()
  );
}

pub async fn unknown_cursors_are_errors<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  db.put_events(vec![ingest_qa("e1", "t1", 100)]).await.unwrap();

  assert!(
    db.list_events(EventQuery {
      after_id: Some(EventId::from("missing")),
      ..Default::default()
    })
    .await
    .is_err()
  );
  assert!(
    db.list_entities(EntityQuery::tasks().after(EntityId::from("missing")))
      .await
      .is_err()
  );
}

pub async fn list_entities_paginates<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  db.put_events(vec![
    ingest_qa("e1", "t1", 100),
    attachment_ingest("e2", ATTACHMENT_SVG, 100, AttachmentMimeType::Svg),
    ingest_qa("e3", "t2", 100),
    ingest_qa("e4", "t3", 100),
  ])
  .await
  .unwrap();

  let tasks = db.list_entities(EntityQuery::tasks()).await.unwrap();
  assert_eq!(ids(&tasks), vec!["t1", "t2", "t3"]);

  let attachments = db
    .list_entities(EntityQuery::new(EntityType::AttachmentReference))
    .await
    .unwrap();
  assert_eq!(ids(&attachments), vec![ATTACHMENT_SVG]);

  let page = db.list_entities(EntityQuery::tasks().limit(2)).await.unwrap();
  assert_eq!(ids(&page), vec!["t1", "t2"]);
  let page = db
    .list_entities(EntityQuery::tasks().after(EntityId::from("t2")).limit(2))
    .await
    .unwrap();
  assert_eq!(ids(&page), vec!["t3"]);

  assert!(
    db.list_entities(
      EntityQuery::new(EntityType::AttachmentReference)
        .with_predicate(DuePredicate::due_by(0))
    )
    .await
    .is_err()
  );
}

pub async fn due_predicates_use_the_derived_index<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  db.put_events(vec![
    ingest_qa("e1", "t1", 100),
    ingest("e2", "t2", 200, cloze_spec("cloze", &["a", "b"])),
    ingest("e3", "t3", 400, cloze_spec("other", &["c"])),
  ])
  .await
  .unwrap();
  // t2 now has components due at 200 (a) and 50 (b).
  db.put_events(vec![reschedule("e4", "t2", "b", 300, 50)])
    .await
    .unwrap();

  let query = |comparison, ts| {
    EntityQuery::tasks().with_predicate(DuePredicate { comparison, timestamp_millis: ts })
  };
  let cases = [
    (Comparison::Le, 100, vec!["t1", "t2"]),
    (Comparison::Lt, 100, vec!["t2"]),
    (Comparison::Eq, 200, vec!["t2"]),
    (Comparison::Eq, 50, vec!["t2"]),
    (Comparison::Gt, 150, vec!["t2", "t3"]),
    (Comparison::Ge, 0, vec!["t1", "t2", "t3"]),
    (Comparison::Lt, 50, vec![]),
  ];
  for (comparison, ts, expected) in cases {
    let found = db.list_entities(query(comparison, ts)).await.unwrap();
    assert_eq!(ids(&found), expected, "{comparison:?} {ts}");
  }

  let page = db
    .list_entities(query(Comparison::Ge, 0).limit(2))
    .await
    .unwrap();
  assert_eq!(ids(&page), vec!["t1", "t2"]);
  let page = db
    .list_entities(query(Comparison::Ge, 0).after(EntityId::from("t2")))
    .await
    .unwrap();
  assert_eq!(ids(&page), vec!["t3"]);

  let t2 = db.get_task(&EntityId::from("t2")).await.unwrap().unwrap();
  assert_eq!(t2.component_states[&ComponentId::from("a")].due_timestamp_millis, 200);
  assert_eq!(t2.component_states[&ComponentId::from("b")].due_timestamp_millis, 50);
}

pub async fn deleted_tasks_leave_the_due_index<B: StorageBackend>(backend: B) {
  let db = Database::new(backend);
  db.put_events(vec![ingest_qa("e1", "t1", 100), ingest_qa("e2", "t2", 100)])
    .await
    .unwrap();
  let due = EntityQuery::tasks().with_predicate(DuePredicate::due_by(1000));

  db.put_events(vec![set_deleted("e3", "t1", 200, true)]).await.unwrap();
  assert_eq!(ids(&db.list_entities(due.clone()).await.unwrap()), vec!["t2"]);
  // Deleted tasks are still listed without a predicate.
  assert_eq!(
    ids(&db.list_entities(EntityQuery::tasks()).await.unwrap()),
    vec!["t1", "t2"]
  );

  // Re-ingesting revives the task and its index rows.
  db.put_events(vec![ingest_qa("e4", "t1", 300)]).await.unwrap();
  assert_eq!(ids(&db.list_entities(due).await.unwrap()), vec!["t1", "t2"]);
}

// ─── Metadata ────────────────────────────────────────────────────────────────

pub async fn metadata_values_round_trip<B: StorageBackend>(backend: B) {
  let keys = || vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
  backend
    .set_metadata_values(HashMap::from([
      ("a".to_owned(), Some("1".to_owned())),
      ("b".to_owned(), Some("2".to_owned())),
    ]))
    .await
    .unwrap();
  let values = backend.get_metadata_values(keys()).await.unwrap();
  assert_eq!(
    values,
    HashMap::from([("a".to_owned(), "1".to_owned()), ("b".to_owned(), "2".to_owned())])
  );

  backend
    .set_metadata_values(HashMap::from([
      ("a".to_owned(), Some("3".to_owned())),
      ("b".to_owned(), None),
    ]))
    .await
    .unwrap();
  let values = backend.get_metadata_values(keys()).await.unwrap();
  assert_eq!(values, HashMap::from([("a".to_owned(), "3".to_owned())]));
}

pub async fn schema_version_is_persisted<B: StorageBackend>(backend: B) {
  let version = backend.schema_version().await.unwrap();
  assert!(version > 0);
  let values = backend
    .get_metadata_values(vec![SCHEMA_VERSION_KEY.to_owned()])
    .await
    .unwrap();
  assert_eq!(values.get(SCHEMA_VERSION_KEY), Some(&version.to_string()));
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

pub async fn concurrent_writes_converge<B: StorageBackend + 'static>(backend: B) {
  let db = Arc::new(Database::new(backend));
  db.put_events(vec![ingest_qa("ingest", "shared", 0)]).await.unwrap();

  let reviews: Vec<Event> = (1..=8)
    .map(|i| {
      repetition(
        &format!("r{i}"),
        "shared",
        MAIN_COMPONENT_ID,
        i * 1_000_000_123,
        RepetitionOutcome::Remembered,
      )
    })
    .collect();

  let mut tasks = tokio::task::JoinSet::new();
  for (i, review) in reviews.iter().rev().cloned().enumerate() {
    let db = Arc::clone(&db);
    tasks.spawn(async move {
      db.put_events(vec![review, ingest_qa(&format!("i{i}"), &format!("t{i}"), 10)])
        .await
        .map(|applied| applied.len())
    });
  }
  while let Some(joined) = tasks.join_next().await {
    assert_eq!(joined.unwrap().unwrap(), 2);
  }

  // Whatever order the writes landed in, the result equals a sequential fold
  // in timestamp order.
  let mut expected = reducer::reduce(None, &ingest_qa("ingest", "shared", 0)).unwrap();
  for review in &reviews {
    expected = reducer::reduce(Some(expected), review).unwrap();
  }
  let shared = db.get_task(&EntityId::from("shared")).await.unwrap().unwrap();
  assert_eq!(Entity::Task(shared), expected);

  let log = db.list_events(EventQuery::default()).await.unwrap();
  assert_eq!(log.len(), 1 + reviews.len() * 2);
}
