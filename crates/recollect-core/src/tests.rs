use std::collections::{BTreeMap, HashMap};

use crate::{
  Error, Result,
  attachment::AttachmentMimeType,
  backend::{EntityRecord, EventHistory},
  database::compute_snapshots,
  entity::{Entity, derived_index_rows},
  event::{Event, EventPayload, RepetitionOutcome},
  id::{ComponentId, EntityId, EventId},
  reducer::reduce,
  scheduler::{FORGOTTEN_RETRY_MILLIS, SchedulerConfig, next_state},
  task::{
    ClozeComponent, MAIN_COMPONENT_ID, Task, TaskComponentState, TaskContent,
    TaskContentField, TaskProvenance, TaskSpec,
  },
};

const DAY: i64 = 1000 * 60 * 60 * 24;
const INITIAL: i64 = 5 * DAY;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn event(id: &str, ts: i64, payload: EventPayload) -> Event {
  Event {
    id: EventId::from(id),
    entity_id: EntityId::from("task"),
    timestamp_millis: ts,
    payload,
  }
}

fn cloze(components: &[&str]) -> TaskSpec {
  TaskSpec::memory(TaskContent::Cloze {
    body:       TaskContentField::text("The {capital} of {France}"),
    components: components
      .iter()
      .enumerate()
      .map(|(i, id)| {
        (ComponentId::from(*id), ClozeComponent { order: i as u32, ranges: vec![] })
      })
      .collect(),
  })
}

fn plain() -> TaskSpec {
  TaskSpec::memory(TaskContent::Plain { body: TaskContentField::text("body") })
}

fn ingest(id: &str, ts: i64, spec: TaskSpec) -> Event {
  event(id, ts, EventPayload::TaskIngest {
    spec,
    provenance: None,
    metadata: BTreeMap::new(),
  })
}

fn repetition(id: &str, ts: i64, component: &str, outcome: RepetitionOutcome) -> Event {
  event(id, ts, EventPayload::TaskRepetition {
    component_id: ComponentId::from(component),
    review_session_id: "s".into(),
    outcome,
  })
}

fn task(entity: Entity) -> Task { entity.into_task().expect("task entity") }

fn ingested(spec: TaskSpec, ts: i64) -> Entity { reduce(None, &ingest("i", ts, spec)).unwrap() }

// ─── Reducer ─────────────────────────────────────────────────────────────────

#[test]
fn ingest_creates_one_state_per_component() {
  let task = task(ingested(cloze(&["a", "b"]), 100));
  assert_eq!(task.id, EntityId::from("task"));
  assert_eq!(task.created_at_timestamp_millis, 100);
  assert!(!task.is_deleted);
  let expected = TaskComponentState {
    created_at_timestamp_millis:      100,
    last_repetition_timestamp_millis: None,
    interval_millis:                  0,
    due_timestamp_millis:             100,
  };
  assert_eq!(
    task.component_states,
    BTreeMap::from([
      (ComponentId::from("a"), expected),
      (ComponentId::from("b"), expected),
    ])
  );
}

#[test]
fn non_cloze_tasks_have_a_main_component() {
  let task = task(ingested(plain(), 5));
  let ids: Vec<_> = task.component_states.keys().map(ComponentId::as_str).collect();
  assert_eq!(ids, vec![MAIN_COMPONENT_ID]);
}

#[test]
fn reingest_keeps_spec_and_states_but_revives() {
  let mut entity = ingested(cloze(&["a", "b"]), 100);
  entity = reduce(Some(entity), &event("d", 150, EventPayload::TaskUpdateDeleted {
    is_deleted: true,
  }))
  .unwrap();
  entity = reduce(Some(entity), &repetition("r", 200, "a", RepetitionOutcome::Remembered))
    .unwrap();
  let before = task(entity.clone());
  assert!(before.is_deleted);

  let provenance = TaskProvenance {
    identifier:         "source".into(),
    url:                None,
    title:              Some("Title".into()),
    container_title:    None,
    color_palette_name: None,
  };
  let reingest = event("i2", 300, EventPayload::TaskIngest {
    spec:       plain(),
    provenance: Some(provenance.clone()),
    metadata:   BTreeMap::from([("k".to_owned(), "v".to_owned())]),
  });
  let after = task(reduce(Some(entity), &reingest).unwrap());

  assert!(!after.is_deleted);
  assert_eq!(after.spec, before.spec);
  assert_eq!(after.component_states, before.component_states);
  assert_eq!(after.provenance, Some(provenance.clone()));
  assert_eq!(after.metadata.get("k").map(String::as_str), Some("v"));

  // A re-ingest without provenance keeps the existing one.
  let bare = ingest("i3", 400, plain());
  let again = task(reduce(Some(Entity::Task(after)), &bare).unwrap());
  assert_eq!(again.provenance, Some(provenance));
}

#[test]
fn repetition_changes_only_its_component() {
  let before = ingested(cloze(&["a", "b"]), 100);
  let after = task(
    reduce(
      Some(before.clone()),
      &repetition("r", 100 + INITIAL, "a", RepetitionOutcome::Remembered),
    )
    .unwrap(),
  );
  let before = task(before);
  let a = ComponentId::from("a");
  let b = ComponentId::from("b");
  assert_ne!(after.component_states[&a], before.component_states[&a]);
  assert_eq!(
    after.component_states[&a].last_repetition_timestamp_millis,
    Some(100 + INITIAL)
  );
  assert_eq!(after.component_states[&b], before.component_states[&b]);
}

#[test]
fn repetition_of_unknown_component_is_ignored() {
  let before = ingested(cloze(&["a"]), 100);
  let after = reduce(
    Some(before.clone()),
    &repetition("r", 200, "zzz", RepetitionOutcome::Remembered),
  )
  .unwrap();
  assert_eq!(after, before);
}

#[test]
fn reschedule_moves_only_due_time() {
  let before = ingested(cloze(&["a", "b"]), 100);
  let after = task(
    reduce(Some(before.clone()), &event("s", 200, EventPayload::TaskReschedule {
      component_id:             ComponentId::from("b"),
      new_due_timestamp_millis: 9999,
    }))
    .unwrap(),
  );
  let before = task(before);
  let b = ComponentId::from("b");
  assert_eq!(after.component_states[&b].due_timestamp_millis, 9999);
  assert_eq!(after.component_states[&b].interval_millis, 0);
  assert_eq!(
    after.component_states[&ComponentId::from("a")],
    before.component_states[&ComponentId::from("a")]
  );
}

#[test]
fn reschedule_of_unknown_component_fails() {
  let before = ingested(cloze(&["a"]), 100);
  let result = reduce(Some(before), &event("s", 200, EventPayload::TaskReschedule {
    component_id:             ComponentId::from("zzz"),
    new_due_timestamp_millis: 1,
  }));
  assert!(matches!(result, Err(Error::UnknownComponent { .. })));
}

#[test]
fn updates_without_snapshot_fail() {
  let payloads = vec![
    EventPayload::TaskRepetition {
      component_id:      ComponentId::from(MAIN_COMPONENT_ID),
      review_session_id: "s".into(),
      outcome:           RepetitionOutcome::Remembered,
    },
    EventPayload::TaskReschedule {
      component_id:             ComponentId::from(MAIN_COMPONENT_ID),
      new_due_timestamp_millis: 5,
    },
    EventPayload::TaskUpdateDeleted { is_deleted: true },
    EventPayload::TaskUpdateSpec { spec: plain() },
    EventPayload::TaskUpdateProvenance { provenance: None },
    EventPayload::TaskUpdateMetadata { metadata: BTreeMap::new() },
  ];
  for payload in payloads {
    let event = event("e", 1, payload);
    let result = reduce(None, &event);
    assert!(
      matches!(result, Err(Error::MissingSnapshot { event_type, .. }) if event_type == event.event_type()),
      "{} should need a snapshot",
      event.event_type()
    );
  }
}

#[test]
fn field_updates_replace_wholesale() {
  let mut entity = ingested(plain(), 1);
  entity = reduce(Some(entity), &event("m1", 2, EventPayload::TaskUpdateMetadata {
    metadata: BTreeMap::from([("a".to_owned(), "1".to_owned()), ("b".to_owned(), "1".to_owned())]),
  }))
  .unwrap();
  entity = reduce(Some(entity), &event("m2", 3, EventPayload::TaskUpdateMetadata {
    metadata: BTreeMap::from([("b".to_owned(), "2".to_owned())]),
  }))
  .unwrap();
  entity =
    reduce(Some(entity), &event("sp", 4, EventPayload::TaskUpdateSpec { spec: cloze(&["x"]) }))
      .unwrap();

  let task = task(entity);
  assert_eq!(task.metadata.get("a").map(String::as_str), Some("1"));
  assert_eq!(task.metadata.get("b").map(String::as_str), Some("2"));
  assert_eq!(task.spec, cloze(&["x"]));
  // The component set is fixed at ingest.
  let ids: Vec<_> = task.component_states.keys().map(ComponentId::as_str).collect();
  assert_eq!(ids, vec![MAIN_COMPONENT_ID]);
}

#[test]
fn attachment_events_and_task_events_do_not_mix() {
  let attachment = reduce(
    None,
    &event("a", 1, EventPayload::AttachmentIngest { mime_type: AttachmentMimeType::Png }),
  )
  .unwrap();
  let again = reduce(
    Some(attachment.clone()),
    &event("b", 2, EventPayload::AttachmentIngest { mime_type: AttachmentMimeType::Jpeg }),
  )
  .unwrap();
  assert_eq!(again, attachment);

  let result = reduce(
    Some(attachment),
    &event("c", 3, EventPayload::TaskUpdateDeleted { is_deleted: true }),
  );
  assert!(matches!(result, Err(Error::EntityTypeMismatch { .. })));

  let result = reduce(
    Some(ingested(plain(), 1)),
    &event("d", 3, EventPayload::AttachmentIngest { mime_type: AttachmentMimeType::Png }),
  );
  assert!(matches!(result, Err(Error::EntityTypeMismatch { .. })));
}

#[test]
fn derived_rows_follow_component_states() {
  let entity = ingested(cloze(&["a", "b"]), 100);
  let rows = derived_index_rows(&entity);
  assert_eq!(rows.len(), 2);
  assert!(rows.iter().all(|r| r.due_timestamp_millis == 100));

  let deleted = reduce(Some(entity), &event("d", 200, EventPayload::TaskUpdateDeleted {
    is_deleted: true,
  }))
  .unwrap();
  assert!(derived_index_rows(&deleted).is_empty());
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

#[test]
fn first_successful_review_grows_from_elapsed_time() {
  let state = TaskComponentState::new(1000);
  let review = 1000 + 2 * INITIAL;
  let next = next_state(&state, review, RepetitionOutcome::Remembered);
  // 864_000_000 × 2.3 is 1_987_199_999.9999998 in double precision.
  assert_eq!(next.interval_millis, 1_987_199_999);
  let jitter = next.due_timestamp_millis - review - next.interval_millis;
  assert!((0..=600_000).contains(&jitter));
  assert_eq!(jitter, (review % 1000) * 600);
}

#[test]
fn early_review_keeps_the_earned_interval() {
  let state = TaskComponentState {
    created_at_timestamp_millis:      0,
    last_repetition_timestamp_millis: Some(0),
    interval_millis:                  20 * DAY,
    due_timestamp_millis:             20 * DAY,
  };
  let next = next_state(&state, DAY, RepetitionOutcome::Skipped);
  assert_eq!(next.interval_millis, 20 * DAY);

  // Past the initial interval, growth wins: floor(10 days × 2.3).
  let next = next_state(&state, 10 * DAY, RepetitionOutcome::Remembered);
  assert_eq!(next.interval_millis, 1_987_199_999);
}

#[test]
fn forgotten_retries_in_ten_minutes() {
  let state = TaskComponentState::new(0);
  let review = 3 * DAY + 777;
  let next = next_state(&state, review, RepetitionOutcome::Forgotten);
  assert_eq!(next.due_timestamp_millis - review, FORGOTTEN_RETRY_MILLIS);
  assert_eq!(next.due_timestamp_millis - review, 600_000);
  assert_eq!(next.interval_millis, 0);
}

#[test]
fn forgotten_shrinks_long_intervals() {
  let state = TaskComponentState {
    created_at_timestamp_millis:      0,
    last_repetition_timestamp_millis: Some(0),
    interval_millis:                  23 * DAY,
    due_timestamp_millis:             23 * DAY,
  };
  let next = next_state(&state, 23 * DAY, RepetitionOutcome::Forgotten);
  assert_eq!(next.interval_millis, 10 * DAY);

  let short = TaskComponentState { interval_millis: 6 * DAY, ..state };
  let next = next_state(&short, 23 * DAY, RepetitionOutcome::Forgotten);
  assert_eq!(next.interval_millis, INITIAL);
}

#[test]
fn reviews_near_the_end_of_time_saturate() {
  let entity = ingested(plain(), 0);
  for outcome in [RepetitionOutcome::Remembered, RepetitionOutcome::Forgotten] {
    let reviewed =
      reduce(Some(entity.clone()), &repetition("r", i64::MAX - 10, MAIN_COMPONENT_ID, outcome))
        .unwrap();
    let state = &task(reviewed).component_states[&ComponentId::from(MAIN_COMPONENT_ID)];
    assert_eq!(state.due_timestamp_millis, i64::MAX);
  }
}

#[test]
fn scheduling_is_deterministic() {
  let config = SchedulerConfig::default();
  let state = TaskComponentState::new(12_345);
  let a = config.next_state(&state, 98_765_432, RepetitionOutcome::Remembered);
  let b = config.next_state(&state, 98_765_432, RepetitionOutcome::Remembered);
  assert_eq!(a, b);
}

// ─── Snapshot computation ────────────────────────────────────────────────────

struct FakeHistory(HashMap<EntityId, Vec<Event>>);

impl EventHistory for FakeHistory {
  fn events_for_entity(&self, entity_id: &EntityId) -> Result<Vec<Event>> {
    Ok(self.0.get(entity_id).cloned().unwrap_or_default())
  }
}

#[test]
fn late_events_trigger_a_full_replay() {
  let ingest = ingest("i", 100, cloze(&["a"]));
  let late_review = repetition("r1", 100 + INITIAL, "a", RepetitionOutcome::Remembered);
  let later_review = repetition("r2", 100 + 3 * INITIAL, "a", RepetitionOutcome::Forgotten);

  // Stored: ingest + later_review. Incoming: late_review, which is older.
  let mut stored = Some(reduce(None, &ingest).unwrap());
  stored = Some(reduce(stored, &later_review).unwrap());
  let record = EntityRecord {
    entity:                      stored.unwrap(),
    last_event_id:               later_review.id.clone(),
    last_event_timestamp_millis: later_review.timestamp_millis,
  };
  let records = HashMap::from([(EntityId::from("task"), record)]);
  let history = FakeHistory(HashMap::from([(
    EntityId::from("task"),
    vec![ingest.clone(), later_review.clone()],
  )]));

  let out =
    compute_snapshots(reduce, std::slice::from_ref(&late_review), &records, &history).unwrap();
  assert_eq!(out.len(), 1);

  let mut expected = reduce(None, &ingest).unwrap();
  expected = reduce(Some(expected), &late_review).unwrap();
  expected = reduce(Some(expected), &later_review).unwrap();
  assert_eq!(out[0].entity, expected);
  assert_eq!(out[0].last_event_id, later_review.id);
}

#[test]
fn snapshots_come_out_in_first_appearance_order() {
  let mut b = ingest("e1", 100, plain());
  b.entity_id = EntityId::from("b");
  let mut a = ingest("e2", 100, plain());
  a.entity_id = EntityId::from("a");
  let mut b_again = event("e3", 50, EventPayload::TaskUpdateMetadata { metadata: BTreeMap::new() });
  b_again.entity_id = EntityId::from("b");

  // e3 sorts before b's ingest, so b's fold fails: a missing snapshot.
  let history = FakeHistory(HashMap::new());
  let result = compute_snapshots(reduce, &[b.clone(), a.clone(), b_again], &HashMap::new(), &history);
  assert!(matches!(result, Err(Error::MissingSnapshot { .. })));

  let out = compute_snapshots(reduce, &[b, a], &HashMap::new(), &history).unwrap();
  let ids: Vec<_> = out.iter().map(|r| r.id().as_str()).collect();
  assert_eq!(ids, vec!["b", "a"]);
}
