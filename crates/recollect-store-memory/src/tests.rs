//! Tests for `MemoryBackend`.

use recollect_core::{backend::StorageBackend, conformance::ingest_qa, database::Database};

use crate::MemoryBackend;

mod conformance {
  recollect_core::backend_conformance_tests!(async { crate::MemoryBackend::new() });
}

#[tokio::test]
async fn clones_share_state() {
  let backend = MemoryBackend::new();
  let db = Database::new(backend.clone());
  db.put_events(vec![ingest_qa("e1", "t1", 100)]).await.unwrap();

  let events = backend.get_events(vec!["e1".into()]).await.unwrap();
  assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn rescheduling_moves_the_due_entry() {
  use recollect_core::{
    backend::{DuePredicate, EntityQuery},
    conformance::reschedule,
  };

  let db = Database::new(MemoryBackend::new());
  db.put_events(vec![ingest_qa("e1", "t1", 100)]).await.unwrap();
  db.put_events(vec![reschedule("e2", "t1", "main", 200, 5_000)])
    .await
    .unwrap();

  let early = db
    .list_entities(EntityQuery::tasks().with_predicate(DuePredicate::due_by(4_999)))
    .await
    .unwrap();
  assert!(early.is_empty());

  let late = db
    .list_entities(EntityQuery::tasks().with_predicate(DuePredicate::due_by(5_000)))
    .await
    .unwrap();
  assert_eq!(late.len(), 1);
}

#[tokio::test]
async fn due_queries_honor_every_comparison() {
  use recollect_core::{
    backend::{Comparison, DuePredicate, EntityQuery},
    conformance::reschedule,
    event::MAX_TIMESTAMP_MILLIS,
  };

  let db = Database::new(MemoryBackend::new());
  let dues = [0, 10, 20, 20, 30, MAX_TIMESTAMP_MILLIS];
  for (i, due) in dues.into_iter().enumerate() {
    let task = format!("t{i}");
    db.put_events(vec![
      ingest_qa(&format!("i{i}"), &task, 100),
      reschedule(&format!("r{i}"), &task, "main", 200, due),
    ])
    .await
    .unwrap();
  }

  let db = &db;
  let query = move |comparison: Comparison, timestamp_millis: i64| async move {
    let predicate = DuePredicate { comparison, timestamp_millis };
    let tasks = db
      .list_entities(EntityQuery::tasks().with_predicate(predicate))
      .await
      .unwrap();
    tasks.iter().map(|t| t.id().to_string()).collect::<Vec<_>>()
  };

  assert_eq!(query(Comparison::Lt, 20).await, ["t0", "t1"]);
  assert_eq!(query(Comparison::Le, 20).await, ["t0", "t1", "t2", "t3"]);
  assert_eq!(query(Comparison::Eq, 20).await, ["t2", "t3"]);
  assert_eq!(query(Comparison::Gt, 20).await, ["t4", "t5"]);
  assert_eq!(query(Comparison::Ge, 20).await, ["t2", "t3", "t4", "t5"]);

  assert_eq!(query(Comparison::Le, i64::MAX).await.len(), dues.len());
  assert_eq!(query(Comparison::Eq, MAX_TIMESTAMP_MILLIS).await, ["t5"]);
  assert!(query(Comparison::Gt, i64::MAX).await.is_empty());
  assert!(query(Comparison::Lt, 0).await.is_empty());
}

#[test]
fn lower_bounded_due_queries_seek_instead_of_scanning() {
  use std::ops::Bound;

  use recollect_core::{
    backend::{Comparison, DuePredicate},
    id::ComponentId,
  };

  use crate::store::due_bounds;

  let seek = |comparison: Comparison, timestamp_millis: i64| {
    due_bounds(DuePredicate { comparison, timestamp_millis }).map(|(lower, _)| lower)
  };
  let start = |ts: i64| Bound::Included((ts, 0, ComponentId::from("")));

  assert_eq!(seek(Comparison::Ge, 20), Some(start(20)));
  assert_eq!(seek(Comparison::Eq, 20), Some(start(20)));
  assert_eq!(seek(Comparison::Gt, 20), Some(start(21)));
  assert_eq!(seek(Comparison::Gt, i64::MAX), None);
  assert_eq!(seek(Comparison::Le, 20), Some(Bound::Unbounded));
}
