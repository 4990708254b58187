//! Integration tests for `RedbBackend`.

use recollect_core::{
  backend::{DuePredicate, EntityQuery, StorageBackend},
  conformance::{cloze_spec, ingest, ingest_qa, reschedule, set_deleted},
  database::Database,
  id::EntityId,
};
use redb::{ReadableTable as _, ReadableTableMetadata as _};

use crate::{
  Error, LATEST_SCHEMA_VERSION, RedbBackend,
  tables::{self, DERIVED_BY_TASK, DERIVED_DUE, METADATA},
};

mod conformance {
  recollect_core::backend_conformance_tests!(async {
    crate::RedbBackend::open_in_memory()
      .await
      .expect("in-memory store")
  });
}

fn ids(entities: &[recollect_core::entity::Entity]) -> Vec<&str> {
  entities.iter().map(|e| e.id().as_str()).collect()
}

#[test]
fn latest_version_matches_migration_list() {
  assert_eq!(
    recollect_core::migration::latest_version(tables::MIGRATIONS),
    LATEST_SCHEMA_VERSION
  );
}

#[tokio::test]
async fn index_tables_stay_in_step() {
  let db = Database::new(RedbBackend::open_in_memory().await.unwrap());
  db.put_events(vec![ingest("e1", "t1", 100, cloze_spec("c", &["a", "b"]))])
    .await
    .unwrap();
  db.put_events(vec![reschedule("e2", "t1", "b", 200, 7)]).await.unwrap();

  let (due_rows, task_rows) = db
    .backend()
    .read(|tx| {
      let due: Vec<(i64, String)> = tx
        .open_table(DERIVED_DUE)?
        .iter()?
        .map(|e| e.map(|(k, _)| (k.value().0, k.value().2.to_owned())))
        .collect::<Result<_, _>>()?;
      let by_task: Vec<(String, i64)> = tx
        .open_table(DERIVED_BY_TASK)?
        .iter()?
        .map(|e| e.map(|(k, v)| (k.value().1.to_owned(), v.value())))
        .collect::<Result<_, _>>()?;
      Ok((due, by_task))
    })
    .await
    .unwrap();

  assert_eq!(due_rows, vec![(7, "b".to_owned()), (100, "a".to_owned())]);
  assert_eq!(task_rows, vec![("a".to_owned(), 100), ("b".to_owned(), 7)]);

  db.put_events(vec![set_deleted("e3", "t1", 300, true)]).await.unwrap();
  let remaining = db
    .backend()
    .read(|tx| Ok(tx.open_table(DERIVED_DUE)?.len()? + tx.open_table(DERIVED_BY_TASK)?.len()?))
    .await
    .unwrap();
  assert_eq!(remaining, 0);
}

#[tokio::test]
async fn data_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("nested").join("store.redb");

  {
    let db = Database::new(RedbBackend::open(&path).await.unwrap());
    db.put_events(vec![ingest_qa("e1", "t1", 100)]).await.unwrap();
  }

  let db = Database::new(RedbBackend::open(&path).await.unwrap());
  assert!(db.get_task(&EntityId::from("t1")).await.unwrap().is_some());
}

#[tokio::test]
async fn index_rebuild_drops_rows_of_deleted_tasks() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("store.redb");

  {
    let backend = RedbBackend::open_with_schema_version(&path, 1).await.unwrap();
    assert_eq!(backend.schema_version().await.unwrap(), 1);
    let db = Database::new(backend);
    db.put_events(vec![ingest_qa("e1", "t1", 100), ingest_qa("e2", "t2", 100)])
      .await
      .unwrap();
    db.put_events(vec![set_deleted("e3", "t1", 200, true)]).await.unwrap();
    // Simulate an index left stale by an older writer.
    db.backend()
      .write_raw(|tx| {
        tx.open_table(DERIVED_DUE)?.insert((100i64, 1u64, "main"), ())?;
        tx.open_table(DERIVED_BY_TASK)?.insert(("t1", "main"), 100i64)?;
        tx.open_table(DERIVED_DUE)?.remove((100i64, 2u64, "main"))?;
        tx.open_table(DERIVED_BY_TASK)?.remove(("t2", "main"))?;
        Ok(())
      })
      .await
      .unwrap();
  }

  let db = Database::new(RedbBackend::open(&path).await.unwrap());
  assert_eq!(db.schema_version().await.unwrap(), 2);
  let due = db
    .list_entities(EntityQuery::tasks().with_predicate(DuePredicate::due_by(1000)))
    .await
    .unwrap();
  assert_eq!(ids(&due), vec!["t2"]);
}

#[tokio::test]
async fn newer_schema_is_rejected() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("store.redb");
  {
    let backend = RedbBackend::open(&path).await.unwrap();
    backend
      .write_raw(|tx| {
        tx.open_table(METADATA)?.insert("version", "99")?;
        Ok(())
      })
      .await
      .unwrap();
  }

  let result = RedbBackend::open(&path).await;
  assert!(matches!(
    result,
    Err(Error::Core(recollect_core::Error::Migration(_)))
  ));
}
