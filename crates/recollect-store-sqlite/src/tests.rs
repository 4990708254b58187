//! Integration tests for `SqliteBackend`.

use recollect_core::{
  backend::{DuePredicate, EntityQuery, StorageBackend},
  conformance::{ingest_qa, set_deleted},
  database::Database,
  id::EntityId,
};

use crate::{Error, LATEST_SCHEMA_VERSION, SqliteBackend, schema, store::due_query_sql};

mod conformance {
  recollect_core::backend_conformance_tests!(async {
    crate::SqliteBackend::open_in_memory()
      .await
      .expect("in-memory store")
  });
}

fn ids(entities: &[recollect_core::entity::Entity]) -> Vec<&str> {
  entities.iter().map(|e| e.id().as_str()).collect()
}

// ─── Query planning ──────────────────────────────────────────────────────────

#[tokio::test]
async fn due_queries_search_the_due_index() {
  let backend = SqliteBackend::open_in_memory().await.unwrap();
  for comparison in ["<", "<=", "=", ">", ">="] {
    let plan = backend.explain(due_query_sql(comparison), 1000).await.unwrap();
    assert!(
      plan.iter().any(|step| step.contains("derived_task_components_due")),
      "{comparison}: {plan:?}"
    );
  }
}

#[test]
fn latest_version_matches_migration_list() {
  assert_eq!(
    recollect_core::migration::latest_version(schema::MIGRATIONS),
    LATEST_SCHEMA_VERSION
  );
}

// ─── Persistence & migrations ────────────────────────────────────────────────

#[tokio::test]
async fn data_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("store.db");

  {
    let db = Database::new(SqliteBackend::open(&path).await.unwrap());
    db.put_events(vec![ingest_qa("e1", "t1", 100)]).await.unwrap();
  }

  let db = Database::new(SqliteBackend::open(&path).await.unwrap());
  assert!(db.get_task(&EntityId::from("t1")).await.unwrap().is_some());
  assert_eq!(db.schema_version().await.unwrap(), LATEST_SCHEMA_VERSION);
}

#[tokio::test]
async fn index_rebuild_drops_rows_of_deleted_tasks() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("store.db");

  {
    let backend = SqliteBackend::open_with_schema_version(&path, 1).await.unwrap();
    assert_eq!(backend.schema_version().await.unwrap(), 1);
    let db = Database::new(backend);
    db.put_events(vec![ingest_qa("e1", "t1", 100), ingest_qa("e2", "t2", 100)])
      .await
      .unwrap();
    db.put_events(vec![set_deleted("e3", "t1", 200, true)]).await.unwrap();
    // Simulate an index left stale by an older writer.
    db.backend()
      .execute_batch(
        "INSERT INTO derived_task_components VALUES ('t1', 'main', 100);
         DELETE FROM derived_task_components WHERE task_id = 't2';",
      )
      .await
      .unwrap();
  }

  let db = Database::new(SqliteBackend::open(&path).await.unwrap());
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
  let path = dir.path().join("store.db");
  {
    let backend = SqliteBackend::open(&path).await.unwrap();
    backend
      .execute_batch("UPDATE metadata SET value = '99' WHERE key = 'version'")
      .await
      .unwrap();
  }

  let result = SqliteBackend::open(&path).await;
  assert!(matches!(
    result,
    Err(Error::Core(recollect_core::Error::Migration(_)))
  ));
}

#[tokio::test]
async fn metadata_without_a_version_is_rejected() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("store.db");
  {
    let backend = SqliteBackend::open(&path).await.unwrap();
    backend
      .execute_batch("DELETE FROM metadata WHERE key = 'version'")
      .await
      .unwrap();
  }

  let result = SqliteBackend::open(&path).await;
  assert!(matches!(
    result,
    Err(Error::Core(recollect_core::Error::Migration(message))) if message.contains("version")
  ));
}
