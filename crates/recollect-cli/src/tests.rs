//! Tests for the CLI commands, run against an in-memory SQLite store.

use std::path::PathBuf;

use recollect_core::{
  backend::{EntityQuery, EventQuery},
  entity::EntityType,
  task::Task,
};
use recollect_store_sqlite::SqliteBackend;
use tempfile::TempDir;

use crate::{
  commands::{Command, Context, Outcome, parse_timestamp},
  settings::{Engine, Settings, expand_tilde},
};

const DAY: i64 = 24 * 60 * 60 * 1000;

async fn context() -> (Context<SqliteBackend>, TempDir) {
  let dir = tempfile::tempdir().unwrap();
  let settings = Settings {
    engine:         Engine::Sqlite,
    store_path:     dir.path().join("store.db"),
    attachment_dir: dir.path().join("attachments"),
    remote:         None,
    batch_size:     500,
  };
  let backend = SqliteBackend::open_in_memory().await.unwrap();
  (Context::new(backend, settings), dir)
}

async fn only_task(ctx: &Context<SqliteBackend>) -> Task {
  let mut tasks = ctx.database.list_entities(EntityQuery::tasks()).await.unwrap();
  assert_eq!(tasks.len(), 1);
  tasks.remove(0).into_task().unwrap()
}

fn due(limit: usize) -> Command { Command::Due { at: None, limit } }

#[test]
fn timestamps_parse_from_rfc3339_or_millis() {
  assert_eq!(parse_timestamp("1500").unwrap(), 1500);
  assert_eq!(parse_timestamp("1970-01-01T00:00:01Z").unwrap(), 1000);
  assert_eq!(parse_timestamp("1970-01-01T01:00:00+01:00").unwrap(), 0);
  assert!(parse_timestamp("yesterday").is_err());
}

#[test]
fn tilde_expands_to_home() {
  let Ok(home) = std::env::var("HOME") else {
    return;
  };
  assert_eq!(expand_tilde(&PathBuf::from("~/a/b")), PathBuf::from(home).join("a/b"));
  assert_eq!(expand_tilde(&PathBuf::from("/a/b")), PathBuf::from("/a/b"));
}

#[tokio::test]
async fn review_cycle() {
  let (ctx, _dir) = context().await;
  let now = 10 * DAY;

  ctx
    .run(
      Command::AddQa {
        question: "Capital of France?".into(),
        answer:   "Paris".into(),
        source:   Some("atlas".into()),
      },
      now,
    )
    .await
    .unwrap();
  let task = only_task(&ctx).await;
  assert_eq!(task.provenance.as_ref().map(|p| p.identifier.as_str()), Some("atlas"));
  ctx.run(due(20), now).await.unwrap();

  ctx
    .run(
      Command::Review {
        task_id:   task.id.to_string(),
        outcome:   Outcome::Remembered,
        component: "main".into(),
        session:   None,
      },
      now + DAY,
    )
    .await
    .unwrap();
  let reviewed = only_task(&ctx).await;
  let state = reviewed.component_states.values().next().unwrap();
  assert_eq!(state.last_repetition_timestamp_millis, Some(now + DAY));
  assert!(state.due_timestamp_millis > now + DAY);

  ctx
    .run(
      Command::Reschedule {
        task_id:   task.id.to_string(),
        due:       "0".into(),
        component: "main".into(),
      },
      now + 2 * DAY,
    )
    .await
    .unwrap();
  assert_eq!(only_task(&ctx).await.next_due_timestamp_millis(), Some(0));

  ctx
    .run(Command::Delete { task_id: task.id.to_string(), restore: false }, now + 3 * DAY)
    .await
    .unwrap();
  assert!(only_task(&ctx).await.is_deleted);

  let events = ctx.database.list_events(EventQuery::default()).await.unwrap();
  assert_eq!(events.len(), 4);
}

#[tokio::test]
async fn reviewing_an_unknown_task_fails() {
  let (ctx, _dir) = context().await;
  let result = ctx
    .run(
      Command::Review {
        task_id:   "missing".into(),
        outcome:   Outcome::Forgotten,
        component: "main".into(),
        session:   None,
      },
      DAY,
    )
    .await;
  assert!(result.is_err());
}

#[tokio::test]
async fn attach_stores_file_and_records_ingest() {
  let (ctx, dir) = context().await;
  let image = dir.path().join("diagram.png");
  std::fs::write(&image, b"not really a png").unwrap();

  ctx.run(Command::Attach { path: image }, DAY).await.unwrap();

  let references = ctx
    .database
    .list_entities(EntityQuery::new(EntityType::AttachmentReference))
    .await
    .unwrap();
  assert_eq!(references.len(), 1);
  let id = references[0].id().as_str();
  assert!(dir.path().join("attachments").join(format!("{id}.png")).exists());

  let unsupported = dir.path().join("notes.txt");
  std::fs::write(&unsupported, b"text").unwrap();
  assert!(ctx.run(Command::Attach { path: unsupported }, DAY).await.is_err());
}

#[tokio::test]
async fn sync_without_remote_fails() {
  let (ctx, _dir) = context().await;
  assert!(ctx.run(Command::Sync, DAY).await.is_err());
}
