//! Subcommands and their implementations.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use clap::{Subcommand, ValueEnum};
use recollect_core::{
  attachment::{AttachmentMimeType, AttachmentStore as _},
  backend::{DuePredicate, EntityQuery, EventQuery, StorageBackend},
  database::Database,
  entity::Entity,
  event::{Event, EventPayload, RepetitionOutcome},
  id::{AttachmentId, ComponentId, EntityId, EventId},
  task::{MAIN_COMPONENT_ID, Task, TaskContent, TaskContentField, TaskProvenance, TaskSpec},
};
use recollect_sync::{
  FsAttachmentStore, HttpConfig, HttpSyncAdapter, StoreSyncAdapter, SyncOptions, sync_store,
};

use crate::settings::Settings;

// ─── CLI surface ─────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Add a question/answer task and print its ID.
  AddQa {
    question: String,
    answer:   String,
    /// Where the task came from (a URL or any stable identifier).
    #[arg(long)]
    source:   Option<String>,
  },

  /// Record a review of one task component.
  Review {
    task_id:   String,
    #[arg(value_enum)]
    outcome:   Outcome,
    #[arg(long, default_value = MAIN_COMPONENT_ID)]
    component: String,
    /// Groups reviews done in one sitting.
    #[arg(long)]
    session:   Option<String>,
  },

  /// Move a component's due time without touching its interval.
  Reschedule {
    task_id:   String,
    /// RFC 3339 time or milliseconds since the epoch.
    due:       String,
    #[arg(long, default_value = MAIN_COMPONENT_ID)]
    component: String,
  },

  /// Mark a task deleted, or undo that with `--restore`.
  Delete {
    task_id: String,
    #[arg(long)]
    restore: bool,
  },

  /// List tasks with a component due at or before a time (default: now).
  Due {
    #[arg(long)]
    at:    Option<String>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },

  /// Print events as JSON lines, in log order.
  Events {
    #[arg(long)]
    entity: Option<String>,
    #[arg(long)]
    after:  Option<String>,
    #[arg(long)]
    limit:  Option<usize>,
  },

  /// Store an image file as an attachment and print its ID.
  Attach { path: PathBuf },

  /// Exchange events and attachments with the configured remote.
  Sync,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Remembered,
  Forgotten,
  Skipped,
}

impl From<Outcome> for RepetitionOutcome {
  fn from(outcome: Outcome) -> Self {
    match outcome {
      Outcome::Remembered => Self::Remembered,
      Outcome::Forgotten => Self::Forgotten,
      Outcome::Skipped => Self::Skipped,
    }
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Parse an RFC 3339 time or a raw millisecond timestamp.
pub fn parse_timestamp(s: &str) -> Result<i64> {
  if let Ok(millis) = s.parse::<i64>() {
    return Ok(millis);
  }
  let time = DateTime::parse_from_rfc3339(s)
    .with_context(|| format!("invalid time {s:?}: expected RFC 3339 or milliseconds"))?;
  Ok(time.timestamp_millis())
}

fn format_timestamp(millis: i64) -> String {
  DateTime::<Utc>::from_timestamp_millis(millis)
    .map(|t| t.to_rfc3339())
    .unwrap_or_else(|| millis.to_string())
}

/// First line of the task's prompt.
fn summary(task: &Task) -> &str {
  let body = match &task.spec.content {
    TaskContent::Qa { body, .. }
    | TaskContent::Cloze { body, .. }
    | TaskContent::Plain { body } => body,
  };
  body.text.lines().next().unwrap_or_default()
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// Everything a command needs: the open store and the settings it was opened
/// with.
pub struct Context<B> {
  pub database:    Arc<Database<B>>,
  pub attachments: Arc<FsAttachmentStore>,
  pub settings:    Settings,
}

impl<B: StorageBackend> Context<B> {
  pub fn new(backend: B, settings: Settings) -> Self {
    Self {
      database: Arc::new(Database::new(backend)),
      attachments: Arc::new(FsAttachmentStore::new(&settings.attachment_dir)),
      settings,
    }
  }

  async fn record(&self, entity_id: EntityId, now: i64, payload: EventPayload) -> Result<()> {
    let event = Event::new(entity_id, now, payload);
    let event_type = event.event_type();
    self
      .database
      .put_events(vec![event])
      .await
      .with_context(|| format!("failed to record {event_type}"))?;
    Ok(())
  }

  /// Run `command` as of `now` (milliseconds since the epoch).
  pub async fn run(&self, command: Command, now: i64) -> Result<()> {
    match command {
      Command::AddQa { question, answer, source } => {
        let task_id = EntityId::generate();
        let spec = TaskSpec::memory(TaskContent::Qa {
          body:   TaskContentField::text(question),
          answer: TaskContentField::text(answer),
        });
        let provenance = source.map(|identifier| TaskProvenance {
          identifier,
          url: None,
          title: None,
          container_title: None,
          color_palette_name: None,
        });
        self
          .record(task_id.clone(), now, EventPayload::TaskIngest {
            spec,
            provenance,
            metadata: Default::default(),
          })
          .await?;
        println!("{task_id}");
      }

      Command::Review { task_id, outcome, component, session } => {
        self
          .record(task_id.into(), now, EventPayload::TaskRepetition {
            component_id:      ComponentId::from(component),
            review_session_id: session.unwrap_or_else(|| EventId::generate().into_string()),
            outcome:           outcome.into(),
          })
          .await?;
      }

      Command::Reschedule { task_id, due, component } => {
        let due = parse_timestamp(&due)?;
        self
          .record(task_id.into(), now, EventPayload::TaskReschedule {
            component_id:             ComponentId::from(component),
            new_due_timestamp_millis: due,
          })
          .await?;
      }

      Command::Delete { task_id, restore } => {
        self
          .record(task_id.into(), now, EventPayload::TaskUpdateDeleted {
            is_deleted: !restore,
          })
          .await?;
      }

      Command::Due { at, limit } => {
        let at = at.as_deref().map(parse_timestamp).transpose()?.unwrap_or(now);
        let query = EntityQuery::tasks()
          .with_predicate(DuePredicate::due_by(at))
          .limit(limit);
        let entities = self
          .database
          .list_entities(query)
          .await
          .context("failed to list due tasks")?;
        for task in entities.iter().filter_map(Entity::as_task) {
          let due = task.next_due_timestamp_millis().unwrap_or(at);
          println!("{}\t{}\t{}", task.id, format_timestamp(due), summary(task));
        }
      }

      Command::Events { entity, after, limit } => {
        let query = EventQuery {
          entity_id: entity.map(Into::into),
          after_id: after.map(Into::into),
          limit,
        };
        let events = self
          .database
          .list_events(query)
          .await
          .context("failed to list events")?;
        for event in events {
          println!("{}", serde_json::to_string(&event)?);
        }
      }

      Command::Attach { path } => {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let mime_type = AttachmentMimeType::from_file_name(&name)
          .ok_or_else(|| anyhow!("unsupported attachment type: {}", path.display()))?;
        let contents = tokio::fs::read(&path)
          .await
          .with_context(|| format!("failed to read {}", path.display()))?;
        let id = AttachmentId::for_contents(&contents);
        self
          .attachments
          .store_attachment(contents, id.clone(), mime_type)
          .await
          .context("failed to store attachment")?;
        self
          .record(id.clone().into(), now, EventPayload::AttachmentIngest { mime_type })
          .await?;
        println!("{id}");
      }

      Command::Sync => self.sync().await?,
    }
    Ok(())
  }

  async fn sync(&self) -> Result<()> {
    let remote = self
      .settings
      .remote
      .as_ref()
      .context("no remote configured; set remote.url")?;
    let http = HttpSyncAdapter::new(HttpConfig {
      base_url: remote.url.clone(),
      token:    remote.token.clone(),
    })?;
    let local = StoreSyncAdapter::new(
      "local",
      Arc::clone(&self.database),
      Arc::clone(&self.attachments),
    )
    .with_http_client(http.client().clone());

    let options = SyncOptions { batch_size: self.settings.batch_size };
    let outcome = sync_store(&local, &http, options).await;

    let mut failed = false;
    for (direction, result) in [("sent", &outcome.sent), ("received", &outcome.received)] {
      match result {
        Ok(stats) => println!(
          "{direction}: {} new of {} events, {} attachments",
          stats.applied, stats.listed, stats.attachments
        ),
        Err(e) => {
          eprintln!("{direction}: failed: {e}");
          failed = true;
        }
      }
    }
    if failed {
      bail!("sync with {} did not complete", remote.url);
    }
    Ok(())
  }
}
