//! `recollect`: command-line access to a Recollect store.
//!
//! # Usage
//!
//! ```
//! recollect add-qa "What is the capital of France?" "Paris"
//! recollect due
//! recollect review <task-id> remembered
//! recollect --config ~/.config/recollect/recollect.toml sync
//! ```
//!
//! Settings come from the TOML file named by `--config` (default
//! `recollect.toml`, optional) and `RECOLLECT_*` environment variables.

mod commands;
mod settings;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use commands::{Command, Context};
use recollect_store_redb::RedbBackend;
use recollect_store_sqlite::SqliteBackend;
use settings::{Engine, Settings};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Event-sourced spaced-repetition store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "recollect.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Logs go to stderr; stdout carries command output.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;
  let now = chrono::Utc::now().timestamp_millis();
  let path = settings.store_path.clone();

  match settings.engine {
    Engine::Sqlite => {
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
          .with_context(|| format!("failed to create {}", parent.display()))?;
      }
      let backend = SqliteBackend::open(&path)
        .await
        .with_context(|| format!("failed to open store at {path:?}"))?;
      Context::new(backend, settings).run(cli.command, now).await
    }
    Engine::Redb => {
      let backend = RedbBackend::open(&path)
        .await
        .with_context(|| format!("failed to open store at {path:?}"))?;
      Context::new(backend, settings).run(cli.command, now).await
    }
  }
}

#[cfg(test)]
mod tests;
