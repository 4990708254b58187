//! Runtime settings, layered from an optional TOML file and `RECOLLECT_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

/// Storage engine holding the local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
  #[default]
  Sqlite,
  Redb,
}

/// The peer `recollect sync` talks to.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSettings {
  pub url:   String,
  #[serde(default)]
  pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  #[serde(default)]
  pub engine:         Engine,
  #[serde(default = "default_store_path")]
  pub store_path:     PathBuf,
  #[serde(default = "default_attachment_dir")]
  pub attachment_dir: PathBuf,
  #[serde(default)]
  pub remote:         Option<RemoteSettings>,
  #[serde(default = "default_batch_size")]
  pub batch_size:     usize,
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/recollect/store.db") }

fn default_attachment_dir() -> PathBuf {
  PathBuf::from("~/.local/share/recollect/attachments")
}

fn default_batch_size() -> usize { recollect_sync::sync::DEFAULT_BATCH_SIZE }

impl Settings {
  /// Read `path` if it exists, then apply the environment on top.
  ///
  /// Nested keys use a double underscore, e.g. `RECOLLECT_REMOTE__URL`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("RECOLLECT")
          .prefix_separator("_")
          .separator("__"),
      )
      .build()
      .context("failed to read config file")?;

    let mut settings: Self = settings
      .try_deserialize()
      .context("failed to deserialise settings")?;
    settings.store_path = expand_tilde(&settings.store_path);
    settings.attachment_dir = expand_tilde(&settings.attachment_dir);
    Ok(settings)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
