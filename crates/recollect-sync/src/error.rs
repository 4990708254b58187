//! Error type for `recollect-sync`.

use recollect_core::id::AttachmentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] recollect_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{request} → {status}")]
  Status {
    request: String,
    status:  reqwest::StatusCode,
  },

  #[error("unsupported attachment URL: {0}")]
  UnsupportedUrl(String),

  #[error("attachment {0} is not available at the source")]
  MissingAttachment(AttachmentId),

  #[error("invalid access token: {0}")]
  InvalidToken(#[from] reqwest::header::InvalidHeaderValue),

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl Error {
  /// Box an error raised by a storage or attachment backend.
  pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
