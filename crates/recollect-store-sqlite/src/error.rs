//! Error type for `recollect-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] recollect_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A stored row could not be interpreted.
  #[error("corrupt row: {0}")]
  Corrupt(String),
}

impl From<tokio_rusqlite::Error> for Error {
  /// Core errors raised inside a connection closure travel back as
  /// `Other`; unwrap them so callers can match on them.
  fn from(err: tokio_rusqlite::Error) -> Self {
    match err {
      tokio_rusqlite::Error::Other(inner) => {
        match inner.downcast::<recollect_core::Error>() {
          Ok(core) => Self::Core(*core),
          Err(inner) => Self::Database(tokio_rusqlite::Error::Other(inner)),
        }
      }
      other => Self::Database(other),
    }
  }
}

/// Carry a core error out of a `Connection::call` closure.
pub(crate) fn core(err: impl Into<recollect_core::Error>) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(err.into()))
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
