//! Error type for `recollect-store-redb`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] recollect_core::Error),

  #[error("database error: {0}")]
  Database(#[from] redb::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("blocking task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  /// A stored row could not be interpreted.
  #[error("corrupt row: {0}")]
  Corrupt(String),
}

macro_rules! from_redb {
  ($($ty:ty),* $(,)?) => {
    $(
      impl From<$ty> for Error {
        fn from(err: $ty) -> Self { Self::Database(err.into()) }
      }
    )*
  };
}

from_redb!(
  redb::DatabaseError,
  redb::TransactionError,
  redb::TableError,
  redb::StorageError,
  redb::CommitError,
);

pub type Result<T, E = Error> = std::result::Result<T, E>;
