//! SQLite backend for the Recollect record store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every write batch is one SQLite
//! transaction.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use schema::LATEST_SCHEMA_VERSION;
pub use store::SqliteBackend;

#[cfg(test)]
mod tests;
