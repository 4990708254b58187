//! In-process backend for the Recollect record store.
//!
//! Holds the log, the entity records and the due-time index in ordinary
//! collections behind one async mutex. Nothing is persisted; the engine
//! stands in for a hosted document database and backs most sync tests.

mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::MemoryBackend;

#[cfg(test)]
mod tests;
