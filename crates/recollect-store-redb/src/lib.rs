//! redb backend for the Recollect record store.
//!
//! A transactional key-value engine with no query language: the event log,
//! entity records and the due-time index are ordered tables with composite
//! keys, and every query is a range scan. All redb work runs on tokio's
//! blocking pool.

mod encode;
mod store;
mod tables;

pub mod error;

pub use error::{Error, Result};
pub use store::RedbBackend;
pub use tables::LATEST_SCHEMA_VERSION;

#[cfg(test)]
mod tests;
