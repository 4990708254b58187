//! Core types and trait definitions for the Recollect record store.
//!
//! This crate holds the event-sourced model (events, entities, the reducer
//! and the scheduler it calls), the [`backend::StorageBackend`] contract that
//! storage engines implement, and the engine-agnostic [`database::Database`]
//! façade. It deliberately has no storage or network dependencies.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod attachment;
pub mod backend;
pub mod database;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod migration;
pub mod reducer;
pub mod scheduler;
pub mod task;

#[cfg(feature = "testing")]
pub mod conformance;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
