//! Bidirectional sync for Recollect stores.
//!
//! A sync moves events between two [`SyncAdapter`]s: a local store wrapped
//! in a [`StoreSyncAdapter`] and a peer, usually an [`HttpSyncAdapter`].
//! Attachment bytes travel ahead of the events that reference them and are
//! re-hashed by every receiver.

#![allow(async_fn_in_trait)]

mod fetch;

pub mod adapter;
pub mod attachments;
pub mod error;
pub mod http;
pub mod store_adapter;
pub mod sync;

pub use adapter::SyncAdapter;
pub use attachments::FsAttachmentStore;
pub use error::{Error, Result};
pub use http::{HttpConfig, HttpSyncAdapter};
pub use store_adapter::StoreSyncAdapter;
pub use sync::{SyncOptions, SyncOutcome, TransferStats, sync_store, transfer};
