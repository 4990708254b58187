//! The `SyncAdapter` trait.

use std::future::Future;

use recollect_core::{
  attachment::AttachmentMimeType,
  event::Event,
  id::{AttachmentId, EventId},
};

use crate::Result;

/// One side of a sync: something events can be listed from and submitted
/// to, with attachment bytes addressable by URL.
///
/// [`crate::sync::transfer`] runs the same routine in both directions, so
/// every adapter plays both the source and the destination role.
pub trait SyncAdapter: Send + Sync {
  /// Stable name used in logs.
  fn id(&self) -> &str;

  /// Up to `limit` events in log order, strictly after `after_id`.
  fn list_events(
    &self,
    after_id: Option<EventId>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Event>>> + Send + '_;

  /// Submit `events`. Already-known events are ignored; returns how many
  /// were newly applied.
  fn put_events(
    &self,
    events: Vec<Event>,
  ) -> impl Future<Output = Result<usize>> + Send + '_;

  /// Fetch the bytes at `source_url`, check they hash to `id`, and store
  /// them here.
  fn put_attachment(
    &self,
    source_url: String,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> impl Future<Output = Result<()>> + Send + '_;

  /// A URL the peer can read this side's copy of `id` from. Fails with
  /// [`crate::Error::MissingAttachment`] if it isn't held here.
  fn get_url_for_attachment(
    &self,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> impl Future<Output = Result<String>> + Send + '_;
}
