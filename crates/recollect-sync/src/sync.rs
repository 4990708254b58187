//! The sync engine.
//!
//! Both directions run the same [`transfer`] routine concurrently. There is
//! no persisted checkpoint: every sync walks the whole source log from the
//! beginning and relies on the destination ignoring events it already has.
//! An interrupted sync is therefore always safe to re-run.

use recollect_core::{
  event::EventPayload,
  id::{AttachmentId, EventId},
};
use tracing::{debug, info, instrument, warn};

use crate::{Result, adapter::SyncAdapter};

/// Default number of events requested per round trip.
pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
  pub batch_size: usize,
}

impl Default for SyncOptions {
  fn default() -> Self { Self { batch_size: DEFAULT_BATCH_SIZE } }
}

/// Counters for one direction of a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
  /// Events read from the source.
  pub listed:      usize,
  /// Events the destination had not seen before.
  pub applied:     usize,
  /// Attachments copied ahead of their ingest events.
  pub attachments: usize,
  pub batches:     usize,
}

/// Result of [`sync_store`]. Each direction succeeds or fails on its own.
#[derive(Debug)]
pub struct SyncOutcome {
  /// local → remote
  pub sent:     Result<TransferStats>,
  /// remote → local
  pub received: Result<TransferStats>,
}

impl SyncOutcome {
  pub fn is_ok(&self) -> bool { self.sent.is_ok() && self.received.is_ok() }
}

/// Exchange events between `local` and `remote` in both directions at once.
pub async fn sync_store<L, R>(local: &L, remote: &R, options: SyncOptions) -> SyncOutcome
where
  L: SyncAdapter,
  R: SyncAdapter,
{
  let (sent, received) = tokio::join!(
    transfer(local, remote, options.batch_size),
    transfer(remote, local, options.batch_size),
  );

  match (&sent, &received) {
    (Ok(sent), Ok(received)) => info!(
      local = local.id(),
      remote = remote.id(),
      sent = sent.applied,
      received = received.applied,
      "sync finished"
    ),
    _ => warn!(
      local = local.id(),
      remote = remote.id(),
      sent_ok = sent.is_ok(),
      received_ok = received.is_ok(),
      "sync finished with errors"
    ),
  }
  SyncOutcome { sent, received }
}

/// Copy every event in `source` to `destination`, `batch_size` at a time.
///
/// Attachments named by `AttachmentIngest` events in a batch are stored at
/// the destination before the batch itself is submitted.
#[instrument(skip_all, fields(source = source.id(), destination = destination.id()))]
pub async fn transfer<S, D>(
  source: &S,
  destination: &D,
  batch_size: usize,
) -> Result<TransferStats>
where
  S: SyncAdapter,
  D: SyncAdapter,
{
  if batch_size == 0 {
    return Err(
      recollect_core::Error::InvalidQuery("batch size must be positive".into()).into(),
    );
  }

  let mut stats = TransferStats::default();
  let mut after: Option<EventId> = None;
  loop {
    let batch = source.list_events(after.clone(), batch_size).await?;
    let Some(last) = batch.last() else {
      break;
    };
    let next_after = last.id.clone();

    for event in &batch {
      if let EventPayload::AttachmentIngest { mime_type } = &event.payload {
        let id = AttachmentId::from(&event.entity_id);
        let url = source.get_url_for_attachment(id.clone(), *mime_type).await?;
        destination.put_attachment(url, id, *mime_type).await?;
        stats.attachments += 1;
      }
    }

    let listed = batch.len();
    let applied = destination.put_events(batch).await?;
    stats.listed += listed;
    stats.applied += applied;
    stats.batches += 1;
    debug!(listed, applied, "transferred batch");

    after = Some(next_after);
  }

  info!(
    listed = stats.listed,
    applied = stats.applied,
    attachments = stats.attachments,
    "transfer finished"
  );
  Ok(stats)
}
