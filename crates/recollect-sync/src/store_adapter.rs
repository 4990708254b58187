//! [`StoreSyncAdapter`]: a local store as one side of a sync.

use std::sync::Arc;

use recollect_core::{
  attachment::{AttachmentMimeType, AttachmentStore},
  backend::{EventQuery, StorageBackend},
  database::Database,
  event::Event,
  id::{AttachmentId, EventId},
};
use reqwest::Client;
use tracing::warn;

use crate::{Error, Result, adapter::SyncAdapter, fetch::read_url};

/// Adapts a [`Database`] and its [`AttachmentStore`] to [`SyncAdapter`].
pub struct StoreSyncAdapter<B, A> {
  id:          String,
  database:    Arc<Database<B>>,
  attachments: Arc<A>,
  client:      Client,
}

impl<B, A> StoreSyncAdapter<B, A> {
  pub fn new(
    id: impl Into<String>,
    database: Arc<Database<B>>,
    attachments: Arc<A>,
  ) -> Self {
    Self { id: id.into(), database, attachments, client: Client::new() }
  }

  /// Use `client` when fetching attachments from `http(s)` source URLs, e.g.
  /// one carrying the peer's credentials.
  pub fn with_http_client(mut self, client: Client) -> Self {
    self.client = client;
    self
  }

  pub fn database(&self) -> &Arc<Database<B>> { &self.database }

  pub fn attachments(&self) -> &Arc<A> { &self.attachments }
}

impl<B, A> SyncAdapter for StoreSyncAdapter<B, A>
where
  B: StorageBackend,
  A: AttachmentStore,
{
  fn id(&self) -> &str { &self.id }

  async fn list_events(
    &self,
    after_id: Option<EventId>,
    limit: usize,
  ) -> Result<Vec<Event>> {
    self
      .database
      .list_events(EventQuery { entity_id: None, after_id, limit: Some(limit) })
      .await
      .map_err(Error::store)
  }

  async fn put_events(&self, events: Vec<Event>) -> Result<usize> {
    let applied = self.database.put_events(events).await.map_err(Error::store)?;
    Ok(applied.len())
  }

  async fn put_attachment(
    &self,
    source_url: String,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> Result<()> {
    let contents = read_url(&self.client, &source_url).await?;
    if let Err(err) = id.verify(&contents) {
      warn!(attachment_id = %id, %source_url, "attachment bytes do not match their ID");
      return Err(err.into());
    }
    self
      .attachments
      .store_attachment(contents, id, mime_type)
      .await
      .map_err(Error::store)
  }

  async fn get_url_for_attachment(
    &self,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> Result<String> {
    self
      .attachments
      .get_url_for_stored_attachment(id.clone(), mime_type)
      .await
      .map_err(Error::store)?
      .ok_or(Error::MissingAttachment(id))
  }
}
