//! [`HttpSyncAdapter`]: a remote peer spoken to over the JSON API.

use std::time::Duration;

use recollect_core::{
  attachment::AttachmentMimeType,
  event::Event,
  id::{AttachmentId, EventId},
};
use reqwest::{
  Client, RequestBuilder, Response,
  header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::Deserialize;
use tracing::warn;

use crate::{Error, Result, adapter::SyncAdapter, fetch::read_url};

/// Connection settings for a remote peer.
#[derive(Debug, Clone)]
pub struct HttpConfig {
  /// Base URL; endpoints are resolved as `{base_url}/events` and so on.
  pub base_url: String,
  /// Sent as `Authorization: Bearer <token>` when set.
  pub token:    Option<String>,
}

#[derive(Deserialize)]
struct ListEventsResponse {
  items: Vec<Event>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutEventsResponse {
  applied_count: usize,
}

/// HTTP client for a remote Recollect peer.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpSyncAdapter {
  client: Client,
  config: HttpConfig,
}

impl HttpSyncAdapter {
  pub fn new(config: HttpConfig) -> Result<Self> {
    let mut headers = HeaderMap::new();
    if let Some(token) = &config.token {
      let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
      value.set_sensitive(true);
      headers.insert(AUTHORIZATION, value);
    }
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .default_headers(headers)
      .build()?;
    Ok(Self { client, config })
  }

  /// The underlying client. It carries the peer's credentials, so it can
  /// also fetch the attachment URLs this adapter hands out.
  pub fn client(&self) -> &Client { &self.client }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
  }

  async fn send(&self, request: String, req: RequestBuilder) -> Result<Response> {
    let resp = req.send().await?;
    if !resp.status().is_success() {
      return Err(Error::Status { request, status: resp.status() });
    }
    Ok(resp)
  }
}

impl SyncAdapter for HttpSyncAdapter {
  fn id(&self) -> &str { &self.config.base_url }

  /// `GET /events?afterID=<id>&limit=<n>`
  async fn list_events(
    &self,
    after_id: Option<EventId>,
    limit: usize,
  ) -> Result<Vec<Event>> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(after_id) = after_id {
      query.push(("afterID", after_id.into_string()));
    }
    let req = self.client.get(self.url("/events")).query(&query);
    let resp = self.send("GET /events".into(), req).await?;
    Ok(resp.json::<ListEventsResponse>().await?.items)
  }

  /// `PUT /events`
  async fn put_events(&self, events: Vec<Event>) -> Result<usize> {
    let req = self.client.put(self.url("/events")).json(&events);
    let resp = self.send("PUT /events".into(), req).await?;
    Ok(resp.json::<PutEventsResponse>().await?.applied_count)
  }

  /// `POST /attachments/<id>`
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
    let path = format!("/attachments/{id}");
    let req = self
      .client
      .post(self.url(&path))
      .header(CONTENT_TYPE, mime_type.as_ref())
      .body(contents);
    self.send(format!("POST {path}"), req).await?;
    Ok(())
  }

  async fn get_url_for_attachment(
    &self,
    id: AttachmentId,
    _mime_type: AttachmentMimeType,
  ) -> Result<String> {
    Ok(self.url(&format!("/attachments/{id}")))
  }
}
