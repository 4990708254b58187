//! Reading attachment bytes from a source URL.

use reqwest::{Client, Url};

use crate::{Error, Result};

/// Read the bytes at `url`. `file://` URLs are read from disk; `http(s)://`
/// URLs are fetched with `client`.
pub async fn read_url(client: &Client, url: &str) -> Result<Vec<u8>> {
  let parsed = Url::parse(url).map_err(|_| Error::UnsupportedUrl(url.to_owned()))?;
  match parsed.scheme() {
    "file" => {
      let path = parsed
        .to_file_path()
        .map_err(|()| Error::UnsupportedUrl(url.to_owned()))?;
      Ok(tokio::fs::read(path).await?)
    }
    "http" | "https" => {
      let resp = client.get(parsed).send().await?;
      if !resp.status().is_success() {
        return Err(Error::Status {
          request: format!("GET {url}"),
          status:  resp.status(),
        });
      }
      Ok(resp.bytes().await?.to_vec())
    }
    _ => Err(Error::UnsupportedUrl(url.to_owned())),
  }
}
