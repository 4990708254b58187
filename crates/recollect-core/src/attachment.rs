//! Content-addressed attachments.
//!
//! An attachment's ID is the lowercase hex SHA-256 of its bytes, so any
//! holder of the bytes can check a claimed ID. Stores implement
//! [`AttachmentStore`]; no binary data lives in the event log.

use std::future::Future;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result, id::AttachmentId};

/// Supported attachment formats.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
pub enum AttachmentMimeType {
  #[serde(rename = "image/png")]
  #[strum(serialize = "image/png")]
  Png,
  #[serde(rename = "image/jpeg")]
  #[strum(serialize = "image/jpeg")]
  Jpeg,
  #[serde(rename = "image/svg+xml")]
  #[strum(serialize = "image/svg+xml")]
  Svg,
}

impl AttachmentMimeType {
  /// Parse a MIME type string, e.g. from a `Content-Type` header.
  pub fn parse(s: &str) -> Result<Self> {
    let essence = s.split(';').next().unwrap_or_default().trim();
    essence
      .parse()
      .map_err(|_| Error::UnsupportedMimeType(s.to_owned()))
  }

  /// Guess from a file name's extension.
  pub fn from_file_name(name: &str) -> Option<Self> {
    let upper = name.to_ascii_uppercase();
    if upper.ends_with(".PNG") {
      Some(Self::Png)
    } else if upper.ends_with(".JPG") || upper.ends_with(".JPEG") {
      Some(Self::Jpeg)
    } else if upper.ends_with(".SVG") {
      Some(Self::Svg)
    } else {
      None
    }
  }

  pub fn file_extension(self) -> &'static str {
    match self {
      Self::Png => "png",
      Self::Jpeg => "jpg",
      Self::Svg => "svg",
    }
  }
}

impl AttachmentId {
  /// The ID the given bytes are addressed by.
  pub fn for_contents(contents: &[u8]) -> Self {
    Self::from(hex::encode(Sha256::digest(contents)))
  }

  /// Check that `contents` hash to this ID.
  pub fn verify(&self, contents: &[u8]) -> Result<()> {
    let actual = Self::for_contents(contents);
    if &actual == self {
      Ok(())
    } else {
      Err(Error::AttachmentIntegrity { claimed: self.clone(), actual })
    }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a blob store holding attachment bytes.
///
/// Implementations must validate content hashes on the way in and on the way
/// out, and must never leave a partially written or mismatched blob
/// resolvable under an ID.
pub trait AttachmentStore: Send + Sync {
  type Error: std::error::Error + From<Error> + Send + Sync + 'static;

  /// Store `contents` under `id`. Storing an ID that already exists is a
  /// validated no-op.
  fn store_attachment(
    &self,
    contents: Vec<u8>,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// If the attachment is stored, a URL from which its bytes can be read.
  fn get_url_for_stored_attachment(
    &self,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  /// Read back a stored attachment, re-validating its hash.
  fn load_attachment(
    &self,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_are_sha256_hex() {
    let id = AttachmentId::for_contents(b"Test");
    assert_eq!(
      id.as_str(),
      "532eaabd9574880dbf76b9b8cc00832c20a6ec113d682299550d7a6e0f345e25"
    );
    assert!(id.verify(b"Test").is_ok());
  }

  #[test]
  fn verify_rejects_other_bytes() {
    let id = AttachmentId::for_contents(b"Test");
    let err = id.verify(b"Tampered").unwrap_err();
    assert!(matches!(err, Error::AttachmentIntegrity { claimed, .. } if claimed == id));
  }

  #[test]
  fn mime_types_round_trip_through_strings() {
    assert_eq!(
      AttachmentMimeType::parse("image/png; charset=binary").unwrap(),
      AttachmentMimeType::Png
    );
    assert_eq!(AttachmentMimeType::Svg.as_ref(), "image/svg+xml");
    assert!(AttachmentMimeType::parse("text/html").is_err());
    assert_eq!(
      AttachmentMimeType::from_file_name("photo.JPEG"),
      Some(AttachmentMimeType::Jpeg)
    );
  }
}
