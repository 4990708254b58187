//! [`FsAttachmentStore`]: attachments as files in one directory.

use std::{
  io::{ErrorKind, Write as _},
  path::PathBuf,
};

use recollect_core::{
  attachment::{AttachmentMimeType, AttachmentStore},
  id::AttachmentId,
};
use reqwest::Url;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Stores each attachment as `<dir>/<id>.<ext>`.
///
/// Files are written to a temporary name in the same directory and renamed
/// into place, so a stored path only ever holds complete, verified bytes.
#[derive(Debug, Clone)]
pub struct FsAttachmentStore {
  dir: PathBuf,
}

impl FsAttachmentStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

  fn path_for(&self, id: &AttachmentId, mime_type: AttachmentMimeType) -> PathBuf {
    self.dir.join(format!("{id}.{}", mime_type.file_extension()))
  }
}

impl AttachmentStore for FsAttachmentStore {
  type Error = Error;

  async fn store_attachment(
    &self,
    contents: Vec<u8>,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> Result<()> {
    if let Err(err) = id.verify(&contents) {
      warn!(attachment_id = %id, "rejecting attachment with mismatched hash");
      return Err(err.into());
    }

    let path = self.path_for(&id, mime_type);
    if tokio::fs::try_exists(&path).await? {
      return Ok(());
    }

    let dir = self.dir.clone();
    tokio::task::spawn_blocking(move || {
      std::fs::create_dir_all(&dir)?;
      let mut file = tempfile::NamedTempFile::new_in(&dir)?;
      file.write_all(&contents)?;
      file.as_file().sync_all()?;
      file.persist(&path).map_err(|e| e.error)?;
      Ok::<_, Error>(())
    })
    .await??;

    debug!(attachment_id = %id, %mime_type, "stored attachment");
    Ok(())
  }

  async fn get_url_for_stored_attachment(
    &self,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> Result<Option<String>> {
    let path = self.path_for(&id, mime_type);
    if !tokio::fs::try_exists(&path).await? {
      return Ok(None);
    }
    let path = std::path::absolute(&path)?;
    let url = Url::from_file_path(&path)
      .map_err(|()| Error::UnsupportedUrl(path.display().to_string()))?;
    Ok(Some(url.to_string()))
  }

  async fn load_attachment(
    &self,
    id: AttachmentId,
    mime_type: AttachmentMimeType,
  ) -> Result<Option<Vec<u8>>> {
    let path = self.path_for(&id, mime_type);
    let contents = match tokio::fs::read(&path).await {
      Ok(contents) => contents,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };

    if let Err(err) = id.verify(&contents) {
      warn!(attachment_id = %id, path = %path.display(), "removing corrupt attachment");
      tokio::fs::remove_file(&path).await?;
      return Err(err.into());
    }
    Ok(Some(contents))
  }
}
