//! Attachment storage.
//!
//! Attachments are streamed straight to disk chunk by chunk; the size limit is checked as the
//! chunks arrive, so an oversized file is aborted (and its partial copy removed) without ever
//! being held in memory. Results are returned to the caller only; nothing here is shared between
//! requests.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::errors::{Error, Result};
use crate::metrics;

const MAX_FILE_NAME_CHARS: usize = 100;

/// An attachment saved to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUpload {
    /// Sanitized original file name, as shown to the user
    pub file_name: String,
    /// Location on disk
    #[serde(skip_serializing)]
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    enabled: bool,
    directory: PathBuf,
    max_file_size: u64,
    max_files: usize,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            enabled: config.enabled,
            directory: config.directory.clone(),
            max_file_size: config.max_file_size,
            max_files: config.max_files,
            allowed_extensions: config.allowed_extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Value for the `accept` attribute of the file input, e.g. `.pdf,.docx`.
    pub fn accept_attribute(&self) -> String {
        self.allowed_extensions.iter().map(|e| format!(".{e}")).collect::<Vec<_>>().join(",")
    }

    /// Create the upload directory if it does not exist yet.
    pub async fn ensure_directory(&self) -> Result<()> {
        if self.enabled {
            tokio::fs::create_dir_all(&self.directory).await?;
            debug!("Upload directory ready at {}", self.directory.display());
        }
        Ok(())
    }

    /// Validate a client-supplied file name and return its sanitized form.
    pub fn check_file_name(&self, original: &str) -> Result<String> {
        let file_name = sanitize_file_name(original).ok_or_else(|| Error::BadRequest {
            message: format!("Invalid attachment file name: {original:?}"),
        })?;

        if !self.allowed_extensions.is_empty() {
            let extension = extension(&file_name);
            if !extension.as_ref().is_some_and(|ext| self.allowed_extensions.contains(ext)) {
                return Err(Error::BadRequest {
                    message: format!(
                        "File type of {file_name:?} is not allowed. Allowed types: {}",
                        self.allowed_extensions.join(", ")
                    ),
                });
            }
        }

        Ok(file_name)
    }

    /// Stream one attachment to disk.
    ///
    /// `already_stored` is the number of attachments saved earlier in the same request; it is
    /// used to enforce the per-submission file count.
    #[instrument(skip(self, stream))]
    pub async fn save<S, E>(&self, original_name: &str, already_stored: usize, stream: S) -> Result<StoredUpload>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<Error>,
    {
        if !self.enabled {
            metrics::record_upload("rejected");
            return Err(Error::BadRequest {
                message: "Attachments are not accepted by this server".to_string(),
            });
        }

        if already_stored >= self.max_files {
            metrics::record_upload("rejected");
            return Err(Error::BadRequest {
                message: format!("At most {} attachments can be uploaded at once", self.max_files),
            });
        }

        let file_name = match self.check_file_name(original_name) {
            Ok(name) => name,
            Err(e) => {
                metrics::record_upload("rejected");
                return Err(e);
            }
        };

        let path = self.directory.join(format!("{}-{}", Uuid::new_v4(), file_name));
        let mut file = tokio::fs::File::create(&path).await?;

        let size = match self.write_limited(&file_name, &mut file, stream).await {
            Ok(size) => size,
            Err(e) => {
                drop(file);
                remove_quietly(&path).await;
                let outcome = if matches!(e, Error::PayloadTooLarge { .. }) { "too_large" } else { "failed" };
                metrics::record_upload(outcome);
                return Err(e);
            }
        };

        metrics::record_upload("stored");
        info!(file_name = %file_name, size = size, path = %path.display(), "Stored attachment");

        Ok(StoredUpload { file_name, path, size })
    }

    /// Copy `stream` into `out` and flush it, failing as soon as more than `max_file_size` bytes
    /// have arrived. The caller removes whatever was written when this fails.
    async fn write_limited<W, S, E>(&self, file_name: &str, out: &mut W, stream: S) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<Error>,
    {
        let mut stream = std::pin::pin!(stream);
        let mut size = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Into::<Error>::into)?;

            size += chunk.len() as u64;
            if size > self.max_file_size {
                warn!(
                    file_name = %file_name,
                    size = size,
                    max_file_size = self.max_file_size,
                    "Attachment size limit exceeded, aborting upload"
                );
                return Err(Error::PayloadTooLarge {
                    message: format!(
                        "Attachment {file_name:?} exceeds the maximum allowed size of {} bytes ({} MB)",
                        self.max_file_size,
                        self.max_file_size / (1024 * 1024)
                    ),
                });
            }

            out.write_all(&chunk).await?;
        }

        out.flush().await?;
        Ok(size)
    }

    /// Remove attachments saved by a request that ended up failing.
    pub async fn discard(&self, uploads: &[StoredUpload]) {
        for upload in uploads {
            remove_quietly(&upload.path).await;
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove attachment {}: {}", path.display(), e);
    }
}

/// Reduce a client-supplied name to a safe single path component.
///
/// Directory parts are dropped, characters other than letters, digits, `.`, `-` and `_` become
/// `_`, leading dots are removed and the stem is shortened so the whole name fits in
/// [`MAX_FILE_NAME_CHARS`]. Returns `None` when nothing usable remains.
pub fn sanitize_file_name(original: &str) -> Option<String> {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        return None;
    }

    if cleaned.chars().count() <= MAX_FILE_NAME_CHARS {
        return Some(cleaned.to_string());
    }

    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.chars().count() < MAX_FILE_NAME_CHARS => {
            let keep = MAX_FILE_NAME_CHARS - ext.chars().count() - 1;
            Some(format!("{}.{}", stem.chars().take(keep).collect::<String>(), ext))
        }
        _ => Some(cleaned.chars().take(MAX_FILE_NAME_CHARS).collect()),
    }
}

fn extension(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}
