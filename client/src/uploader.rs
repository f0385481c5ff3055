use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, multipart};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;

use crate::config::{ConfigError, Settings};
use crate::store::{CachedPhoto, PhotoStore, StoreError};

/// Multipart field every photo is sent under.
pub const FILES_FIELD: &str = "files";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const JPEG_MIME: &str = "image/jpeg";

/// Errors that can occur while sending a batch to the ingestion endpoint.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("failed to read {}: {source}", path.display())]
    ReadPhoto {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Cache(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Reply body of a successful ingestion request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReply {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    /// The cache was empty; nothing was sent.
    NoFiles,
    Success { sent: usize, reply: IngestReply },
    /// The endpoint answered with something other than 200.
    Rejected { status: StatusCode, body: String },
    /// Transport or local I/O failure.
    Failed(String),
}

/// Blocking client that sends every cached photo in one multipart request.
#[derive(Debug, Clone)]
pub struct BatchUploader {
    endpoint: String,
    http: Client,
    credential: String,
    store: Arc<PhotoStore>,
}

impl BatchUploader {
    pub fn new(
        endpoint: impl Into<String>,
        credential: impl Into<String>,
        store: Arc<PhotoStore>,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            http,
            credential: credential.into(),
            store,
        })
    }

    /// Sends the current contents of the cache as a single batch.
    ///
    /// The file list is snapshotted up front, so photos captured while the
    /// request is in flight wait for the next send. Cached files are never
    /// removed here.
    pub fn send_all(&self) -> UploadResult {
        let batch = match self.store.list_all() {
            Ok(batch) => batch,
            Err(err) => {
                warn!("Could not list cached photos: {err}");
                return UploadResult::Failed(err.to_string());
            }
        };
        if batch.is_empty() {
            info!("No cached photos to send");
            return UploadResult::NoFiles;
        }

        match self.send_batch(&batch) {
            Ok(None) => UploadResult::NoFiles,
            Ok(Some((sent, reply))) => {
                info!(
                    "Sent {sent} photos to {}: {} stored, {} failed",
                    self.endpoint,
                    reply.file_ids.len(),
                    reply.failed
                );
                UploadResult::Success { sent, reply }
            }
            Err(UploadError::UnexpectedStatus { status, body }) => {
                warn!("Ingestion endpoint rejected {} photos with {status}: {body}", batch.len());
                UploadResult::Rejected { status, body }
            }
            Err(err) => {
                warn!("Sending {} photos failed: {err}", batch.len());
                UploadResult::Failed(err.to_string())
            }
        }
    }

    fn send_batch(&self, batch: &[CachedPhoto]) -> Result<Option<(usize, IngestReply)>, UploadError> {
        let mut form = multipart::Form::new();
        let mut sent = 0usize;
        for photo in batch {
            let bytes = match fs::read(&photo.path) {
                Ok(bytes) => bytes,
                // Cleared between the listing and the read.
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    warn!("Skipping {}: no longer cached", photo.path.display());
                    continue;
                }
                Err(source) => {
                    return Err(UploadError::ReadPhoto {
                        path: photo.path.clone(),
                        source,
                    });
                }
            };

            let part = multipart::Part::bytes(bytes)
                .file_name(photo.file_name())
                .mime_str(JPEG_MIME)?;
            form = form.part(FILES_FIELD, part);
            sent += 1;
        }
        if sent == 0 {
            return Ok(None);
        }

        let request = self.http.post(&self.endpoint).multipart(form);
        let response = self.authorized(request).send()?;

        if response.status() == StatusCode::OK {
            let reply = response.json().unwrap_or_default();
            Ok(Some((sent, reply)))
        } else {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            Err(UploadError::UnexpectedStatus { status, body })
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Bearer {}", self.credential))
    }
}

/// Sends whatever is queued using `settings`.
///
/// An empty queue is reported as [`UploadResult::NoFiles`] before the token
/// is looked at, so nothing needs configuring just to learn there is nothing
/// to send.
pub fn send_queued(settings: &Settings, store: Arc<PhotoStore>) -> Result<UploadResult, UploadError> {
    if store.list_all()?.is_empty() {
        info!("No cached photos to send");
        return Ok(UploadResult::NoFiles);
    }

    let uploader = BatchUploader::new(
        settings.api_url.as_str(),
        settings.token()?,
        store,
        settings.timeout,
    )?;
    info!("Sending cached photos to {}", uploader.endpoint);
    Ok(uploader.send_all())
}
