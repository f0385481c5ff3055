//! Storage backends uploaded files are forwarded to.
//!
//! Google Drive is the production backend. When LOCAL_STORAGE_PATH is set,
//! files go to a plain directory tree instead.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use google_drive3 as drive3;

/// What the storage side needs to know about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
    /// Drive folder id (or local sub-folder) the file is created in.
    pub parent_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage rejected {name}: {reason}")]
    Rejected { name: String, reason: String },
    #[error("invalid file name `{0}`")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Creates a new file and returns the id the backend assigned to it.
    async fn store(&self, bytes: Bytes, meta: &FileMetadata) -> Result<String, StorageError>;
}

type Hub = drive3::DriveHub<
    drive3::hyper_rustls::HttpsConnector<
        drive3::hyper_util::client::legacy::connect::HttpConnector,
    >,
>;

/// Google Drive through a service account.
///
/// The destination folder must be shared with the service account's
/// `client_email`; new files inherit the folder's permissions.
pub struct DriveBackend {
    hub: Hub,
}

impl DriveBackend {
    pub async fn connect(service_account_json: &str) -> anyhow::Result<Self> {
        let key = drive3::yup_oauth2::parse_service_account_key(service_account_json)
            .context("parse service account key")?;

        let connector = drive3::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("load native root certs")?
            .https_only()
            .enable_http2()
            .build();

        let client = drive3::hyper_util::client::legacy::Client::builder(
            drive3::hyper_util::rt::TokioExecutor::new(),
        )
        .build(connector.clone());

        let auth = drive3::yup_oauth2::ServiceAccountAuthenticator::with_client(
            key,
            drive3::hyper_util::client::legacy::Client::builder(
                drive3::hyper_util::rt::TokioExecutor::new(),
            )
            .build::<_, String>(connector),
        )
        .build()
        .await
        .context("build service account authenticator")?;

        Ok(Self {
            hub: drive3::DriveHub::new(client, auth),
        })
    }
}

#[async_trait]
impl StorageBackend for DriveBackend {
    async fn store(&self, bytes: Bytes, meta: &FileMetadata) -> Result<String, StorageError> {
        let rejected = |reason: String| StorageError::Rejected {
            name: meta.name.clone(),
            reason,
        };

        let mime: mime::Mime = meta
            .mime_type
            .parse()
            .map_err(|e| rejected(format!("bad mime type {}: {e}", meta.mime_type)))?;

        let file = drive3::api::File {
            name: Some(meta.name.clone()),
            mime_type: Some(meta.mime_type.clone()),
            parents: Some(vec![meta.parent_id.clone()]),
            ..Default::default()
        };

        let (_resp, created) = self
            .hub
            .files()
            .create(file)
            .supports_all_drives(true)
            .param("fields", "id")
            .upload(Cursor::new(bytes.to_vec()), mime)
            .await
            .map_err(|e| rejected(e.to_string()))?;

        created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| rejected("response carried no file id".into()))
    }
}

/// Writes `<root>/<parent_id>/<uuid>-<name>` and hands back the uuid.
pub struct LocalFolderBackend {
    root: PathBuf,
}

impl LocalFolderBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Keeps only the final path component, so a part's filename can never
/// escape the destination folder.
fn safe_component(raw: &str) -> Option<&str> {
    let name = Path::new(raw).file_name()?.to_str()?;
    (!name.is_empty() && name != "..").then_some(name)
}

#[async_trait]
impl StorageBackend for LocalFolderBackend {
    async fn store(&self, bytes: Bytes, meta: &FileMetadata) -> Result<String, StorageError> {
        let name = safe_component(&meta.name)
            .ok_or_else(|| StorageError::InvalidName(meta.name.clone()))?;
        let folder = safe_component(&meta.parent_id)
            .ok_or_else(|| StorageError::InvalidName(meta.parent_id.clone()))?;

        let dir = self.root.join(folder);
        tokio::fs::create_dir_all(&dir).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let path = dir.join(format!("{id}-{name}"));
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Saved file locally");
        Ok(id)
    }
}
