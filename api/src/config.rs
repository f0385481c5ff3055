//! Startup configuration, read from the environment (and `.env` via dotenv).

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_LOCAL_FOLDER, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PORT, GOOGLE_JWKS_URL,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("SERVICE_ACCOUNT_KEY is not a usable service account key: {0}")]
    InvalidKey(String),
    #[error("{var} must be a positive number, got `{value}`")]
    InvalidNumber { var: &'static str, value: String },
}

/// Where accepted files end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Google Drive through a service account; holds the raw key JSON.
    Drive { service_account_key: String },
    /// Plain directory tree, for development and tests.
    Local { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// OAuth client id every token's audience must match.
    pub client_id: String,
    /// Drive folder (or local sub-folder) new files are placed in.
    pub destination_id: String,
    pub storage: StorageConfig,
    pub jwks_url: String,
    pub port: u16,
    pub max_upload_bytes: u64,
}

#[derive(Deserialize)]
struct ServiceAccountFields {
    #[serde(default)]
    client_email: String,
    #[serde(default)]
    private_key: String,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let client_id = required(&var, "CLIENT_ID")?;

        let local_root = var("LOCAL_STORAGE_PATH")
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty());

        let (storage, destination_id) = match local_root {
            Some(root) => {
                let folder = var("DRIVE_FOLDER_ID")
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| DEFAULT_LOCAL_FOLDER.to_string());
                (
                    StorageConfig::Local {
                        root: PathBuf::from(root),
                    },
                    folder,
                )
            }
            None => {
                let key = required(&var, "SERVICE_ACCOUNT_KEY")?;
                validate_service_account_key(&key)?;
                let folder = required(&var, "DRIVE_FOLDER_ID")?;
                (
                    StorageConfig::Drive {
                        service_account_key: key,
                    },
                    folder,
                )
            }
        };

        let jwks_url = var("JWKS_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| GOOGLE_JWKS_URL.to_string());

        let port = match var("PORT") {
            Some(raw) => parse_positive(&raw, "PORT")?,
            None => DEFAULT_PORT,
        };
        let max_upload_bytes = match var("MAX_UPLOAD_BYTES") {
            Some(raw) => parse_positive(&raw, "MAX_UPLOAD_BYTES")?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            client_id,
            destination_id,
            storage,
            jwks_url,
            port,
            max_upload_bytes,
        })
    }
}

fn required(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    let value = var(name).ok_or(ConfigError::Missing(name))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Empty(name));
    }
    Ok(trimmed.to_string())
}

fn parse_positive<N>(raw: &str, var: &'static str) -> Result<N, ConfigError>
where
    N: std::str::FromStr + PartialEq + Default,
{
    match raw.trim().parse::<N>() {
        Ok(value) if value != N::default() => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            var,
            value: raw.to_string(),
        }),
    }
}

fn validate_service_account_key(raw: &str) -> Result<(), ConfigError> {
    let fields: ServiceAccountFields =
        serde_json::from_str(raw).map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
    if fields.client_email.trim().is_empty() {
        return Err(ConfigError::InvalidKey("client_email is missing".into()));
    }
    if fields.private_key.trim().is_empty() {
        return Err(ConfigError::InvalidKey("private_key is missing".into()));
    }
    Ok(())
}
