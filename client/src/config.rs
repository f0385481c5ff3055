//! Client settings: `~/.shutterqueue/config.json`, overridden by env vars.
//!
//! The API token is only ever read from the environment or the command line;
//! it is never written to disk.

use std::env;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::uploader::DEFAULT_TIMEOUT;

pub const TOKEN_ENV: &str = "SHUTTERQUEUE_TOKEN";
pub const API_URL_ENV: &str = "SHUTTERQUEUE_API_URL";
pub const CACHE_ROOT_ENV: &str = "SHUTTERQUEUE_CACHE_ROOT";
pub const DEFAULT_API_URL: &str = "http://localhost:3000/upload";
const CONFIG_DIR: &str = ".shutterqueue";
const CONFIG_FILE: &str = "config.json";
const APP_CACHE_DIR: &str = "shutterqueue";

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Full ingestion URL, e.g. "https://photos.example.com/upload".
    #[serde(default)]
    pub api_url: Option<String>,
    /// Directory that holds `temp_images/`. Defaults to the platform cache dir.
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine the home directory for {CONFIG_DIR}/{CONFIG_FILE}")]
    NoHome,
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} must provide a non-empty API token")]
    EmptyToken(String),
    #[error("no API token: pass --token or set {TOKEN_ENV}")]
    MissingToken,
    #[error("invalid API url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Settings after merging the config file, environment, and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: Url,
    pub token: Option<String>,
    pub cache_root: PathBuf,
    pub timeout: Duration,
}

impl Settings {
    /// Environment wins over the config file, which wins over defaults.
    pub fn resolve(
        file: ClientConfig,
        env_var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw_url = env_var(API_URL_ENV)
            .filter(|url| !url.trim().is_empty())
            .or(file.api_url.filter(|url| !url.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(raw_url.trim()).map_err(|source| ConfigError::InvalidUrl {
            url: raw_url.clone(),
            source,
        })?;

        let token = env_var(TOKEN_ENV)
            .map(|token| validate_token(&token, TOKEN_ENV))
            .transpose()?;

        let cache_root = env_var(CACHE_ROOT_ENV)
            .map(PathBuf::from)
            .or(file.cache_root)
            .unwrap_or_else(default_cache_root);

        let timeout = file
            .timeout_secs
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        Ok(Self {
            api_url,
            token,
            cache_root,
            timeout,
        })
    }

    /// Loads `~/.shutterqueue/config.json` and applies the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = load_config(&config_path()?)?;
        Self::resolve(file, |key| env::var(key).ok())
    }

    /// A token given on the command line wins over the environment.
    pub fn with_token(mut self, token: Option<String>) -> Result<Self, ConfigError> {
        if let Some(token) = token {
            self.token = Some(validate_token(&token, "--token")?);
        }
        Ok(self)
    }

    pub fn token(&self) -> Result<&str, ConfigError> {
        self.token.as_deref().ok_or(ConfigError::MissingToken)
    }
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Reads the config file; a missing file is an empty config.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ClientConfig::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_token(token: &str, context: &str) -> Result<String, ConfigError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        Err(ConfigError::EmptyToken(context.to_string()))
    } else {
        Ok(trimmed.to_owned())
    }
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join(APP_CACHE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let settings = Settings::resolve(ClientConfig::default(), env_of(&[])).unwrap();
        assert_eq!(settings.api_url.as_str(), DEFAULT_API_URL);
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert!(settings.cache_root.ends_with(APP_CACHE_DIR));
        assert!(matches!(settings.token(), Err(ConfigError::MissingToken)));
    }

    #[test]
    fn environment_overrides_file() {
        let file = ClientConfig {
            api_url: Some("https://file.example.com/upload".into()),
            cache_root: Some("/var/file-cache".into()),
            timeout_secs: Some(5),
        };
        let settings = Settings::resolve(
            file,
            env_of(&[
                (TOKEN_ENV, "  from-env "),
                (API_URL_ENV, "https://env.example.com/upload"),
                (CACHE_ROOT_ENV, "/var/env-cache"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.token().unwrap(), "from-env");
        assert_eq!(settings.api_url.host_str(), Some("env.example.com"));
        assert_eq!(settings.cache_root, PathBuf::from("/var/env-cache"));
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn blank_token_is_rejected() {
        assert!(matches!(
            Settings::resolve(ClientConfig::default(), env_of(&[(TOKEN_ENV, "   ")])),
            Err(ConfigError::EmptyToken(_))
        ));

        let settings = Settings::resolve(ClientConfig::default(), env_of(&[])).unwrap();
        assert!(matches!(
            settings.with_token(Some(String::new())),
            Err(ConfigError::EmptyToken(_))
        ));
    }

    #[test]
    fn command_line_token_wins() {
        let settings = Settings::resolve(ClientConfig::default(), env_of(&[(TOKEN_ENV, "env")]))
            .unwrap()
            .with_token(Some("flag".into()))
            .unwrap();
        assert_eq!(settings.token().unwrap(), "flag");
    }

    #[test]
    fn token_in_config_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"api_token":"leaked","timeout_secs":10}"#).unwrap();

        let settings = Settings::resolve(load_config(&path).unwrap(), env_of(&[])).unwrap();
        assert_eq!(settings.token, None);
        assert_eq!(settings.timeout, Duration::from_secs(10));
    }

    #[test]
    fn malformed_url_is_rejected() {
        let result = Settings::resolve(ClientConfig::default(), env_of(&[(API_URL_ENV, "not a url")]));
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn missing_config_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn corrupt_config_reports_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }
}
