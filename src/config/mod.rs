//! Configuration loading and OAuth client credentials

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

pub const DEFAULT_API_BASE: &str = "https://api.intra.42.fr";

/// Where tokens are persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Platform keychain / credential manager / kernel keyring
    #[default]
    Keyring,
    /// 0600 file in the config directory
    File,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OAuth2 application UID
    pub client_id: String,
    /// OAuth2 application secret
    pub client_secret: String,
    /// Redirect URI registered for the application
    pub redirect_uri: String,
    /// Base URL for both the OAuth and the v2 API endpoints
    pub api_base: String,
    /// Upper bound for every HTTP request
    pub request_timeout_secs: u64,
    /// Upper bound for waiting on the browser login
    pub login_timeout_secs: u64,
    /// Token persistence backend
    pub store: StoreBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: 30,
            login_timeout_secs: 300,
            store: StoreBackend::Keyring,
        }
    }
}

/// Validated OAuth client credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("fr", "42", "intra-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read config file")?;
            Self::from_toml(&content)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse config file")?;
        config.redirect_uri = unescape_slashes(&config.redirect_uri);
        Ok(config)
    }

    /// Overlay values from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("INTRA_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = lookup("INTRA_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = lookup("INTRA_REDIRECT_URI") {
            self.redirect_uri = unescape_slashes(&v);
        }
        if let Some(v) = lookup("INTRA_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = lookup("INTRA_STORE") {
            match v.to_ascii_lowercase().as_str() {
                "keyring" => self.store = StoreBackend::Keyring,
                "file" => self.store = StoreBackend::File,
                other => tracing::warn!("Ignoring unknown INTRA_STORE value {:?}", other),
            }
        }
    }

    /// Client id, secret and redirect URI, all required non-empty.
    pub fn credentials(&self) -> Result<Credentials, Error> {
        let client_id = self.client_id.trim();
        if client_id.is_empty() {
            return Err(Error::MisconfiguredCredentials("client_id"));
        }
        let client_secret = self.client_secret.trim();
        if client_secret.is_empty() {
            return Err(Error::MisconfiguredCredentials("client_secret"));
        }
        let redirect_uri = self.redirect_uri.trim();
        if redirect_uri.is_empty() {
            return Err(Error::MisconfiguredCredentials("redirect_uri"));
        }
        Ok(Credentials {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    /// Shared HTTP client with the configured timeout
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .user_agent(concat!("intra-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")
    }
}

/// xcconfig-style values escape `/` as `\/`.
fn unescape_slashes(raw: &str) -> String {
    raw.replace("\\/", "/")
}
