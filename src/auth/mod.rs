//! Authentication for the 42 intranet
//!
//! OAuth2 authorization-code flow with refresh, tokens kept in a secret store
//! and handed out by a single serialized [`TokenManager`].

pub mod manager;
pub mod oauth;
pub mod prompt;
pub mod store;
pub mod tokens;

mod commands;

pub use commands::{login, logout, status};
pub use manager::TokenManager;

use anyhow::Result;
use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use oauth::OAuthClient;
use store::{FileStore, KeyringStore, SecretStore};

/// Keyring service name the token entries live under
const KEYRING_SERVICE: &str = "intra-cli";

/// Open the configured secret store backend
pub fn open_store(config: &Config) -> Result<Arc<dyn SecretStore>> {
    Ok(match config.store {
        StoreBackend::Keyring => Arc::new(KeyringStore::new(KEYRING_SERVICE)),
        StoreBackend::File => {
            let path = Config::config_dir()?.join("secrets.toml");
            tracing::debug!("Using file secret store at {}", path.display());
            Arc::new(FileStore::new(path))
        }
    })
}

/// Wire a token manager from configuration.
pub fn token_manager(config: &Config) -> Result<TokenManager> {
    let credentials = config.credentials();
    let prompter = prompt::prompter_for(&config.redirect_uri, config.login_timeout());
    let oauth = OAuthClient::new(config.http_client()?, &config.api_base);
    Ok(TokenManager::new(open_store(config)?, prompter, oauth, credentials))
}
