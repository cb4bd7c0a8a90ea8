//! Token lifecycle: load, validate, refresh, re-authorize, invalidate
//!
//! Every operation runs under one async mutex, so at most one refresh or
//! interactive login is in flight per process. Callers that queued behind it
//! re-read the store once they get the lock and pick up its result.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::oauth::{OAuthClient, RefreshOutcome};
use super::prompt::AuthorizationPrompter;
use super::store::SecretStore;
use super::tokens::{decode_expiry, encode_expiry, TokenRecord, TokenResponse, TokenState};
use crate::config::Credentials;
use crate::error::{Error, Result};

const ACCESS_TOKEN_KEY: &str = "intra_access_token";
const EXPIRY_KEY: &str = "intra_token_expiry_date";
const REFRESH_TOKEN_KEY: &str = "intra_refresh_token";

/// Snapshot for `status`
#[derive(Debug, Clone)]
pub struct TokenStatus {
    pub state: TokenState,
    pub expiry: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
}

/// Sole owner of the persisted token entries
pub struct TokenManager {
    store: Arc<dyn SecretStore>,
    prompter: Arc<dyn AuthorizationPrompter>,
    oauth: OAuthClient,
    /// `Err` holds the name of the missing setting
    credentials: std::result::Result<Credentials, &'static str>,
    lock: Mutex<()>,
}

impl TokenManager {
    /// `credentials` is validated lazily: a misconfigured client only fails
    /// once a token exchange is actually needed.
    pub fn new(
        store: Arc<dyn SecretStore>,
        prompter: Arc<dyn AuthorizationPrompter>,
        oauth: OAuthClient,
        credentials: std::result::Result<Credentials, Error>,
    ) -> Self {
        let credentials = credentials.map_err(|e| match e {
            Error::MisconfiguredCredentials(field) => field,
            _ => "client credentials",
        });
        Self {
            store,
            prompter,
            oauth,
            credentials,
            lock: Mutex::new(()),
        }
    }

    /// Return an access token that is good for at least the refresh margin,
    /// refreshing or logging in as needed.
    pub async fn get_valid_token(&self) -> Result<String> {
        let _guard = self.lock.lock().await;

        let record = self.load_record()?;
        if let Some(record) = &record {
            match record.state_at(Utc::now()) {
                TokenState::Valid => {
                    tracing::debug!("Using cached access token (expires {})", record.expiry);
                    return Ok(record.access_token.clone());
                }
                state => tracing::info!("Access token {}, renewing...", state),
            }
        } else {
            tracing::info!("No cached access token");
        }

        if let Some(token) = self.refresh_if_possible().await? {
            return Ok(token);
        }
        self.authorize_and_store().await
    }

    /// Drop all three entries. Used when the server rejects a token the
    /// local clock still considers valid.
    pub async fn invalidate_token(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        tracing::info!("Invalidating stored tokens");
        self.store.delete(ACCESS_TOKEN_KEY)?;
        self.store.delete(EXPIRY_KEY)?;
        self.store.delete(REFRESH_TOKEN_KEY)?;
        Ok(())
    }

    pub async fn status(&self) -> Result<TokenStatus> {
        let _guard = self.lock.lock().await;
        let record = self.load_record()?;
        let has_refresh_token = self.load_string(REFRESH_TOKEN_KEY)?.is_some();
        Ok(match record {
            Some(r) => TokenStatus {
                state: r.state_at(Utc::now()),
                expiry: Some(r.expiry),
                has_refresh_token,
            },
            None => TokenStatus {
                state: TokenState::NoToken,
                expiry: None,
                has_refresh_token,
            },
        })
    }

    /// `Ok(None)` means "no usable refresh token, log in instead".
    async fn refresh_if_possible(&self) -> Result<Option<String>> {
        let Some(refresh_token) = self.load_string(REFRESH_TOKEN_KEY)? else {
            return Ok(None);
        };
        let creds = self.credentials()?;

        tracing::info!("Refreshing access token...");
        match self.oauth.refresh(creds, &refresh_token).await? {
            RefreshOutcome::Refreshed(resp) => {
                let token = self.save_response(resp)?;
                tracing::info!("Access token refreshed");
                Ok(Some(token))
            }
            RefreshOutcome::Rejected(status) => {
                tracing::warn!(
                    "Refresh token rejected (HTTP {}), discarding it; interactive login required",
                    status
                );
                self.store.delete(REFRESH_TOKEN_KEY)?;
                Ok(None)
            }
        }
    }

    async fn authorize_and_store(&self) -> Result<String> {
        let code = self.authorize_interactively().await?;
        let creds = self.credentials()?;

        tracing::info!("Exchanging authorization code for tokens...");
        let resp = self.oauth.exchange_code(creds, &code).await?;
        let token = self.save_response(resp)?;
        tracing::info!("Login successful");
        Ok(token)
    }

    /// Build a fresh authorization request and have the prompter resolve it
    /// to a one-time code.
    async fn authorize_interactively(&self) -> Result<String> {
        let creds = self.credentials()?;
        let request = self.oauth.authorization_request(creds)?;
        tracing::info!(
            client_id = %request.client_id,
            redirect_uri = %request.redirect_uri,
            "Starting interactive login..."
        );
        self.prompter.authorize(&request).await
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .map_err(|field| Error::MisconfiguredCredentials(*field))
    }

    /// Persist a token response. The refresh token is only replaced if the
    /// server issued a new one.
    fn save_response(&self, resp: TokenResponse) -> Result<String> {
        let record = TokenRecord::issued(resp, Utc::now())?;
        self.store_record(&record)?;
        Ok(record.access_token)
    }

    fn store_record(&self, record: &TokenRecord) -> Result<()> {
        self.store.set(ACCESS_TOKEN_KEY, record.access_token.as_bytes())?;
        // A new access token must never be paired with the previous expiry
        if let Err(e) = self.store.set(EXPIRY_KEY, &encode_expiry(record.expiry)) {
            if let Err(cleanup) = self.store.delete(ACCESS_TOKEN_KEY) {
                tracing::warn!("Failed to drop unpaired access token: {}", cleanup);
            }
            return Err(e);
        }
        if let Some(rt) = &record.refresh_token {
            self.store.set(REFRESH_TOKEN_KEY, rt.as_bytes())?;
        }
        Ok(())
    }

    fn load_record(&self) -> Result<Option<TokenRecord>> {
        let Some(access_token) = self.load_string(ACCESS_TOKEN_KEY)? else {
            return Ok(None);
        };
        let Some(expiry) = self.store.get(EXPIRY_KEY)?.and_then(|b| decode_expiry(&b)) else {
            return Ok(None);
        };
        Ok(Some(TokenRecord {
            access_token,
            expiry,
            refresh_token: self.load_string(REFRESH_TOKEN_KEY)?,
        }))
    }

    fn load_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get(key)?
            .and_then(|bytes| String::from_utf8(bytes).ok()))
    }
}
