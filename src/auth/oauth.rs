//! OAuth2 authorization-code and refresh grants against the intranet

use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope, TokenUrl,
};
use reqwest::StatusCode;

use super::tokens::TokenResponse;
use crate::config::Credentials;
use crate::error::{Error, Result};

pub const SCOPE: &str = "public";

/// One login attempt's parameters. Never persisted.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Random nonce the callback must echo back
    pub state: String,
    pub redirect_uri: String,
    pub client_id: String,
    /// Fully built authorize URL to present to the user
    pub url: url::Url,
}

/// Outcome of a refresh grant that reached the server
#[derive(Debug)]
pub enum RefreshOutcome {
    Refreshed(TokenResponse),
    /// 400/401: the refresh token is dead
    Rejected(u16),
}

/// Token endpoint client for one OAuth application
pub struct OAuthClient {
    http: reqwest::Client,
    authorize_url: String,
    token_url: String,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            http,
            authorize_url: format!("{}/oauth/authorize", base),
            token_url: format!("{}/oauth/token", base),
        }
    }

    /// Build the authorize URL with a freshly generated `state`.
    pub fn authorization_request(&self, creds: &Credentials) -> Result<AuthorizationRequest> {
        let client = BasicClient::new(
            ClientId::new(creds.client_id.clone()),
            Some(ClientSecret::new(creds.client_secret.clone())),
            AuthUrl::new(self.authorize_url.clone())
                .map_err(|_| Error::MisconfiguredCredentials("api_base"))?,
            Some(
                TokenUrl::new(self.token_url.clone())
                    .map_err(|_| Error::MisconfiguredCredentials("api_base"))?,
            ),
        )
        .set_redirect_uri(
            RedirectUrl::new(creds.redirect_uri.clone())
                .map_err(|_| Error::MisconfiguredCredentials("redirect_uri"))?,
        );

        let (url, state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(SCOPE.to_string()))
            .url();

        Ok(AuthorizationRequest {
            state: state.secret().clone(),
            redirect_uri: creds.redirect_uri.clone(),
            client_id: creds.client_id.clone(),
            url,
        })
    }

    /// Exchange a one-time authorization code for tokens.
    pub async fn exchange_code(&self, creds: &Credentials, code: &str) -> Result<TokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", creds.redirect_uri.as_str()),
        ];
        let resp = self.post_token(&form).await?;

        let status = resp.status();
        if !status.is_success() {
            tracing::debug!("Code exchange failed: HTTP {}", status.as_u16());
            return Err(Error::Http(status.as_u16()));
        }
        decode(resp).await
    }

    /// Redeem a refresh token. Rejections come back as `Ok(Rejected)`;
    /// every other failure is an `Err`.
    pub async fn refresh(&self, creds: &Credentials, refresh_token: &str) -> Result<RefreshOutcome> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let resp = self.post_token(&form).await?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Ok(RefreshOutcome::Rejected(status.as_u16()));
        }
        if !status.is_success() {
            return Err(Error::Http(status.as_u16()));
        }
        Ok(RefreshOutcome::Refreshed(decode(resp).await?))
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<reqwest::Response> {
        tracing::debug!("POST {}", self.token_url);
        Ok(self.http.post(&self.token_url).form(form).send().await?)
    }
}

async fn decode(resp: reqwest::Response) -> Result<TokenResponse> {
    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
