//! Authenticated HTTP client for the intranet v2 API
//!
//! Wraps reqwest::Client with bearer token injection and a single
//! invalidate-and-retry on 401.

use reqwest::StatusCode;
use std::sync::Arc;
use url::Url;

use crate::auth::TokenManager;
use crate::error::{Error, Result};
use crate::models::UserProfile;

pub struct IntraClient {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<TokenManager>,
}

impl IntraClient {
    pub fn new(http: reqwest::Client, base: &str, tokens: Arc<TokenManager>) -> Result<Self> {
        let base = Url::parse(base).map_err(|_| Error::MisconfiguredCredentials("api_base"))?;
        if base.cannot_be_a_base() {
            return Err(Error::MisconfiguredCredentials("api_base"));
        }
        Ok(Self { http, base, tokens })
    }

    /// Fetch a user profile by login.
    pub async fn fetch_user(&self, login: &str) -> Result<UserProfile> {
        let login = login.trim();
        // Dot segments would be resolved away and hit the user list instead
        if login.is_empty() || login == "." || login == ".." {
            return Err(Error::NotFound);
        }

        let url = self.endpoint(&["v2", "users", login])?;
        let resp = self.get(&url).await?;
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| Error::Decoding(e.to_string()))
    }

    /// Base URL plus percent-encoded path segments
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::MisconfiguredCredentials("api_base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Bearer GET. A 401 on the first attempt invalidates the stored tokens
    /// and retries once; a second 401 is final.
    async fn get(&self, url: &Url) -> Result<reqwest::Response> {
        let mut retried = false;
        loop {
            let token = self.tokens.get_valid_token().await?;
            tracing::debug!("GET {}", url);

            let resp = self.http.get(url.clone()).bearer_auth(&token).send().await?;

            if resp.status() == StatusCode::UNAUTHORIZED && !retried {
                tracing::warn!("401 Unauthorized for {}, invalidating token and retrying", url);
                self.tokens.invalidate_token().await?;
                retried = true;
                continue;
            }
            return check_response(resp, url);
        }
    }
}

/// Map non-success statuses onto the error taxonomy.
fn check_response(resp: reqwest::Response, url: &Url) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound);
    }
    if !status.is_success() {
        tracing::debug!("HTTP {} for {}", status.as_u16(), url);
        return Err(Error::Http(status.as_u16()));
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::manager::tests::{manager, seed, CannedPrompter};
    use crate::auth::store::MemoryStore;
    use chrono::{Duration, Utc};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn user_json(login: &str) -> serde_json::Value {
        serde_json::json!({
            "login": login,
            "email": format!("{}@student.42.fr", login),
            "cursus_users": [],
            "projects_users": []
        })
    }

    async fn setup(server: &MockServer) -> (IntraClient, Arc<CannedPrompter>) {
        let store = Arc::new(MemoryStore::default());
        seed(&store, "first", Utc::now() + Duration::hours(1), None);
        let prompter = CannedPrompter::code();
        let tokens = Arc::new(manager(server, store, prompter.clone()));
        let client = IntraClient::new(reqwest::Client::new(), &server.uri(), tokens).unwrap();
        (client, prompter)
    }

    async fn mount_login(server: &MockServer, access: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": access,
                "token_type": "bearer",
                "expires_in": 7200
            })))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_user_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/users/jdoe"))
            .and(header("Authorization", "Bearer first"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("jdoe")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, prompter) = setup(&server).await;
        let user = client.fetch_user("  jdoe ").await.unwrap();
        assert_eq!(user.login, "jdoe");
        assert_eq!(prompter.count(), 0);
    }

    #[tokio::test]
    async fn test_single_401_invalidates_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer first"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer second"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("jdoe")))
            .expect(1)
            .mount(&server)
            .await;
        mount_login(&server, "second", 1).await;

        let (client, prompter) = setup(&server).await;
        let user = client.fetch_user("jdoe").await.unwrap();
        assert_eq!(user.login, "jdoe");
        assert_eq!(prompter.count(), 1);
    }

    #[tokio::test]
    async fn test_double_401_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/users/jdoe"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        mount_login(&server, "second", 1).await;

        let (client, prompter) = setup(&server).await;
        assert!(matches!(
            client.fetch_user("jdoe").await,
            Err(Error::Http(401))
        ));
        assert_eq!(prompter.count(), 1);
    }

    #[tokio::test]
    async fn test_not_found_and_http_errors_do_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/users/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/users/busy"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let (client, prompter) = setup(&server).await;
        assert!(matches!(client.fetch_user("ghost").await, Err(Error::NotFound)));
        assert!(matches!(client.fetch_user("busy").await, Err(Error::Http(429))));
        assert_eq!(prompter.count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decoding_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"nope\": true}"))
            .mount(&server)
            .await;

        let (client, _) = setup(&server).await;
        assert!(matches!(
            client.fetch_user("jdoe").await,
            Err(Error::Decoding(_))
        ));
    }

    #[tokio::test]
    async fn test_login_is_path_escaped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/users/a%20b%2Fc%3F"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("a b/c?")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = setup(&server).await;
        assert_eq!(client.fetch_user("a b/c?").await.unwrap().login, "a b/c?");
    }

    #[tokio::test]
    async fn test_blank_login_skips_network() {
        let server = MockServer::start().await;
        let (client, _) = setup(&server).await;
        assert!(matches!(client.fetch_user("   ").await, Err(Error::NotFound)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dot_logins_never_reach_the_user_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("listed")))
            .expect(0)
            .mount(&server)
            .await;

        let (client, _) = setup(&server).await;
        for login in [".", "..", " .. "] {
            assert!(
                matches!(client.fetch_user(login).await, Err(Error::NotFound)),
                "login {:?}",
                login
            );
        }
    }

    #[tokio::test]
    async fn test_login_case_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/users/JDoe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("jdoe")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = setup(&server).await;
        assert_eq!(client.fetch_user("JDoe").await.unwrap().login, "jdoe");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let store = Arc::new(MemoryStore::default());
        let tokens = Arc::new(crate::auth::TokenManager::new(
            store,
            CannedPrompter::code(),
            crate::auth::oauth::OAuthClient::new(reqwest::Client::new(), "http://localhost"),
            Ok(crate::auth::manager::tests::creds()),
        ));
        let client =
            IntraClient::new(reqwest::Client::new(), "https://proxy.example/intra/", tokens).unwrap();
        let url = client.endpoint(&["v2", "users", "jdoe"]).unwrap();
        assert_eq!(url.as_str(), "https://proxy.example/intra/v2/users/jdoe");
    }
}
