//! Interactive authorization: get a one-time code from the user
//!
//! The browser is pointed at the authorize URL; the provider redirects back
//! to the configured redirect URI with `code` and `state`. A loopback redirect
//! (`http://127.0.0.1:<port>/...`) is captured by a short-lived local axum server.
//! Anything else (a custom app scheme) cannot reach a CLI, so the user pastes
//! the final URL instead.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::io::IsTerminal;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use super::oauth::AuthorizationRequest;
use crate::error::{Error, Result};

/// How long a stopping callback server may take to finish its last response
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>intra-cli</title></head>\
<body><h1>Logged in</h1><p>You can close this window.</p></body></html>";
const FAILURE_PAGE: &str = "<!DOCTYPE html><html><head><title>intra-cli</title></head>\
<body><h1>Login failed</h1><p>Return to the terminal for details.</p></body></html>";

/// Something that can show the authorize URL and hand back a code
#[async_trait]
pub trait AuthorizationPrompter: Send + Sync {
    /// Present `request.url` and wait for exactly one callback.
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<String>;
}

/// Query parameters the provider appends to the redirect URI
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl CallbackParams {
    fn from_url(callback: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in callback.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }

    /// The one-time code, provided the echoed state matches.
    fn into_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            tracing::debug!("Authorization callback carried error={}", error);
            return Err(if error == "access_denied" {
                Error::UserCancelled
            } else {
                Error::CallbackMismatch
            });
        }

        if self.state.as_deref() != Some(expected_state) {
            tracing::warn!("Authorization callback state mismatch, rejecting");
            return Err(Error::CallbackMismatch);
        }

        self.code
            .filter(|c| !c.is_empty())
            .ok_or(Error::CallbackMismatch)
    }
}

/// Extract the code from a redirect callback, checking the echoed state.
pub fn parse_callback(callback: &Url, expected_state: &str) -> Result<String> {
    CallbackParams::from_url(callback).into_code(expected_state)
}

/// Pick the prompter suited to the redirect URI.
pub fn prompter_for(redirect_uri: &str, timeout: Duration) -> Arc<dyn AuthorizationPrompter> {
    match Url::parse(redirect_uri) {
        Ok(url) if is_loopback(&url) => Arc::new(LoopbackPrompter::new(url, timeout)),
        Ok(url) => Arc::new(PastePrompter::new(url)),
        Err(_) => Arc::new(Unconfigured),
    }
}

/// Stand-in when the redirect URI does not parse
struct Unconfigured;

#[async_trait]
impl AuthorizationPrompter for Unconfigured {
    async fn authorize(&self, _request: &AuthorizationRequest) -> Result<String> {
        Err(Error::MisconfiguredCredentials("redirect_uri"))
    }
}

fn is_loopback(url: &Url) -> bool {
    url.scheme() == "http" && matches!(url.host_str(), Some("127.0.0.1" | "localhost" | "[::1]"))
}

/// Launch the system browser. Failure is not fatal: the URL is also printed.
fn open_browser(url: &Url) {
    let cmd = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };

    match std::process::Command::new(cmd).arg(url.as_str()).spawn() {
        Ok(_) => tracing::debug!("Launched {} for authorize URL", cmd),
        Err(e) => tracing::warn!("Failed to open browser with {}: {}", cmd, e),
    }
}

/// Captures the redirect on a local port
pub struct LoopbackPrompter {
    redirect: Url,
    timeout: Duration,
    launch_browser: bool,
}

impl LoopbackPrompter {
    pub fn new(redirect: Url, timeout: Duration) -> Self {
        Self {
            redirect,
            timeout,
            launch_browser: true,
        }
    }

    fn bind_addr(&self) -> Result<(String, u16)> {
        let port = self
            .redirect
            .port_or_known_default()
            .ok_or(Error::MisconfiguredCredentials("redirect_uri"))?;
        let host = match self.redirect.host_str() {
            Some("[::1]") => "::1",
            Some("localhost") | None => "127.0.0.1",
            Some(h) => h,
        };
        Ok((host.to_string(), port))
    }

    /// Route path for the redirect. Router patterns are rejected here
    /// instead of panicking inside axum.
    fn route_path(&self) -> Result<&str> {
        let path = self.redirect.path();
        if path.split('/').any(|seg| seg.starts_with([':', '*'])) {
            return Err(Error::MisconfiguredCredentials("redirect_uri"));
        }
        Ok(path)
    }
}

#[async_trait]
impl AuthorizationPrompter for LoopbackPrompter {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<String> {
        let (host, port) = self.bind_addr()?;
        let route = self.route_path()?;
        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| {
                Error::PresentationUnavailable(format!("cannot listen on {}:{}: {}", host, port, e))
            })?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let server = CallbackServer::start(listener, route, request.state.clone(), outcome_tx);

        println!();
        println!("To sign in, visit: {}", request.url);
        println!();
        if self.launch_browser {
            open_browser(&request.url);
        }

        tracing::info!("Waiting for authorization callback on {}:{}...", host, port);
        let outcome = tokio::select! {
            res = tokio::time::timeout(self.timeout, outcome_rx) => match res {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(Error::PresentationUnavailable(
                    "callback server stopped".to_string(),
                )),
                Err(_) => {
                    tracing::warn!("Timed out waiting for authorization callback");
                    Err(Error::UserCancelled)
                }
            },
            _ = tokio::signal::ctrl_c() => Err(Error::UserCancelled),
        };

        server.shutdown().await;
        outcome
    }
}

/// Where the callback route delivers the first outcome
struct PendingCallback {
    state: String,
    outcome: StdMutex<Option<oneshot::Sender<Result<String>>>>,
}

/// axum server answering the redirect on the loopback listener
struct CallbackServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CallbackServer {
    fn start(
        listener: TcpListener,
        route: &str,
        state: String,
        outcome: oneshot::Sender<Result<String>>,
    ) -> Self {
        let pending = Arc::new(PendingCallback {
            state,
            outcome: StdMutex::new(Some(outcome)),
        });
        let app = Router::new()
            .route(route, get(receive_callback))
            .with_state(pending);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!("Callback server error: {}", e);
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Let the last response finish, then stop listening.
    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                tracing::debug!("Callback server did not stop in time, aborting it");
                handle.abort();
            }
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn receive_callback(
    State(pending): State<Arc<PendingCallback>>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let outcome = params.into_code(&pending.state);
    let page = if outcome.is_ok() {
        SUCCESS_PAGE
    } else {
        FAILURE_PAGE
    };

    let sender = pending
        .outcome
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => tracing::debug!("Ignoring repeated authorization callback"),
    }
    Html(page)
}

/// For app-scheme redirects: the user pastes the final URL from the browser.
pub struct PastePrompter {
    redirect: Url,
}

impl PastePrompter {
    pub fn new(redirect: Url) -> Self {
        Self { redirect }
    }
}

#[async_trait]
impl AuthorizationPrompter for PastePrompter {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<String> {
        if !std::io::stdin().is_terminal() {
            return Err(Error::PresentationUnavailable(
                "stdin is not a terminal".to_string(),
            ));
        }

        println!();
        println!("To sign in, visit: {}", request.url);
        println!(
            "After approving, copy the {}:// address the browser was sent to and paste it here.",
            self.redirect.scheme()
        );
        println!();
        open_browser(&request.url);

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| Error::PresentationUnavailable(e.to_string()))?
        .map_err(|e| Error::PresentationUnavailable(format!("reading stdin: {}", e)))?;

        let pasted = line.trim();
        if pasted.is_empty() {
            return Err(Error::UserCancelled);
        }
        parse_pasted(&self.redirect, pasted, &request.state)
    }
}

fn parse_pasted(redirect: &Url, pasted: &str, state: &str) -> Result<String> {
    let callback = Url::parse(pasted).map_err(|_| Error::CallbackMismatch)?;
    if callback.scheme() != redirect.scheme() {
        return Err(Error::CallbackMismatch);
    }
    parse_callback(&callback, state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_parse_callback_ok() {
        let cb = url("swifty-companion://callback?code=abc123&state=nonce");
        assert_eq!(parse_callback(&cb, "nonce").unwrap(), "abc123");
    }

    #[test]
    fn test_parse_callback_state_mismatch() {
        let cb = url("swifty-companion://callback?code=abc123&state=forged");
        assert!(matches!(
            parse_callback(&cb, "nonce"),
            Err(Error::CallbackMismatch)
        ));

        let cb = url("swifty-companion://callback?code=abc123");
        assert!(matches!(
            parse_callback(&cb, "nonce"),
            Err(Error::CallbackMismatch)
        ));
    }

    #[test]
    fn test_parse_callback_missing_code() {
        let cb = url("swifty-companion://callback?state=nonce");
        assert!(matches!(
            parse_callback(&cb, "nonce"),
            Err(Error::CallbackMismatch)
        ));
    }

    #[test]
    fn test_parse_callback_denied() {
        let cb = url("swifty-companion://callback?error=access_denied&state=nonce");
        assert!(matches!(
            parse_callback(&cb, "nonce"),
            Err(Error::UserCancelled)
        ));

        let cb = url("swifty-companion://callback?error=server_error&state=nonce");
        assert!(matches!(
            parse_callback(&cb, "nonce"),
            Err(Error::CallbackMismatch)
        ));
    }

    #[test]
    fn test_parse_pasted_scheme_must_match() {
        let redirect = url("swifty-companion://callback");
        assert_eq!(
            parse_pasted(&redirect, "swifty-companion://callback?code=c&state=s", "s").unwrap(),
            "c"
        );
        assert!(matches!(
            parse_pasted(&redirect, "https://evil.example/?code=c&state=s", "s"),
            Err(Error::CallbackMismatch)
        ));
        assert!(matches!(
            parse_pasted(&redirect, "garbage", "s"),
            Err(Error::CallbackMismatch)
        ));
    }

    #[test]
    fn test_prompter_selection() {
        assert!(is_loopback(&url("http://127.0.0.1:8421/callback")));
        assert!(is_loopback(&url("http://localhost:8421/callback")));
        assert!(!is_loopback(&url("swifty-companion://callback")));
        assert!(!is_loopback(&url("https://localhost/callback")));
    }

    #[tokio::test]
    async fn test_unparseable_redirect_is_misconfiguration() {
        let redirect = url("swifty-companion://callback");
        let prompter = prompter_for("not a url", Duration::from_secs(1));
        assert!(matches!(
            prompter.authorize(&request_for(&redirect, "s")).await,
            Err(Error::MisconfiguredCredentials("redirect_uri"))
        ));
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn request_for(redirect: &Url, state: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            state: state.to_string(),
            redirect_uri: redirect.to_string(),
            client_id: "uid".to_string(),
            url: url("https://api.intra.42.fr/oauth/authorize"),
        }
    }

    /// Retry until the prompter's listener is up.
    async fn get_until_bound(url: &str) -> reqwest::Response {
        for _ in 0..100 {
            if let Ok(resp) = reqwest::get(url).await {
                return resp;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("loopback listener never came up");
    }

    #[tokio::test]
    async fn test_loopback_captures_code() {
        let port = free_port();
        let redirect = url(&format!("http://127.0.0.1:{}/callback", port));
        let mut prompter = LoopbackPrompter::new(redirect.clone(), Duration::from_secs(10));
        prompter.launch_browser = false;

        let request = request_for(&redirect, "nonce");
        let task = tokio::spawn(async move { prompter.authorize(&request).await });

        let stray = get_until_bound(&format!("http://127.0.0.1:{}/favicon.ico", port)).await;
        assert_eq!(stray.status(), 404);

        let resp = reqwest::get(format!(
            "http://127.0.0.1:{}/callback?code=the-code&state=nonce",
            port
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), 200);

        assert_eq!(task.await.unwrap().unwrap(), "the-code");
    }

    #[tokio::test]
    async fn test_loopback_rejects_forged_state() {
        let port = free_port();
        let redirect = url(&format!("http://127.0.0.1:{}/callback", port));
        let mut prompter = LoopbackPrompter::new(redirect.clone(), Duration::from_secs(10));
        prompter.launch_browser = false;

        let request = request_for(&redirect, "nonce");
        let task = tokio::spawn(async move { prompter.authorize(&request).await });

        get_until_bound(&format!(
            "http://127.0.0.1:{}/callback?code=the-code&state=forged",
            port
        ))
        .await;

        assert!(matches!(task.await.unwrap(), Err(Error::CallbackMismatch)));
    }

    #[tokio::test]
    async fn test_loopback_idle_connection_does_not_block_callback() {
        let port = free_port();
        let redirect = url(&format!("http://127.0.0.1:{}/callback", port));
        let mut prompter = LoopbackPrompter::new(redirect.clone(), Duration::from_secs(10));
        prompter.launch_browser = false;

        let request = request_for(&redirect, "nonce");
        let task = tokio::spawn(async move { prompter.authorize(&request).await });

        get_until_bound(&format!("http://127.0.0.1:{}/favicon.ico", port)).await;
        // Connects and never sends a byte
        let _idle = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();

        let resp = tokio::time::timeout(
            Duration::from_secs(5),
            reqwest::get(format!(
                "http://127.0.0.1:{}/callback?code=the-code&state=nonce",
                port
            )),
        )
        .await
        .expect("callback stalled behind idle connection")
        .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(task.await.unwrap().unwrap(), "the-code");
    }

    #[tokio::test]
    async fn test_loopback_rejects_pattern_redirect_path() {
        let port = free_port();
        let redirect = url(&format!("http://127.0.0.1:{}/:id", port));
        let mut prompter = LoopbackPrompter::new(redirect.clone(), Duration::from_secs(1));
        prompter.launch_browser = false;

        assert!(matches!(
            prompter.authorize(&request_for(&redirect, "nonce")).await,
            Err(Error::MisconfiguredCredentials("redirect_uri"))
        ));
    }

    #[tokio::test]
    async fn test_loopback_timeout_is_cancellation() {
        let port = free_port();
        let redirect = url(&format!("http://127.0.0.1:{}/callback", port));
        let mut prompter = LoopbackPrompter::new(redirect.clone(), Duration::from_millis(50));
        prompter.launch_browser = false;

        let result = prompter.authorize(&request_for(&redirect, "nonce")).await;
        assert!(matches!(result, Err(Error::UserCancelled)));
    }
}
