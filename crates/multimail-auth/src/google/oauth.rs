//! Loopback OAuth 2.0 token client for native processes.
//!
//! The browser identity library hands out tokens through a popup. Outside a
//! browser the same contract is met with the Authorization Code flow plus
//! PKCE on a loopback redirect:
//!
//! 1. Generate a code verifier, its SHA-256 challenge and a random state
//! 2. Bind a local HTTP listener in the configured port range
//! 3. Open the user's browser on Google's consent page
//! 4. Receive the redirect with the authorization code
//! 5. Exchange the code (with the verifier) for an access token
//!
//! The outcome is delivered through the token client's callback pair, with
//! the same payload shapes the browser library produces.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::provider::{
    BoxFuture, IdentityProvider, PayloadCallback, TokenClient, TokenClientConfig, TokenRequest,
};

use super::config::GoogleConfig;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

/// PKCE code verifier length, in bytes before encoding.
const CODE_VERIFIER_LENGTH: usize = 32;

/// PKCE parameters for one authorization request (RFC 7636).
#[derive(Debug)]
pub struct PkceFlow {
    pub verifier: String,
    pub challenge: String,
    /// CSRF state echoed back on the redirect.
    pub state: String,
}

impl PkceFlow {
    pub fn new() -> Self {
        let verifier = random_token(CODE_VERIFIER_LENGTH);
        let challenge = Self::compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
            state: random_token(16),
        }
    }

    fn compute_challenge(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }

    /// Builds the consent page URL.
    ///
    /// An absent prompt is sent as `prompt=none` so the request never shows UI.
    pub fn build_auth_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        request: &TokenRequest,
    ) -> String {
        let prompt = request.prompt.as_deref().unwrap_or("none");
        let mut auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            code_challenge={}&code_challenge_method=S256&state={}&\
            include_granted_scopes=true&prompt={}",
            GOOGLE_AUTH_URL,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(scope),
            urlencoding::encode(&self.challenge),
            urlencoding::encode(&self.state),
            urlencoding::encode(prompt),
        );
        if let Some(hint) = request.login_hint.as_deref() {
            auth_url.push_str("&login_hint=");
            auth_url.push_str(&urlencoding::encode(hint));
        }
        auth_url
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Parameters received on the loopback redirect.
#[derive(Debug, Default, PartialEq, Eq)]
struct Redirect {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl Redirect {
    /// Parses the request line of the redirect (`GET /callback?... HTTP/1.1`).
    fn parse(request_line: &str) -> Option<Self> {
        let mut parts = request_line.split_whitespace();
        if parts.next() != Some("GET") {
            return None;
        }
        let target = parts.next()?;
        if !target.starts_with("/callback") {
            return None;
        }

        let parsed = url::Url::parse(&format!("http://127.0.0.1{target}")).ok()?;
        let mut redirect = Self::default();
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "code" => redirect.code = Some(value.into_owned()),
                "state" => redirect.state = Some(value.into_owned()),
                "error" => redirect.error = Some(value.into_owned()),
                _ => {}
            }
        }
        Some(redirect)
    }

    /// Turns the redirect into a code, or a provider payload on failure.
    fn into_code(self, expected_state: &str) -> Result<String, Value> {
        if let Some(error) = self.error {
            return Err(json!({ "error": error }));
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(json!({
                "error": "state_mismatch",
                "error_description": "OAuth state mismatch, possible CSRF attempt",
            }));
        }
        self.code.ok_or_else(|| {
            json!({
                "error": "missing_code",
                "error_description": "missing authorization code in redirect",
            })
        })
    }
}

/// Tries each port of the range until one binds.
fn bind_loopback(port_range: (u16, u16)) -> Result<(TcpListener, u16), Value> {
    for port in port_range.0..=port_range.1 {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
            debug!(port, "bound loopback listener");
            return Ok((listener, port));
        }
    }
    Err(json!({
        "error": "no_loopback_port",
        "error_description": format!("no available port in range {}-{}", port_range.0, port_range.1),
    }))
}

/// How often the loopback listener is polled for a connection.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long an accepted connection may take to send its request line.
const ACCEPT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocks until the browser hits the redirect, or the timeout expires.
///
/// The listener is dropped on return, so the port is released on timeout too.
fn wait_for_redirect(listener: TcpListener, timeout: Duration) -> Result<Redirect, Value> {
    listener.set_nonblocking(true).map_err(|e| {
        json!({ "error": "loopback_failed", "error_description": e.to_string() })
    })?;
    let deadline = Instant::now() + timeout;

    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let configured = stream
                    .set_nonblocking(false)
                    .and_then(|()| stream.set_read_timeout(Some(ACCEPT_READ_TIMEOUT)));
                match configured {
                    Ok(()) => {
                        if let Some(redirect) = answer_redirect(stream) {
                            return Ok(redirect);
                        }
                    }
                    Err(e) => error!(error = %e, "failed to configure loopback connection"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => error!(error = %e, "failed to accept loopback connection"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(json!({
                "error": "timeout",
                "error_description": "timed out waiting for the browser redirect",
            }));
        }
        thread::sleep(ACCEPT_POLL_INTERVAL.min(deadline - now));
    }
}

fn answer_redirect(mut stream: TcpStream) -> Option<Redirect> {
    let mut request_line = String::new();
    BufReader::new(&stream).read_line(&mut request_line).ok()?;
    let redirect = Redirect::parse(&request_line)?;

    let response = if redirect.error.is_some() || redirect.code.is_none() {
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\n\r\n\
        <html><body><h1>Authorization failed</h1>\
        <p>You can close this window.</p></body></html>"
    } else {
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
        <html><body><h1>Account connected</h1>\
        <p>You can close this window and return to multimail.</p></body></html>"
    };
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
    Some(redirect)
}

/// Identity provider running the loopback flow against Google.
#[derive(Debug, Clone)]
pub struct LoopbackIdentity {
    config: GoogleConfig,
    http_client: reqwest::Client,
}

impl LoopbackIdentity {
    pub fn new(config: GoogleConfig) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                AuthError::provider_message(format!("failed to create HTTP client: {e}"))
                    .with_source(e)
            })?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

impl IdentityProvider for LoopbackIdentity {
    fn init_token_client(&self, config: &TokenClientConfig) -> AuthResult<Arc<dyn TokenClient>> {
        let noop: PayloadCallback = Arc::new(|_: Value| {});
        Ok(Arc::new(LoopbackTokenClient {
            client: config.clone(),
            google: self.config.clone(),
            http_client: self.http_client.clone(),
            callbacks: RwLock::new((noop.clone(), noop)),
        }))
    }

    fn revoke(&self, token: &str) -> BoxFuture<'_, AuthResult<()>> {
        let token = token.to_string();
        Box::pin(async move {
            let response = self
                .http_client
                .post(GOOGLE_REVOKE_URL)
                .form(&[("token", token.as_str())])
                .send()
                .await
                .map_err(|e| {
                    AuthError::provider_message(format!("revoke request failed: {e}")).with_source(e)
                })?;

            let status = response.status();
            if status.is_success() {
                debug!("token revoked");
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::provider(
                serde_json::from_str(&body)
                    .unwrap_or_else(|_| json!({ "error": format!("revoke failed ({status})") })),
            ))
        })
    }
}

/// Token client bound to one client id; each request runs the loopback flow.
pub struct LoopbackTokenClient {
    client: TokenClientConfig,
    google: GoogleConfig,
    http_client: reqwest::Client,
    callbacks: RwLock<(PayloadCallback, PayloadCallback)>,
}

impl LoopbackTokenClient {
    async fn authorize(
        client: TokenClientConfig,
        google: GoogleConfig,
        http_client: reqwest::Client,
        request: TokenRequest,
    ) -> Result<Value, Value> {
        let pkce = PkceFlow::new();
        let (listener, port) = bind_loopback(google.port_range)?;
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");
        let auth_url = pkce.build_auth_url(&client.client_id, &redirect_uri, &client.scope, &request);

        info!(prompt = request.prompt.as_deref().unwrap_or("none"), "opening browser for Google sign-in");
        debug!(url = %auth_url, "authorization URL");
        if let Err(e) = open::that(&auth_url) {
            warn!(error = %e, "failed to open browser");
            eprintln!("\nOpen this URL in your browser:\n\n{auth_url}\n");
        }

        let timeout = google.callback_timeout;
        let redirect = tokio::task::spawn_blocking(move || wait_for_redirect(listener, timeout))
            .await
            .map_err(|e| json!({ "error": "loopback_failed", "error_description": e.to_string() }))??;
        let code = redirect.into_code(&pkce.state)?;

        debug!("received authorization code, exchanging");
        let mut params = vec![
            ("client_id", client.client_id.as_str()),
            ("code", code.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri.as_str()),
        ];
        if let Some(secret) = google.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let response = http_client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| json!({ "error": "network_error", "error_description": e.to_string() }))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| json!({ "error": "network_error", "error_description": e.to_string() }))?;

        let payload: Value = serde_json::from_str(&body).unwrap_or_else(|_| {
            json!({ "error": "invalid_response", "error_description": format!("token endpoint returned {status}: {body}") })
        });
        if status.is_success() {
            Ok(payload)
        } else {
            Err(payload)
        }
    }
}

impl TokenClient for LoopbackTokenClient {
    fn set_callbacks(&self, callback: PayloadCallback, error_callback: PayloadCallback) {
        *self.callbacks.write().unwrap_or_else(PoisonError::into_inner) = (callback, error_callback);
    }

    fn request_access_token(&self, request: TokenRequest) {
        let (callback, error_callback) = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error_callback(json!({
                "error": "no_runtime",
                "error_description": "token requests need a tokio runtime",
            }));
            return;
        };

        let flow = Self::authorize(
            self.client.clone(),
            self.google.clone(),
            self.http_client.clone(),
            request,
        );
        runtime.spawn(async move {
            match flow.await {
                Ok(payload) => callback(payload),
                Err(payload) => error_callback(payload),
            }
        });
    }
}

impl std::fmt::Debug for LoopbackTokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTokenClient")
            .field("client_id", &self.client.client_id)
            .field("scope", &self.client.scope)
            .finish_non_exhaustive()
    }
}
