//! Configuration for the Google capability implementations.

use std::time::Duration;

/// Default loopback port range for the OAuth redirect.
pub const DEFAULT_PORT_RANGE: (u16, u16) = (8765, 8790);

/// Default timeout for Google HTTP requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by [`LoopbackIdentity`](super::LoopbackIdentity) and
/// [`GmailApiClient`](super::GmailApiClient).
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// OAuth client secret. Desktop clients registered in the Google Cloud
    /// Console require it for the code exchange.
    pub client_secret: Option<String>,

    /// Range of ports tried for the loopback redirect server.
    pub port_range: (u16, u16),

    /// HTTP request timeout.
    pub timeout: Duration,

    /// How long to wait for the browser to hit the loopback redirect.
    pub callback_timeout: Duration,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_secret: None,
            port_range: DEFAULT_PORT_RANGE,
            timeout: DEFAULT_HTTP_TIMEOUT,
            callback_timeout: Duration::from_secs(300),
        }
    }
}

impl GoogleConfig {
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Checks the settings for obvious mistakes.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.port_range.0 == 0 || self.port_range.0 > self.port_range.1 {
            return Err("loopback port range must be non-empty and start above 0");
        }
        if self.client_secret.as_deref().is_some_and(str::is_empty) {
            return Err("client_secret must not be empty when set");
        }
        Ok(())
    }
}

/// Checks that a client id looks like a Google OAuth client id.
pub fn validate_client_id(client_id: &str) -> Result<(), &'static str> {
    let client_id = client_id.trim();
    if client_id.is_empty() {
        return Err("client_id is required");
    }
    if !client_id.ends_with(".apps.googleusercontent.com") {
        return Err("client_id should end with .apps.googleusercontent.com");
    }
    Ok(())
}
