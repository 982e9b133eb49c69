//! Error types for the authorization core.
//!
//! Every failure inside an authorization operation becomes an [`AuthError`].
//! Provider failures keep the raw JSON payload the identity or mail provider
//! returned; their human-readable message is extracted with
//! [`describe_payload`]. [`AuthError::user_message`] produces the status line
//! text, with a remediation hint for well-known misconfigurations.

use std::fmt;
use std::sync::LazyLock;

use regex::RegexSet;
use serde_json::Value;
use thiserror::Error;

/// Message used when a provider payload carries nothing recognizable.
const GENERIC_PROVIDER_MESSAGE: &str = "unexpected error from Google";

/// The category of an authorization error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    /// No OAuth client id is configured.
    MissingCredentials,
    /// A vendor script failed to load.
    ScriptLoad,
    /// The identity or mail provider reported an error.
    Provider,
    /// The provider reported success but omitted the access token.
    TokenMissing,
    /// A token request received no callback in time.
    Timeout,
    /// The persisted session store could not be read or written.
    Storage,
}

impl AuthErrorCode {
    /// Returns a stable snake_case name for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::ScriptLoad => "script_load",
            Self::Provider => "provider",
            Self::TokenMissing => "token_missing",
            Self::Timeout => "timeout",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error raised by the authorization core.
#[derive(Debug, Error)]
pub struct AuthError {
    code: AuthErrorCode,
    message: String,
    /// Raw provider payload, for [`AuthErrorCode::Provider`] errors.
    payload: Option<Value>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AuthError {
    /// Creates an error with the given code and message.
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            payload: None,
            source: None,
        }
    }

    /// The OAuth client id is not configured.
    pub fn missing_credentials() -> Self {
        Self::new(
            AuthErrorCode::MissingCredentials,
            "enter an OAuth client ID before connecting an account",
        )
    }

    pub fn script_load(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::ScriptLoad, message)
    }

    /// Wraps a raw provider payload, extracting its message.
    pub fn provider(payload: Value) -> Self {
        let message = describe_payload(&payload);
        Self {
            payload: Some(payload),
            ..Self::new(AuthErrorCode::Provider, message)
        }
    }

    /// A provider-side failure with no payload (client unavailable, transport error).
    pub fn provider_message(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Provider, message)
    }

    pub fn token_missing() -> Self {
        Self::new(
            AuthErrorCode::TokenMissing,
            "Google did not return an access token",
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Timeout, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Storage, message)
    }

    /// Sets the source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> AuthErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the raw provider payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Text for the status line: the message plus a remediation hint when
    /// the message matches a known misconfiguration.
    pub fn user_message(&self) -> String {
        match remediation_hint(&self.message) {
            Some(hint) => format!("{} {}", self.message, hint),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A specialized Result type for authorization operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Extracts a human-readable message from a provider error payload.
///
/// Tried in order, first match wins:
/// 1. `message`
/// 2. `result.error.message`, with `result.error.status` appended
/// 3. `error_description`
/// 4. `error.message` when `error` is an object
/// 5. `error` when it is a string
/// 6. the payload itself when it is a string
pub fn describe_payload(payload: &Value) -> String {
    let text = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);

    if let Some(message) = payload.get("message").and_then(text) {
        return message;
    }

    if let Some(nested) = payload.pointer("/result/error")
        && let Some(message) = nested.get("message").and_then(text)
    {
        return match nested.get("status").and_then(text) {
            Some(status) => format!("{message} ({status})"),
            None => message,
        };
    }

    if let Some(description) = payload.get("error_description").and_then(text) {
        return description;
    }

    match payload.get("error") {
        Some(Value::Object(error)) => {
            if let Some(message) = error.get("message").and_then(text) {
                return message;
            }
        }
        Some(Value::String(error)) if !error.is_empty() => return error.clone(),
        _ => {}
    }

    text(payload).unwrap_or_else(|| GENERIC_PROVIDER_MESSAGE.to_string())
}

static HINT_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)popup",
        r"(?i)(origin|idpiframe|redirect_uri_mismatch)",
        r"(?i)api key not valid|invalid api key",
    ])
    .expect("hint patterns are valid")
});

const HINTS: [&str; 3] = [
    "Allow pop-ups for this site and try again.",
    "Check that this origin is listed under Authorized JavaScript origins for the OAuth client.",
    "Check the API key configured for the Gmail API.",
];

/// Returns a static remediation hint for messages that match a known pattern.
pub fn remediation_hint(message: &str) -> Option<&'static str> {
    HINT_PATTERNS
        .matches(message)
        .iter()
        .next()
        .map(|index| HINTS[index])
}
