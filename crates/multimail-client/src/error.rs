//! Client error types.

use std::fmt;

use multimail_auth::{AuthError, AuthErrorCode};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// Secret reference could not be resolved.
    Secret(String),
    /// IO error.
    Io(std::io::Error),
    /// No OAuth client id is configured yet.
    NotConfigured,
    /// Authorization failed.
    Auth(AuthError),
    /// The named account is not connected.
    UnknownAccount(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Secret(msg) => write!(f, "secret error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::NotConfigured => write!(
                f,
                "no OAuth client id configured; run `multimail config set-client-id <ID>`"
            ),
            Self::Auth(err) => write!(f, "{}", err.user_message()),
            Self::UnknownAccount(email) => write!(f, "no connected account {}", email),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Auth(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<AuthError> for ClientError {
    fn from(err: AuthError) -> Self {
        match err.code() {
            AuthErrorCode::MissingCredentials => Self::NotConfigured,
            _ => Self::Auth(err),
        }
    }
}
