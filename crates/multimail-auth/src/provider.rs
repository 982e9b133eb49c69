//! Capability traits for the identity and mail providers.
//!
//! The vendor SDKs the authorization core drives are process-wide singletons
//! in their natural habitat. Here they are injected as trait objects so the
//! core never touches global state and tests can substitute fakes:
//!
//! - [`IdentityProvider`] constructs [`TokenClient`] handles and revokes tokens
//! - [`TokenClient`] issues token requests and reports back through a mutable
//!   callback pair
//! - [`MailApi`] holds the ambient bearer token and looks up the profile
//! - [`TokenRevoker`] is the narrow revoke surface the account registry uses

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuthResult;

/// Read-only Gmail scope; the only scope ever requested.
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// A boxed future for async trait methods.
///
/// Boxed futures keep the capability traits object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback receiving a raw provider payload.
pub type PayloadCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Configuration used to construct a token client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClientConfig {
    pub client_id: String,
    pub scope: String,
}

impl TokenClientConfig {
    /// Creates a config for the Gmail read-only scope.
    pub fn gmail(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scope: GMAIL_READONLY_SCOPE.to_string(),
        }
    }
}

/// Wire-level options for one token request.
///
/// `prompt` is absent for a silent request, `"consent"` for interactive
/// consent, or `"consent select_account"` to also force the account chooser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,
}

/// A handle to the identity SDK's token client.
///
/// The client supports exactly one callback pair at a time. Setting new
/// callbacks replaces the previous pair.
pub trait TokenClient: Send + Sync {
    /// Replaces the success and error callbacks.
    ///
    /// The success callback receives either `{ "access_token": ... }` or an
    /// error-shaped payload (`{ "error": ... }`).
    fn set_callbacks(&self, callback: PayloadCallback, error_callback: PayloadCallback);

    /// Issues a token request. The outcome is delivered through the callbacks.
    fn request_access_token(&self, request: TokenRequest);
}

/// The identity provider SDK.
pub trait IdentityProvider: Send + Sync {
    /// Constructs a token client bound to the given configuration.
    fn init_token_client(&self, config: &TokenClientConfig) -> AuthResult<Arc<dyn TokenClient>>;

    /// Revokes a token with the provider.
    fn revoke(&self, token: &str) -> BoxFuture<'_, AuthResult<()>>;
}

/// Profile returned by the mail API for the ambient bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,
}

impl Profile {
    pub fn new(email_address: impl Into<String>) -> Self {
        Self {
            email_address: email_address.into(),
            messages_total: None,
            threads_total: None,
            history_id: None,
        }
    }
}

/// The mail API client library.
///
/// Holds a single ambient bearer token used by every request, including the
/// message list and get calls the search component makes.
pub trait MailApi: Send + Sync {
    /// Initializes the client library (discovery documents, API key).
    fn init(&self) -> BoxFuture<'_, AuthResult<()>>;

    /// Sets or clears the ambient bearer token.
    fn set_access_token(&self, token: Option<String>);

    /// Returns the ambient bearer token.
    fn access_token(&self) -> Option<String>;

    /// Looks up the profile of the account owning the ambient token.
    fn get_profile(&self) -> BoxFuture<'_, AuthResult<Profile>>;
}

/// Revokes tokens on behalf of the account registry.
pub trait TokenRevoker: Send + Sync {
    /// Revokes a token. Best-effort: callers log failures and move on.
    fn revoke(&self, token: &str) -> BoxFuture<'_, AuthResult<()>>;
}

/// How a token request may interact with the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptMode {
    /// No user interaction; fails fast if a prompt would be required.
    #[default]
    None,
    /// Interactive consent.
    Consent,
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Consent => f.write_str("consent"),
        }
    }
}

/// Caller-level options for a token request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequestOptions {
    pub prompt_mode: PromptMode,
    /// Email used as login hint.
    pub hint: Option<String>,
    /// Forces interactive consent and rebuilds the token client.
    pub force_prompt: bool,
    /// Additionally forces the account chooser.
    pub force_select_account: bool,
}

impl TokenRequestOptions {
    /// A silent request.
    pub fn silent() -> Self {
        Self::default()
    }

    /// An interactive consent request.
    pub fn consent() -> Self {
        Self {
            prompt_mode: PromptMode::Consent,
            ..Self::default()
        }
    }

    pub fn with_hint(mut self, email: impl Into<String>) -> Self {
        self.hint = Some(email.into());
        self
    }

    pub fn force_prompt(mut self) -> Self {
        self.force_prompt = true;
        self
    }

    pub fn select_account(mut self) -> Self {
        self.force_select_account = true;
        self
    }

    /// Returns true if the request may show UI.
    pub fn is_interactive(&self) -> bool {
        self.prompt_mode == PromptMode::Consent || self.force_prompt || self.force_select_account
    }

    /// Maps the options onto the wire request.
    pub fn to_request(&self) -> TokenRequest {
        let prompt = if self.force_select_account {
            Some("consent select_account")
        } else if self.is_interactive() {
            Some("consent")
        } else {
            None
        };

        TokenRequest {
            prompt: prompt.map(str::to_string),
            login_hint: self.hint.clone(),
        }
    }
}
