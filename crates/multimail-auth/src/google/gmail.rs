//! Gmail API client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{AuthError, AuthResult};
use crate::provider::{BoxFuture, MailApi, Profile};

use super::config::GoogleConfig;

/// Base URL for the Gmail API.
const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Gmail client holding the ambient bearer token.
#[derive(Debug)]
pub struct GmailApiClient {
    http_client: reqwest::Client,
    base_url: String,
    access_token: RwLock<Option<String>>,
    initialized: AtomicBool,
}

impl GmailApiClient {
    pub fn new(config: &GoogleConfig) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                AuthError::provider_message(format!("failed to create HTTP client: {e}"))
                    .with_source(e)
            })?;

        Ok(Self {
            http_client,
            base_url: GMAIL_API_BASE.to_string(),
            access_token: RwLock::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    /// Returns true once [`MailApi::init`] has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn fetch_profile(&self, token: String) -> AuthResult<Profile> {
        let url = format!("{}/users/me/profile", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    "profile request timed out".to_string()
                } else {
                    format!("profile request failed: {e}")
                };
                AuthError::provider_message(message).with_source(e)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AuthError::provider_message(format!("failed to read profile response: {e}"))
                .with_source(e)
        })?;

        if !status.is_success() {
            return Err(AuthError::provider(error_payload(status, &body)));
        }

        let profile: Profile = serde_json::from_str(&body).map_err(|e| {
            AuthError::provider_message(format!("invalid profile response: {e}")).with_source(e)
        })?;
        debug!(email = %profile.email_address, "fetched profile");
        Ok(profile)
    }
}

/// Builds a provider payload from an error response.
///
/// Google error bodies are JSON (`{"error": {"code", "message", "status"}}`);
/// anything else is wrapped in the same shape.
fn error_payload(status: StatusCode, body: &str) -> Value {
    match serde_json::from_str::<Value>(body) {
        Ok(value) if value.is_object() => value,
        _ => {
            let message = if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body.trim().to_string()
            };
            json!({ "error": { "code": status.as_u16(), "message": message } })
        }
    }
}

impl MailApi for GmailApiClient {
    fn init(&self) -> BoxFuture<'_, AuthResult<()>> {
        self.initialized.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn set_access_token(&self, token: Option<String>) {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn access_token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn get_profile(&self) -> BoxFuture<'_, AuthResult<Profile>> {
        let token = self.access_token();
        Box::pin(async move {
            let token = token.ok_or_else(AuthError::token_missing)?;
            self.fetch_profile(token).await
        })
    }
}
