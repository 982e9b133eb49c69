//! Token client management.
//!
//! [`TokenClientManager`] wraps the identity provider's token client. The
//! client supports a single callback pair, so requests are serialized through
//! a queue: each request wires fresh callbacks, issues the request, and holds
//! the queue until it settles. Settlement is one-shot; whichever callback
//! fires first wins and anything later is ignored.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::provider::{
    BoxFuture, IdentityProvider, MailApi, PayloadCallback, TokenClient, TokenClientConfig,
    TokenRequestOptions, TokenRevoker,
};
use crate::script::{ScriptKind, ScriptLoader};
use crate::store::SessionStore;

/// Default time to wait for a token callback.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(300);

/// Take-once sender shared by the success and error callbacks.
#[derive(Clone)]
struct Settlement(Arc<Mutex<Option<oneshot::Sender<AuthResult<String>>>>>);

impl Settlement {
    fn new(sender: oneshot::Sender<AuthResult<String>>) -> Self {
        Self(Arc::new(Mutex::new(Some(sender))))
    }

    /// Delivers the result if nothing has been delivered yet.
    fn settle(&self, result: AuthResult<String>) -> bool {
        let sender = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        match sender {
            Some(sender) => {
                let _ = sender.send(result);
                true
            }
            None => {
                debug!("ignoring callback for an already settled token request");
                false
            }
        }
    }

    fn close(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Turns a success-callback payload into a token.
fn token_from_payload(payload: Value) -> AuthResult<String> {
    if payload.get("error").is_some() {
        return Err(AuthError::provider(payload));
    }
    payload
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(AuthError::token_missing)
}

/// Manages the token client and serializes token requests.
pub struct TokenClientManager {
    identity: Arc<dyn IdentityProvider>,
    api: Arc<dyn MailApi>,
    scripts: Arc<ScriptLoader>,
    session: SessionStore,
    client: Mutex<Option<Arc<dyn TokenClient>>>,
    queue: tokio::sync::Mutex<()>,
    timeout: Option<Duration>,
}

impl TokenClientManager {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        api: Arc<dyn MailApi>,
        scripts: Arc<ScriptLoader>,
        session: SessionStore,
    ) -> Self {
        Self {
            identity,
            api,
            scripts,
            session,
            client: Mutex::new(None),
            queue: tokio::sync::Mutex::new(()),
            timeout: Some(DEFAULT_TOKEN_TIMEOUT),
        }
    }

    /// Sets how long a request waits for its callback. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the token client, constructing it when absent or when `force`
    /// is set.
    pub fn setup_token_client(&self, force: bool) -> AuthResult<Arc<dyn TokenClient>> {
        let mut cached = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if !force && let Some(client) = cached.as_ref() {
            return Ok(client.clone());
        }

        let client_id = self
            .session
            .client_id()
            .ok_or_else(AuthError::missing_credentials)?;
        let client = self
            .identity
            .init_token_client(&TokenClientConfig::gmail(client_id))?;
        debug!(force, "constructed token client");
        *cached = Some(client.clone());
        Ok(client)
    }

    /// Returns true if a token client has been constructed.
    pub fn has_client(&self) -> bool {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drops the cached token client.
    pub fn invalidate(&self) {
        self.client.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Issues one token request and waits for its outcome.
    ///
    /// On success the token becomes the ambient token of the mail API.
    pub async fn request_access_token(&self, options: TokenRequestOptions) -> AuthResult<String> {
        let _turn = self.queue.lock().await;

        let client = self.setup_token_client(options.force_prompt)?;
        let (sender, receiver) = oneshot::channel();
        let settlement = Settlement::new(sender);

        let on_success: PayloadCallback = {
            let settlement = settlement.clone();
            Arc::new(move |payload| {
                settlement.settle(token_from_payload(payload));
            })
        };
        let on_error: PayloadCallback = {
            let settlement = settlement.clone();
            Arc::new(move |payload| {
                settlement.settle(Err(AuthError::provider(payload)));
            })
        };
        client.set_callbacks(on_success, on_error);

        let request = options.to_request();
        debug!(
            prompt = request.prompt.as_deref().unwrap_or("none"),
            hint = request.login_hint.as_deref(),
            "requesting access token"
        );
        client.request_access_token(request);

        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    settlement.close();
                    warn!(timeout = ?limit, "token request timed out");
                    return Err(AuthError::timeout(format!(
                        "no response from Google after {limit:?}"
                    )));
                }
            },
            None => receiver.await,
        };

        let token = received
            .map_err(|_| AuthError::provider_message("token request was abandoned"))??;
        self.api.set_access_token(Some(token.clone()));
        info!(interactive = options.is_interactive(), "access token granted");
        Ok(token)
    }
}

impl TokenRevoker for TokenClientManager {
    fn revoke(&self, token: &str) -> BoxFuture<'_, AuthResult<()>> {
        if !self.scripts.is_loaded(ScriptKind::Identity) {
            debug!("identity library not loaded, skipping revoke");
            return Box::pin(async { Ok(()) });
        }
        self.identity.revoke(token)
    }
}

impl std::fmt::Debug for TokenClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClientManager")
            .field("has_client", &self.has_client())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::error::AuthErrorCode;
    use crate::script::{NativeHost, ScriptHost};
    use crate::store::MemoryStore;
    use crate::testing::{FakeIdentity, FakeMail, Reply};

    struct Fixture {
        identity: Arc<FakeIdentity>,
        mail: Arc<FakeMail>,
        manager: TokenClientManager,
    }

    fn fixture_with(client_id: Option<&str>, host: Arc<dyn ScriptHost>) -> Fixture {
        let identity = Arc::new(FakeIdentity::default());
        let mail = Arc::new(FakeMail::default());
        let session = SessionStore::new(Arc::new(MemoryStore::new()));
        session.set_client_id(client_id).unwrap();
        let manager = TokenClientManager::new(
            identity.clone(),
            mail.clone(),
            Arc::new(ScriptLoader::new(host)),
            session,
        );
        Fixture {
            identity,
            mail,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Some("client-id"), Arc::new(NativeHost))
    }

    #[test]
    fn payload_without_token_is_token_missing() {
        let err = token_from_payload(json!({ "token_type": "Bearer" })).unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::TokenMissing);

        let err = token_from_payload(json!({ "access_token": "" })).unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::TokenMissing);
    }

    #[test]
    fn error_shaped_success_payload_is_provider_error() {
        let err = token_from_payload(json!({ "error": "interaction_required" })).unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::Provider);
        assert_eq!(err.message(), "interaction_required");
    }

    #[test]
    fn setup_requires_client_id() {
        let f = fixture_with(None, Arc::new(NativeHost));
        let err = f.manager.setup_token_client(false).err().unwrap();
        assert_eq!(err.code(), AuthErrorCode::MissingCredentials);
        assert_eq!(f.identity.inits(), 0);
    }

    #[test]
    fn setup_reuses_client_unless_forced() {
        let f = fixture();
        f.manager.setup_token_client(false).unwrap();
        f.manager.setup_token_client(false).unwrap();
        assert_eq!(f.identity.inits(), 1);

        f.manager.setup_token_client(true).unwrap();
        assert_eq!(f.identity.inits(), 2);

        f.manager.invalidate();
        assert!(!f.manager.has_client());
        f.manager.setup_token_client(false).unwrap();
        assert_eq!(f.identity.inits(), 3);
    }

    #[tokio::test]
    async fn grant_sets_ambient_token() {
        let f = fixture();
        f.identity.client.push(Reply::Grant("tok1"));

        let token = f
            .manager
            .request_access_token(TokenRequestOptions::silent().with_hint("a@x.com"))
            .await
            .unwrap();

        assert_eq!(token, "tok1");
        assert_eq!(f.mail.access_token().as_deref(), Some("tok1"));
        let requests = f.identity.client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, None);
        assert_eq!(requests[0].login_hint.as_deref(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn first_callback_wins() {
        let f = fixture();
        f.identity
            .client
            .push(Reply::Both("tok1", json!({ "type": "popup_closed" })));

        let token = f
            .manager
            .request_access_token(TokenRequestOptions::consent())
            .await
            .unwrap();
        assert_eq!(token, "tok1");
    }

    #[tokio::test]
    async fn error_callback_rejects_with_payload() {
        let f = fixture();
        f.identity
            .client
            .push(Reply::Error(json!({ "type": "popup_failed_to_open", "message": "Failed to open popup window" })));

        let err = f
            .manager
            .request_access_token(TokenRequestOptions::consent())
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::Provider);
        assert_eq!(err.payload().unwrap()["type"], "popup_failed_to_open");
        assert_eq!(f.mail.access_token(), None);
    }

    #[tokio::test]
    async fn force_prompt_rebuilds_client() {
        let f = fixture();
        f.identity.client.push(Reply::Grant("tok1"));
        f.identity.client.push(Reply::Grant("tok2"));

        f.manager
            .request_access_token(TokenRequestOptions::silent())
            .await
            .unwrap();
        f.manager
            .request_access_token(TokenRequestOptions::consent().force_prompt().select_account())
            .await
            .unwrap();

        assert_eq!(f.identity.inits(), 2);
        assert_eq!(
            f.identity.client.requests()[1].prompt.as_deref(),
            Some("consent select_account")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_times_out_and_late_callback_is_ignored() {
        let f = fixture();
        f.identity.client.push(Reply::Hang);

        let err = f
            .manager
            .request_access_token(TokenRequestOptions::silent())
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::Timeout);

        f.identity.client.fire_success(json!({ "access_token": "late" }));
        assert_eq!(f.mail.access_token(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn short_timeout_message_keeps_precision() {
        let mut f = fixture();
        f.manager = f
            .manager
            .with_timeout(Some(std::time::Duration::from_millis(250)));
        f.identity.client.push(Reply::Hang);

        let err = f
            .manager
            .request_access_token(TokenRequestOptions::silent())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "no response from Google after 250ms");
    }

    #[tokio::test]
    async fn revoke_delegates_to_identity() {
        let f = fixture();
        f.manager.revoke("tok1").await.unwrap();
        assert_eq!(f.identity.revoked(), ["tok1"]);
    }

    #[tokio::test]
    async fn revoke_without_identity_library_is_noop() {
        struct EmptyDocument;
        impl ScriptHost for EmptyDocument {
            fn has_document(&self) -> bool {
                true
            }
            fn has_marked_script(&self, _marker: &str) -> bool {
                false
            }
            fn inject_script(&self, _url: &str, _marker: &str) -> BoxFuture<'static, Result<(), String>> {
                Box::pin(async { Ok(()) })
            }
        }

        let f = fixture_with(Some("client-id"), Arc::new(EmptyDocument));
        f.manager.revoke("tok1").await.unwrap();
        assert!(f.identity.revoked().is_empty());
    }
}
