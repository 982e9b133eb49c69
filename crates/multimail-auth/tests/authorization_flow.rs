//! End-to-end authorization flows against fake Google capabilities.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use multimail_auth::store::keys;
use multimail_auth::{
    AuthErrorCode, AuthResult, AuthState, Authorizer, AuthorizerConfig, BoxFuture, Capabilities,
    IdentityProvider, KeyValueStore, MailApi, MemoryStore, PayloadCallback, Profile,
    ReauthOptions, ScriptHost, SearchAuth, TokenClient, TokenClientConfig, TokenRequest,
};
use multimail_core::Severity;
use serde_json::{Value, json};

/// Scripted token client: each request pops the next outcome.
#[derive(Default)]
struct ScriptedClient {
    callbacks: Mutex<Option<(PayloadCallback, PayloadCallback)>>,
    outcomes: Mutex<VecDeque<Result<Value, Value>>>,
    requests: Mutex<Vec<TokenRequest>>,
    double_fire: Mutex<Option<Value>>,
}

impl TokenClient for ScriptedClient {
    fn set_callbacks(&self, callback: PayloadCallback, error_callback: PayloadCallback) {
        *self.callbacks.lock().unwrap() = Some((callback, error_callback));
    }

    fn request_access_token(&self, request: TokenRequest) {
        self.requests.lock().unwrap().push(request);
        let (callback, error_callback) = self.callbacks.lock().unwrap().clone().unwrap();
        let outcome = self.outcomes.lock().unwrap().pop_front();
        let extra = self.double_fire.lock().unwrap().take();
        match outcome {
            Some(Ok(payload)) => callback(payload),
            Some(Err(payload)) => error_callback(payload),
            None => {}
        }
        if let Some(payload) = extra {
            error_callback(payload);
        }
    }
}

#[derive(Default)]
struct FakeGoogle {
    client: Arc<ScriptedClient>,
    revoked: Mutex<Vec<String>>,
    ambient: Mutex<Option<String>>,
    owners: Mutex<HashMap<String, String>>,
}

impl FakeGoogle {
    fn grant(&self, token: &str, email: &str) {
        self.client
            .outcomes
            .lock()
            .unwrap()
            .push_back(Ok(json!({ "access_token": token, "expires_in": 3599 })));
        self.owners
            .lock()
            .unwrap()
            .insert(token.to_string(), email.to_string());
    }

    fn reject(&self, payload: Value) {
        self.client.outcomes.lock().unwrap().push_back(Err(payload));
    }

    fn requests(&self) -> Vec<TokenRequest> {
        self.client.requests.lock().unwrap().clone()
    }

    fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

impl IdentityProvider for FakeGoogle {
    fn init_token_client(&self, _config: &TokenClientConfig) -> AuthResult<Arc<dyn TokenClient>> {
        Ok(self.client.clone())
    }

    fn revoke(&self, token: &str) -> BoxFuture<'_, AuthResult<()>> {
        self.revoked.lock().unwrap().push(token.to_string());
        Box::pin(async { Ok(()) })
    }
}

impl MailApi for FakeGoogle {
    fn init(&self) -> BoxFuture<'_, AuthResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn set_access_token(&self, token: Option<String>) {
        *self.ambient.lock().unwrap() = token;
    }

    fn access_token(&self) -> Option<String> {
        self.ambient.lock().unwrap().clone()
    }

    fn get_profile(&self) -> BoxFuture<'_, AuthResult<Profile>> {
        let email = self
            .access_token()
            .and_then(|token| self.owners.lock().unwrap().get(&token).cloned())
            .unwrap_or_default();
        Box::pin(async move { Ok(Profile::new(email)) })
    }
}

/// Browser document: scripts load after a short delay.
#[derive(Default)]
struct Document {
    injected: AtomicUsize,
}

impl ScriptHost for Document {
    fn has_document(&self) -> bool {
        true
    }

    fn has_marked_script(&self, _marker: &str) -> bool {
        false
    }

    fn inject_script(&self, _url: &str, _marker: &str) -> BoxFuture<'static, Result<(), String>> {
        self.injected.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        })
    }
}

struct Harness {
    google: Arc<FakeGoogle>,
    document: Arc<Document>,
    store: Arc<MemoryStore>,
    authorizer: Authorizer,
}

fn harness(values: &[(&str, &str)]) -> Harness {
    let google = Arc::new(FakeGoogle::default());
    let document = Arc::new(Document::default());
    let store = Arc::new(MemoryStore::with_values(values.iter().copied()));
    let authorizer = Authorizer::new(
        Capabilities {
            scripts: document.clone(),
            identity: google.clone(),
            mail: google.clone(),
            store: store.clone(),
        },
        AuthorizerConfig::default(),
    );
    Harness {
        google,
        document,
        store,
        authorizer,
    }
}

const CLIENT_ID: (&str, &str) = (keys::CLIENT_ID, r#""123.apps.googleusercontent.com""#);

fn stored(store: &MemoryStore, key: &str) -> Value {
    serde_json::from_str(&store.get(key).unwrap().unwrap()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn new_account_from_empty_store() {
    let h = harness(&[CLIENT_ID]);
    h.google.grant("tok1", "u@example.com");

    let account = h.authorizer.authorize_new_account().await.unwrap();
    assert_eq!(account.email, "u@example.com");
    assert_eq!(account.token.as_deref(), Some("tok1"));

    let accounts = h.authorizer.accounts();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].email, "u@example.com");
    assert_eq!(accounts[0].token.as_deref(), Some("tok1"));
    assert_eq!(h.authorizer.selection().emails(), ["u@example.com"]);
    assert!(h.authorizer.ready_for_search());

    let requests = h.google.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt.as_deref(), Some("consent select_account"));
    assert_eq!(h.document.injected.load(Ordering::SeqCst), 2);
    assert_eq!(stored(&h.store, keys::SELECTED_ACCOUNTS), json!(["u@example.com"]));
    assert_eq!(h.authorizer.status().severity, Severity::Success);
}

#[tokio::test(start_paused = true)]
async fn startup_restores_account_without_token() {
    let h = harness(&[
        CLIENT_ID,
        (keys::ACCOUNTS, r#"[{"email":"u@example.com","needsConsent":true}]"#),
    ]);
    h.google.grant("tok2", "u@example.com");

    let report = h.authorizer.init_client().await.unwrap();
    assert_eq!(report.restored, ["u@example.com"]);
    assert!(report.needs_consent.is_empty());
    assert_eq!(h.authorizer.state(), AuthState::Ready);

    let accounts = h.authorizer.accounts();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].token.as_deref(), Some("tok2"));
    assert!(!accounts[0].needs_consent);
    assert!(accounts[0].last_authorized.is_some());

    let requests = h.google.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, None);
    assert_eq!(requests[0].login_hint.as_deref(), Some("u@example.com"));
}

#[tokio::test(start_paused = true)]
async fn removing_one_of_two_accounts() {
    let h = harness(&[
        CLIENT_ID,
        (
            keys::ACCOUNTS,
            r#"[{"email":"a@example.com","token":"ta"},{"email":"b@example.com","token":"tb"}]"#,
        ),
        (keys::SELECTED_ACCOUNTS, r#"["a@example.com","b@example.com"]"#),
    ]);
    h.authorizer.init_client().await.unwrap();

    assert!(h.authorizer.remove_account("a@example.com").await.unwrap());

    let accounts = h.authorizer.accounts();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].email, "b@example.com");
    assert!(!h.authorizer.selection().contains("a@example.com"));
    assert_eq!(h.google.revoked(), ["ta"]);
    assert_eq!(stored(&h.store, keys::SELECTED_ACCOUNTS), json!(["b@example.com"]));
}

#[tokio::test(start_paused = true)]
async fn hinted_silent_failure_falls_back_to_consent_once() {
    let h = harness(&[CLIENT_ID]);
    h.google.reject(json!({ "type": "popup_closed", "message": "interaction_required" }));
    h.google.grant("tok3", "a@example.com");

    let account = h
        .authorizer
        .authorize_account(Some("a@example.com"), ReauthOptions::default())
        .await
        .unwrap();
    assert_eq!(account.token.as_deref(), Some("tok3"));

    let requests = h.google.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].prompt, None);
    assert_eq!(requests[1].prompt.as_deref(), Some("consent"));
    assert_eq!(requests[0].login_hint, requests[1].login_hint);
    assert_eq!(requests[1].login_hint.as_deref(), Some("a@example.com"));
}

#[tokio::test(start_paused = true)]
async fn hinted_silent_success_skips_consent() {
    let h = harness(&[CLIENT_ID]);
    h.google.grant("tok4", "a@example.com");

    h.authorizer
        .authorize_account(Some("a@example.com"), ReauthOptions::default())
        .await
        .unwrap();
    assert_eq!(h.google.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_failure_surfaces_on_status_line() {
    let h = harness(&[CLIENT_ID]);
    h.google.reject(json!({ "error": "interaction_required" }));
    h.google.reject(json!({ "type": "popup_failed_to_open", "message": "Failed to open popup window" }));

    let err = h
        .authorizer
        .authorize_account(Some("a@example.com"), ReauthOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), AuthErrorCode::Provider);
    assert_eq!(h.google.requests().len(), 2);

    let status = h.authorizer.status();
    assert_eq!(status.severity, Severity::Error);
    assert_eq!(
        status.message,
        "Failed to open popup window Allow pop-ups for this site and try again."
    );
    assert!(h.authorizer.accounts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn doubly_fired_callbacks_settle_once() {
    let h = harness(&[CLIENT_ID]);
    h.google.grant("tok5", "u@example.com");
    *h.google.client.double_fire.lock().unwrap() = Some(json!({ "type": "popup_closed" }));

    let account = h.authorizer.authorize_new_account().await.unwrap();
    assert_eq!(account.token.as_deref(), Some("tok5"));
    assert_eq!(h.authorizer.status().severity, Severity::Success);
}

#[tokio::test(start_paused = true)]
async fn upsert_through_search_contract_is_idempotent() {
    let h = harness(&[CLIENT_ID]);
    h.authorizer.add_or_update_account("a@x.com", "t1").unwrap();
    h.authorizer.add_or_update_account("a@x.com", "t2").unwrap();

    let accounts = h.authorizer.accounts();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].token.as_deref(), Some("t2"));
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_everything() {
    let h = harness(&[
        CLIENT_ID,
        (
            keys::ACCOUNTS,
            r#"[{"email":"a@example.com","token":"ta"},{"email":"b@example.com"}]"#,
        ),
    ]);
    h.google.reject(json!({ "error": "interaction_required" }));
    let report = h.authorizer.init_client().await.unwrap();
    assert_eq!(report.needs_consent, ["b@example.com"]);

    h.authorizer.sign_out().await.unwrap();
    assert_eq!(h.google.revoked(), ["ta"]);
    assert!(h.authorizer.accounts().is_empty());
    assert!(h.authorizer.selection().is_empty());
    assert_eq!(h.google.access_token(), None);
    assert_eq!(stored(&h.store, keys::ACCOUNTS), json!([]));
}

#[tokio::test(start_paused = true)]
async fn malformed_store_starts_empty() {
    let h = harness(&[
        CLIENT_ID,
        (keys::ACCOUNTS, r#"{"not":"a list"}"#),
        (keys::SELECTED_ACCOUNTS, "garbage"),
    ]);
    assert!(h.authorizer.accounts().is_empty());
    assert!(h.authorizer.selection().is_empty());

    h.authorizer.init_client().await.unwrap();
    assert!(h.google.requests().is_empty());
    assert!(!h.authorizer.ready_for_search());
}
