//! Fake capabilities for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::error::{AuthError, AuthResult};
use crate::provider::{
    BoxFuture, IdentityProvider, MailApi, PayloadCallback, Profile, TokenClient,
    TokenClientConfig, TokenRequest,
};
use crate::script::ScriptHost;

/// What the fake token client does with the next request.
#[derive(Debug, Clone)]
pub enum Reply {
    Grant(&'static str),
    Payload(Value),
    Error(Value),
    /// Success then error, both fired synchronously.
    Both(&'static str, Value),
    /// Never calls back.
    Hang,
}

#[derive(Default)]
pub struct FakeTokenClient {
    callbacks: Mutex<Option<(PayloadCallback, PayloadCallback)>>,
    replies: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<TokenRequest>>,
}

impl FakeTokenClient {
    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<TokenRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Fires the current success callback, as a late provider would.
    pub fn fire_success(&self, payload: Value) {
        let callbacks = self.callbacks.lock().unwrap().clone();
        if let Some((callback, _)) = callbacks {
            callback(payload);
        }
    }
}

impl TokenClient for FakeTokenClient {
    fn set_callbacks(&self, callback: PayloadCallback, error_callback: PayloadCallback) {
        *self.callbacks.lock().unwrap() = Some((callback, error_callback));
    }

    fn request_access_token(&self, request: TokenRequest) {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Hang);
        let Some((callback, error_callback)) = self.callbacks.lock().unwrap().clone() else {
            return;
        };
        match reply {
            Reply::Grant(token) => callback(json!({ "access_token": token })),
            Reply::Payload(payload) => callback(payload),
            Reply::Error(payload) => error_callback(payload),
            Reply::Both(token, payload) => {
                callback(json!({ "access_token": token }));
                error_callback(payload);
            }
            Reply::Hang => {}
        }
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    pub client: Arc<FakeTokenClient>,
    pub inits: AtomicUsize,
    pub revoked: Mutex<Vec<String>>,
}

impl FakeIdentity {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

impl IdentityProvider for FakeIdentity {
    fn init_token_client(&self, _config: &TokenClientConfig) -> AuthResult<Arc<dyn TokenClient>> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }

    fn revoke(&self, token: &str) -> BoxFuture<'_, AuthResult<()>> {
        self.revoked.lock().unwrap().push(token.to_string());
        Box::pin(async { Ok(()) })
    }
}

/// Mail API resolving the profile email from the ambient token.
#[derive(Default)]
pub struct FakeMail {
    token: Mutex<Option<String>>,
    owners: Mutex<HashMap<String, String>>,
    pub inits: AtomicUsize,
}

impl FakeMail {
    /// Declares which email a token belongs to.
    pub fn owner(&self, token: &str, email: &str) {
        self.owners
            .lock()
            .unwrap()
            .insert(token.to_string(), email.to_string());
    }
}

impl MailApi for FakeMail {
    fn init(&self) -> BoxFuture<'_, AuthResult<()>> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn set_access_token(&self, token: Option<String>) {
        *self.token.lock().unwrap() = token;
    }

    fn access_token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    fn get_profile(&self) -> BoxFuture<'_, AuthResult<Profile>> {
        let token = self.access_token();
        let email = token.and_then(|t| self.owners.lock().unwrap().get(&t).cloned());
        Box::pin(async move {
            email.map(Profile::new).ok_or_else(|| {
                AuthError::provider(json!({ "error": { "code": 401, "message": "Invalid Credentials" } }))
            })
        })
    }
}

/// Host with a document where every script injection fails.
#[derive(Default)]
pub struct BrokenHost {
    pub injections: AtomicUsize,
}

impl ScriptHost for BrokenHost {
    fn has_document(&self) -> bool {
        true
    }

    fn has_marked_script(&self, _marker: &str) -> bool {
        false
    }

    fn inject_script(&self, _url: &str, _marker: &str) -> BoxFuture<'static, Result<(), String>> {
        self.injections.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err("blocked by content security policy".to_string()) })
    }
}
