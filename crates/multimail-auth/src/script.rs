//! Vendor script loading.
//!
//! The API client library and the identity library must each be present
//! exactly once. [`ScriptLoader::ensure_loaded`] is idempotent: the loaded
//! state is tracked both in memory and through a marker attribute on the
//! injected tag, and concurrent callers share one in-flight attempt.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::Shared;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::provider::BoxFuture;

/// The two vendor scripts the authorization core depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    /// The mail API client library.
    ApiClient,
    /// The identity/token library.
    Identity,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 2] = [ScriptKind::ApiClient, ScriptKind::Identity];

    /// Fixed vendor URL.
    pub fn url(&self) -> &'static str {
        match self {
            Self::ApiClient => "https://apis.google.com/js/api.js",
            Self::Identity => "https://accounts.google.com/gsi/client",
        }
    }

    /// Attribute set on the injected tag.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::ApiClient => "data-multimail-gapi",
            Self::Identity => "data-multimail-gis",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiClient => f.write_str("api client"),
            Self::Identity => f.write_str("identity"),
        }
    }
}

/// The document the scripts are injected into.
pub trait ScriptHost: Send + Sync {
    /// Returns false outside a browser execution context.
    fn has_document(&self) -> bool;

    /// Returns true if a tag carrying `marker` is already in the document.
    fn has_marked_script(&self, marker: &str) -> bool;

    /// Injects a tag for `url` carrying `marker`; resolves when it loads.
    fn inject_script(&self, url: &str, marker: &str) -> BoxFuture<'static, Result<(), String>>;
}

/// Host for native processes: no document, nothing to load.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeHost;

impl ScriptHost for NativeHost {
    fn has_document(&self) -> bool {
        false
    }

    fn has_marked_script(&self, _marker: &str) -> bool {
        false
    }

    fn inject_script(&self, url: &str, _marker: &str) -> BoxFuture<'static, Result<(), String>> {
        let message = format!("cannot load {url} without a document");
        Box::pin(async move { Err(message) })
    }
}

type LoadAttempt = Shared<BoxFuture<'static, Result<(), String>>>;

enum LoadState {
    Loaded,
    Loading(LoadAttempt),
}

/// Loads vendor scripts at most once each.
pub struct ScriptLoader {
    host: Arc<dyn ScriptHost>,
    states: Mutex<HashMap<ScriptKind, LoadState>>,
}

impl ScriptLoader {
    pub fn new(host: Arc<dyn ScriptHost>) -> Self {
        Self {
            host,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Ensures the script is loaded.
    ///
    /// A no-op success without a document. A caller arriving while a load is
    /// in flight awaits that same attempt. A failed attempt is forgotten so
    /// the next call injects a fresh tag.
    pub async fn ensure_loaded(&self, kind: ScriptKind) -> AuthResult<()> {
        if !self.host.has_document() {
            debug!(%kind, "no document, skipping script load");
            return Ok(());
        }

        let attempt = {
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            match states.get(&kind) {
                Some(LoadState::Loaded) => return Ok(()),
                Some(LoadState::Loading(attempt)) => attempt.clone(),
                None if self.host.has_marked_script(kind.marker()) => {
                    debug!(%kind, "script already present in document");
                    states.insert(kind, LoadState::Loaded);
                    return Ok(());
                }
                None => {
                    info!(%kind, url = kind.url(), "injecting script");
                    let attempt = self.host.inject_script(kind.url(), kind.marker()).shared();
                    states.insert(kind, LoadState::Loading(attempt.clone()));
                    attempt
                }
            }
        };

        let result = attempt.clone().await;

        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let current = matches!(
            states.get(&kind),
            Some(LoadState::Loading(pending)) if pending.ptr_eq(&attempt)
        );
        match result {
            Ok(()) => {
                if current {
                    states.insert(kind, LoadState::Loaded);
                }
                Ok(())
            }
            Err(message) => {
                if current {
                    states.remove(&kind);
                }
                warn!(%kind, error = %message, "script load failed");
                Err(AuthError::script_load(format!(
                    "failed to load {}: {message}",
                    kind.url()
                )))
            }
        }
    }

    /// Loads both scripts concurrently.
    pub async fn ensure_all(&self) -> AuthResult<()> {
        let (api, identity) = futures_util::future::join(
            self.ensure_loaded(ScriptKind::ApiClient),
            self.ensure_loaded(ScriptKind::Identity),
        )
        .await;
        api.and(identity)
    }

    /// Returns true if the script is usable.
    pub fn is_loaded(&self, kind: ScriptKind) -> bool {
        if !self.host.has_document() {
            return true;
        }
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(states.get(&kind), Some(LoadState::Loaded))
            || self.host.has_marked_script(kind.marker())
    }
}

impl fmt::Debug for ScriptLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptLoader")
            .field("api_client", &self.is_loaded(ScriptKind::ApiClient))
            .field("identity", &self.is_loaded(ScriptKind::Identity))
            .finish()
    }
}
