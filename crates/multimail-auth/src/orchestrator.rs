//! Authorization orchestrator.
//!
//! [`Authorizer`] drives the whole lifecycle: script loading, mail API
//! initialization, token client construction, token acquisition, profile
//! lookup and account registration.
//!
//! ```text
//! Unconfigured ──set_client_id──▶ Idle ──init_client──▶ Initializing ──▶ Ready
//!      ▲                           ▲                         │
//!      └──────set_client_id(None)──┴───────── failure ◀──────┘
//! ```
//!
//! Every public operation records its outcome on the status line. Failures
//! are also returned to the caller so programmatic users (the search
//! self-heal path) can react to them.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use multimail_core::{AccountSession, SelectionSet, StatusLine};
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::provider::{BoxFuture, IdentityProvider, MailApi, TokenRequestOptions};
use crate::registry::AccountRegistry;
use crate::script::{ScriptHost, ScriptLoader};
use crate::search::SearchAuth;
use crate::store::{KeyValueStore, SessionStore};
use crate::token::{DEFAULT_TOKEN_TIMEOUT, TokenClientManager};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No client id configured.
    Unconfigured,
    /// Configured, not initialized yet.
    Idle,
    /// Scripts loading or mail API initializing.
    Initializing,
    /// Mail API initialized and token client constructed.
    Ready,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of the last authorization operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized { email: String },
    AuthorizationFailed { message: String },
}

/// Options for [`Authorizer::authorize_account`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReauthOptions {
    /// Skip the silent attempt and go straight to interactive consent.
    pub force_prompt: bool,
}

/// Result of a silent restore pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Emails that received a token.
    pub restored: Vec<String>,
    /// Emails whose silent request failed.
    pub needs_consent: Vec<String>,
}

impl RestoreReport {
    pub fn is_empty(&self) -> bool {
        self.restored.is_empty() && self.needs_consent.is_empty()
    }
}

/// The externally owned handles the orchestrator drives.
#[derive(Clone)]
pub struct Capabilities {
    pub scripts: Arc<dyn ScriptHost>,
    pub identity: Arc<dyn IdentityProvider>,
    pub mail: Arc<dyn MailApi>,
    pub store: Arc<dyn KeyValueStore>,
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizerConfig {
    /// How long a token request waits for the provider. `None` waits forever.
    pub token_timeout: Option<Duration>,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            token_timeout: Some(DEFAULT_TOKEN_TIMEOUT),
        }
    }
}

/// The authorization orchestrator.
pub struct Authorizer {
    session: SessionStore,
    scripts: Arc<ScriptLoader>,
    mail: Arc<dyn MailApi>,
    tokens: Arc<TokenClientManager>,
    registry: AccountRegistry,
    state: Mutex<AuthState>,
    outcome: Mutex<Option<AuthOutcome>>,
    status: Mutex<StatusLine>,
    init_lock: tokio::sync::Mutex<()>,
}

impl Authorizer {
    pub fn new(capabilities: Capabilities, config: AuthorizerConfig) -> Self {
        let session = SessionStore::new(capabilities.store);
        let scripts = Arc::new(ScriptLoader::new(capabilities.scripts));
        let tokens = Arc::new(
            TokenClientManager::new(
                capabilities.identity,
                capabilities.mail.clone(),
                scripts.clone(),
                session.clone(),
            )
            .with_timeout(config.token_timeout),
        );
        let registry = AccountRegistry::load(session.clone(), tokens.clone());
        let state = if session.client_id().is_some() {
            AuthState::Idle
        } else {
            AuthState::Unconfigured
        };

        Self {
            session,
            scripts,
            mail: capabilities.mail,
            tokens,
            registry,
            state: Mutex::new(state),
            outcome: Mutex::new(None),
            status: Mutex::new(StatusLine::info("Not connected")),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: AuthState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            info!(from = %*current, to = %state, "authorization state changed");
            *current = state;
        }
    }

    /// The most recent status line.
    pub fn status(&self) -> StatusLine {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_status(&self, status: StatusLine) {
        debug!(%status, "status");
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Outcome of the last authorization operation.
    pub fn outcome(&self) -> Option<AuthOutcome> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn client_id(&self) -> Option<String> {
        self.session.client_id()
    }

    pub fn selection(&self) -> SelectionSet {
        self.registry.selection()
    }

    pub fn account(&self, email: &str) -> Option<AccountSession> {
        self.registry.account(email)
    }

    /// Records a failure on the status line and hands the error back.
    fn fail<T>(&self, error: AuthError) -> AuthResult<T> {
        warn!(code = %error.code(), error = %error.message(), "operation failed");
        self.set_status(StatusLine::error(error.user_message()));
        Err(error)
    }

    /// Persists a new client id and resets to `Idle` (or `Unconfigured` when
    /// the id is empty).
    pub fn set_client_id(&self, client_id: &str) -> AuthResult<()> {
        if let Err(e) = self.session.set_client_id(Some(client_id)) {
            return self.fail(e);
        }
        self.tokens.invalidate();
        if self.session.client_id().is_some() {
            self.set_state(AuthState::Idle);
            self.set_status(StatusLine::info("Client ID saved"));
        } else {
            self.set_state(AuthState::Unconfigured);
            self.set_status(StatusLine::info("Client ID cleared"));
        }
        Ok(())
    }

    /// Brings the orchestrator to `Ready` and runs the silent restore pass.
    ///
    /// Returns `None` when it was already ready.
    async fn initialize(&self) -> AuthResult<Option<RestoreReport>> {
        let _guard = self.init_lock.lock().await;
        if self.state() == AuthState::Ready {
            return Ok(None);
        }
        if self.session.client_id().is_none() {
            self.set_state(AuthState::Unconfigured);
            return Err(AuthError::missing_credentials());
        }

        self.set_state(AuthState::Initializing);
        let setup = async {
            self.scripts.ensure_all().await?;
            self.mail.init().await?;
            self.tokens.setup_token_client(false)?;
            Ok::<_, AuthError>(())
        };
        if let Err(e) = setup.await {
            self.set_state(AuthState::Idle);
            return Err(e);
        }
        self.set_state(AuthState::Ready);

        Ok(Some(self.restore_pass().await))
    }

    /// One silent, hinted request per account without a token, in order.
    async fn restore_pass(&self) -> RestoreReport {
        let mut report = RestoreReport::default();
        let pending: Vec<String> = self
            .registry
            .accounts()
            .into_iter()
            .filter(|a| a.token.is_none())
            .map(|a| a.email)
            .collect();

        for email in pending {
            let options = TokenRequestOptions::silent().with_hint(&email);
            let restored = match self.tokens.request_access_token(options).await {
                Ok(token) => self.register(&token).await,
                Err(e) => Err(e),
            };
            match restored {
                Ok(account) if account.email == email => {
                    debug!(email = %email, "restored session");
                    report.restored.push(account.email);
                }
                Ok(account) => {
                    warn!(hint = %email, email = %account.email, "provider granted a different account");
                    report.restored.push(account.email);
                    if let Err(e) = self.registry.mark_needs_consent(&email) {
                        warn!(email = %email, error = %e, "failed to flag account");
                    }
                    report.needs_consent.push(email);
                }
                Err(e) => {
                    warn!(email = %email, error = %e, "silent restore failed");
                    if let Err(e) = self.registry.mark_needs_consent(&email) {
                        warn!(email = %email, error = %e, "failed to flag account");
                    }
                    report.needs_consent.push(email);
                }
            }
        }

        if !report.is_empty() {
            info!(
                restored = report.restored.len(),
                needs_consent = report.needs_consent.len(),
                "silent restore finished"
            );
        }
        report
    }

    /// Looks up the profile for the ambient token and upserts the account.
    async fn register(&self, token: &str) -> AuthResult<AccountSession> {
        let profile = self.mail.get_profile().await?;
        self.registry.add_or_update_account(&profile.email_address, token)
    }

    fn restored_status(report: &RestoreReport) -> StatusLine {
        match (report.restored.len(), report.needs_consent.len()) {
            (0, 0) => StatusLine::success("Google API ready"),
            (restored, 0) => StatusLine::success(format!("Google API ready, restored {restored} account(s)")),
            (restored, pending) => StatusLine::info(format!(
                "Google API ready, restored {restored} account(s), {pending} need(s) reauthorization"
            )),
        }
    }

    /// Idempotent entry point: validates the configuration, loads both
    /// scripts, initializes the mail API, builds the token client and then
    /// silently restores accounts without a token.
    pub async fn init_client(&self) -> AuthResult<RestoreReport> {
        match self.initialize().await {
            Ok(report) => {
                let report = report.unwrap_or_default();
                self.set_status(Self::restored_status(&report));
                Ok(report)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Best-effort startup initialization when a client id is already
    /// persisted. Failures are logged only.
    pub async fn auto_initialize(&self) {
        if self.session.client_id().is_none() {
            debug!("no client id, skipping auto initialization");
            return;
        }
        match self.initialize().await {
            Ok(Some(report)) => self.set_status(Self::restored_status(&report)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "auto initialization failed"),
        }
    }

    /// Runs a silent restore pass, initializing first if needed.
    pub async fn restore_sessions(&self) -> AuthResult<RestoreReport> {
        let report = match self.initialize().await {
            Ok(Some(report)) => report,
            Ok(None) => self.restore_pass().await,
            Err(e) => return self.fail(e),
        };
        self.set_status(Self::restored_status(&report));
        Ok(report)
    }

    fn conclude(&self, result: AuthResult<AccountSession>) -> AuthResult<AccountSession> {
        let outcome = match &result {
            Ok(account) => {
                info!(email = %account.email, "account authorized");
                self.set_status(StatusLine::success(format!("Connected {}", account.email)));
                AuthOutcome::Authorized {
                    email: account.email.clone(),
                }
            }
            Err(e) => {
                warn!(code = %e.code(), error = %e.message(), "authorization failed");
                let message = e.user_message();
                self.set_status(StatusLine::error(message.clone()));
                AuthOutcome::AuthorizationFailed { message }
            }
        };
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        result
    }

    /// Connects a new account through interactive consent and the account
    /// chooser.
    pub async fn authorize_new_account(&self) -> AuthResult<AccountSession> {
        let result = async {
            self.initialize().await?;
            self.mail.set_access_token(None);
            let options = TokenRequestOptions::consent().force_prompt().select_account();
            let token = self.tokens.request_access_token(options).await?;
            self.register(&token).await
        };
        self.conclude(result.await)
    }

    /// Reauthorizes an existing account.
    ///
    /// With a hint, a silent request is tried first and, if it fails, one
    /// interactive request with the same hint follows. Without a hint a
    /// failed silent request is final. The account stored is whichever email
    /// the granted token belongs to, which may differ from the hint.
    pub async fn authorize_account(
        &self,
        hint: Option<&str>,
        options: ReauthOptions,
    ) -> AuthResult<AccountSession> {
        let result = async {
            self.initialize().await?;
            let token = self.reauthorize_token(hint, options).await?;
            self.register(&token).await
        };
        self.conclude(result.await)
    }

    async fn reauthorize_token(&self, hint: Option<&str>, options: ReauthOptions) -> AuthResult<String> {
        let consent = || {
            let request = TokenRequestOptions::consent();
            match hint {
                Some(email) => request.with_hint(email),
                None => request,
            }
        };

        if options.force_prompt {
            return self.tokens.request_access_token(consent().force_prompt()).await;
        }

        let silent = match hint {
            Some(email) => TokenRequestOptions::silent().with_hint(email),
            None => TokenRequestOptions::silent(),
        };
        match self.tokens.request_access_token(silent).await {
            Ok(token) => Ok(token),
            Err(e) if hint.is_some() => {
                debug!(hint, error = %e, "silent refresh failed, asking for consent");
                self.tokens.request_access_token(consent()).await
            }
            Err(e) => Err(e),
        }
    }

    /// Removes one account, revoking its token first.
    pub async fn remove_account(&self, email: &str) -> AuthResult<bool> {
        match self.registry.remove_account(email).await {
            Ok(true) => {
                self.set_status(StatusLine::success(format!("Removed {email}")));
                Ok(true)
            }
            Ok(false) => {
                self.set_status(StatusLine::info(format!("No account {email}")));
                Ok(false)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Revokes every token and clears the roster, the selection and the
    /// ambient token.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let result = self.registry.sign_out_all().await;
        self.mail.set_access_token(None);
        match result {
            Ok(()) => {
                self.set_status(StatusLine::success("Signed out of all accounts"));
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Replaces the search selection.
    pub fn set_selection<I, S>(&self, emails: I) -> AuthResult<SelectionSet>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.registry.set_selection(emails) {
            Ok(selection) => {
                self.set_status(StatusLine::info(format!(
                    "{} account(s) selected",
                    selection.len()
                )));
                Ok(selection)
            }
            Err(e) => self.fail(e),
        }
    }
}

impl SearchAuth for Authorizer {
    fn ready_for_search(&self) -> bool {
        self.state() == AuthState::Ready && self.registry.is_signed_in()
    }

    fn accounts(&self) -> Vec<AccountSession> {
        self.registry.accounts()
    }

    fn selected_accounts(&self) -> Vec<AccountSession> {
        self.registry.selected_accounts()
    }

    fn request_access_token(&self, options: TokenRequestOptions) -> BoxFuture<'_, AuthResult<String>> {
        Box::pin(async move {
            match self.tokens.request_access_token(options).await {
                Ok(token) => Ok(token),
                Err(e) => self.fail(e),
            }
        })
    }

    fn add_or_update_account(&self, email: &str, token: &str) -> AuthResult<AccountSession> {
        self.registry.add_or_update_account(email, token)
    }
}

impl fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorizer")
            .field("state", &self.state())
            .field("registry", &self.registry)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
