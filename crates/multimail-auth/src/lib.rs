//! Multi-account OAuth authorization and token lifecycle for Gmail.
//!
//! This crate acquires, refreshes, stores and selects access tokens for any
//! number of Gmail accounts:
//!
//! - [`ScriptLoader`] - Loads the vendor libraries exactly once
//! - [`SessionStore`] - Typed view over the persisted key-value store
//! - [`TokenClientManager`] - Serialized, one-shot token requests
//! - [`AccountRegistry`] - Roster and selection, persisted on every mutation
//! - [`Authorizer`] - The orchestrator tying everything together
//! - [`SearchAuth`] - The contract the search component consumes
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  Authorizer  │◀──── SearchAuth (search)
//!                 └──────┬───────┘
//!        ┌───────────────┼────────────────┐
//!        ▼               ▼                ▼
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │ ScriptLoader │ │ TokenClient  │ │   Account    │
//! │              │ │   Manager    │ │   Registry   │
//! └──────┬───────┘ └──────┬───────┘ └──────┬───────┘
//!        ▼                ▼                ▼
//!   ScriptHost     IdentityProvider   SessionStore
//!                     MailApi        KeyValueStore
//! ```
//!
//! The vendor SDKs are injected as capability traits ([`provider`]). The
//! `google` feature provides native implementations backed by Google's
//! OAuth and Gmail HTTP endpoints.
//!
//! # Example
//!
//! ```ignore
//! use multimail_auth::{Authorizer, AuthorizerConfig, Capabilities};
//!
//! let authorizer = Authorizer::new(capabilities, AuthorizerConfig::default());
//! authorizer.auto_initialize().await;
//! let account = authorizer.authorize_new_account().await?;
//! println!("{}", authorizer.status());
//! ```

pub mod error;
#[cfg(feature = "google")]
pub mod google;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod script;
pub mod search;
pub mod store;
pub mod token;

#[cfg(test)]
mod testing;

pub use error::{AuthError, AuthErrorCode, AuthResult, describe_payload, remediation_hint};
pub use orchestrator::{
    AuthOutcome, AuthState, Authorizer, AuthorizerConfig, Capabilities, ReauthOptions,
    RestoreReport,
};
pub use provider::{
    BoxFuture, GMAIL_READONLY_SCOPE, IdentityProvider, MailApi, PayloadCallback, Profile,
    PromptMode, TokenClient, TokenClientConfig, TokenRequest, TokenRequestOptions, TokenRevoker,
};
pub use registry::AccountRegistry;
pub use script::{NativeHost, ScriptHost, ScriptKind, ScriptLoader};
pub use search::SearchAuth;
pub use store::{FileStore, KeyValueStore, MemoryStore, SessionStore};
pub use token::{DEFAULT_TOKEN_TIMEOUT, TokenClientManager};
