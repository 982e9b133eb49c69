//! Native Google capability implementations.
//!
//! - [`LoopbackIdentity`] stands in for the browser identity library. Each
//!   token request runs an OAuth 2.0 PKCE flow on a loopback redirect and
//!   reports through the token client's callbacks.
//! - [`GmailApiClient`] holds the ambient bearer token and looks up the
//!   account profile.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use multimail_auth::google::{GmailApiClient, GoogleConfig, LoopbackIdentity};
//! use multimail_auth::{Authorizer, AuthorizerConfig, Capabilities, FileStore, NativeHost};
//!
//! let google = GoogleConfig::default().with_client_secret(secret);
//! let authorizer = Authorizer::new(
//!     Capabilities {
//!         scripts: Arc::new(NativeHost),
//!         identity: Arc::new(LoopbackIdentity::new(google.clone())?),
//!         mail: Arc::new(GmailApiClient::new(&google)?),
//!         store: Arc::new(FileStore::open(session_path)),
//!     },
//!     AuthorizerConfig::default(),
//! );
//! ```

mod config;
mod gmail;
mod oauth;

pub use config::{DEFAULT_HTTP_TIMEOUT, DEFAULT_PORT_RANGE, GoogleConfig, validate_client_id};
pub use gmail::GmailApiClient;
pub use oauth::{LoopbackIdentity, LoopbackTokenClient, PkceFlow};
