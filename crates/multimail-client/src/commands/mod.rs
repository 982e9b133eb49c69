//! Command implementations.

pub mod accounts;
pub mod config;
pub mod session;

use multimail_auth::Authorizer;

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Wires the orchestrator to the session file and the Google capabilities.
///
/// A client id from `config.toml` is copied into the session store only when
/// the store has none.
#[cfg(feature = "google")]
pub fn build_authorizer(config: &ClientConfig) -> ClientResult<Authorizer> {
    use std::sync::Arc;

    use multimail_auth::google::{GmailApiClient, LoopbackIdentity};
    use multimail_auth::{AuthorizerConfig, Capabilities, FileStore, NativeHost};
    use tracing::debug;

    let google = config.google.to_google_config()?;
    let session_path = config.storage.session_path();
    debug!(path = %session_path.display(), "opening session store");

    let authorizer = Authorizer::new(
        Capabilities {
            scripts: Arc::new(NativeHost),
            identity: Arc::new(LoopbackIdentity::new(google.clone())?),
            mail: Arc::new(GmailApiClient::new(&google)?),
            store: Arc::new(FileStore::open(session_path)),
        },
        AuthorizerConfig {
            token_timeout: config.google.token_timeout(),
        },
    );

    if authorizer.client_id().is_none()
        && let Some(client_id) = config.google.resolve_client_id()?
    {
        debug!("seeding client id from config.toml");
        authorizer.set_client_id(&client_id)?;
    }

    Ok(authorizer)
}

#[cfg(not(feature = "google"))]
pub fn build_authorizer(_config: &ClientConfig) -> ClientResult<Authorizer> {
    Err(crate::error::ClientError::Config(
        "multimail was built without the `google` feature".to_string(),
    ))
}
