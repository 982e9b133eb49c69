//! Configuration commands.

use multimail_auth::Authorizer;

use crate::config::{ClientConfig, save_client_secret};
use crate::error::{ClientError, ClientResult};
use crate::secret::SecretRef;

/// Dump the current configuration to stdout.
///
/// A plain-text client secret is masked; secret references are shown as written.
pub fn dump(config: &ClientConfig) -> ClientResult<()> {
    let mut shown = config.clone();
    if let Some(secret) = shown.google.client_secret.as_mut()
        && !SecretRef::parse(secret).is_reference()
    {
        *secret = "<redacted>".to_string();
    }

    let toml_str = toml::to_string_pretty(&shown)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", ClientConfig::default_path().display());
    println!("{}", toml_str);
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    config.validate()?;
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration and session file paths.
pub fn path(config_path: &std::path::Path, config: &ClientConfig) -> ClientResult<()> {
    println!("config: {}", config_path.display());
    println!("session: {}", config.storage.session_path().display());
    Ok(())
}

/// Store the OAuth client id, and optionally the secret in `config.toml`.
pub fn set_client_id(
    authorizer: &Authorizer,
    client_id: &str,
    client_secret: Option<&str>,
    config_path: &std::path::Path,
) -> ClientResult<()> {
    #[cfg(feature = "google")]
    if !client_id.trim().is_empty() {
        multimail_auth::google::validate_client_id(client_id)
            .map_err(|e| ClientError::Config(e.to_string()))?;
    }

    authorizer.set_client_id(client_id)?;
    match authorizer.client_id() {
        Some(id) => println!("Client id set to {}", id),
        None => println!("Client id cleared"),
    }

    if let Some(secret) = client_secret {
        save_client_secret(config_path, secret)?;
        println!("Client secret saved to {}", config_path.display());
    }
    Ok(())
}
