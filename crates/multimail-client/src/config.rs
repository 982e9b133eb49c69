//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/multimail/config.toml` by default.
//!
//! Credential values (`client_id`, `client_secret`) support secret references:
//! - `pass::path/in/store` resolved via `pass show`
//! - `env::VAR_NAME` resolved from the environment
//! - plain text used as-is

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use multimail_auth::DEFAULT_TOKEN_TIMEOUT;

use crate::error::{ClientError, ClientResult};
use crate::secret;

// ---------------------------------------------------------------------------
// ClientConfig (config.toml)
// ---------------------------------------------------------------------------

/// Configuration for the multimail client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode.
    pub debug: bool,

    /// Google OAuth settings.
    pub google: GoogleSettings,

    /// Where the account roster is kept.
    pub storage: StorageSettings,
}

impl ClientConfig {
    /// Loads configuration from the default path, or defaults when absent.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ClientError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("multimail")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("multimail")
    }

    /// Checks every setting, resolving secret references.
    pub fn validate(&self) -> ClientResult<()> {
        self.google.validate()
    }
}

// ---------------------------------------------------------------------------
// StorageSettings
// ---------------------------------------------------------------------------

/// Session storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON file holding the client id, roster and selection.
    pub session_path: Option<PathBuf>,
}

impl StorageSettings {
    pub fn session_path(&self) -> PathBuf {
        self.session_path
            .clone()
            .unwrap_or_else(|| ClientConfig::default_data_dir().join("session.json"))
    }
}

// ---------------------------------------------------------------------------
// GoogleSettings
// ---------------------------------------------------------------------------

/// Google OAuth settings.
///
/// `client_id` here only seeds the session store when it has none; the
/// stored value set by `config set-client-id` wins afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// OAuth client ID (supports `pass::` and `env::` prefixes).
    pub client_id: Option<String>,

    /// OAuth client secret (supports `pass::` and `env::` prefixes).
    pub client_secret: Option<String>,

    /// Seconds a token request may take. `0` waits forever.
    pub token_timeout_secs: Option<u64>,

    /// First port tried for the loopback redirect.
    pub loopback_port_start: Option<u16>,

    /// Last port tried for the loopback redirect.
    pub loopback_port_end: Option<u16>,
}

impl GoogleSettings {
    pub fn resolve_client_id(&self) -> ClientResult<Option<String>> {
        resolve_optional("client_id", self.client_id.as_deref())
    }

    pub fn resolve_client_secret(&self) -> ClientResult<Option<String>> {
        resolve_optional("client_secret", self.client_secret.as_deref())
    }

    pub fn token_timeout(&self) -> Option<Duration> {
        match self.token_timeout_secs {
            None => Some(DEFAULT_TOKEN_TIMEOUT),
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        }
    }

    /// Builds the settings for the Google capability implementations.
    #[cfg(feature = "google")]
    pub fn to_google_config(&self) -> ClientResult<multimail_auth::google::GoogleConfig> {
        use multimail_auth::google::{DEFAULT_PORT_RANGE, GoogleConfig};

        let mut config = GoogleConfig::default();
        if let Some(secret) = self.resolve_client_secret()? {
            config = config.with_client_secret(secret);
        }
        if self.loopback_port_start.is_some() || self.loopback_port_end.is_some() {
            let start = self.loopback_port_start.unwrap_or(DEFAULT_PORT_RANGE.0);
            let end = self.loopback_port_end.unwrap_or(start.max(DEFAULT_PORT_RANGE.1));
            config = config.with_port_range(start, end);
        }
        if let Some(timeout) = self.token_timeout() {
            config = config.with_callback_timeout(timeout);
        }
        config
            .validate()
            .map_err(|e| ClientError::Config(format!("[google] {}", e)))?;
        Ok(config)
    }

    fn validate(&self) -> ClientResult<()> {
        #[cfg(feature = "google")]
        {
            if let Some(id) = self.resolve_client_id()? {
                multimail_auth::google::validate_client_id(&id)
                    .map_err(|e| ClientError::Config(format!("[google] {}", e)))?;
            }
            self.to_google_config()?;
        }
        #[cfg(not(feature = "google"))]
        {
            self.resolve_client_id()?;
            self.resolve_client_secret()?;
        }
        Ok(())
    }
}

fn resolve_optional(field: &str, raw: Option<&str>) -> ClientResult<Option<String>> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    secret::resolve(raw)
        .map(Some)
        .map_err(|e| ClientError::Secret(format!("failed to resolve {}: {}", field, e)))
}

/// Writes `client_secret` into the `[google]` table of the file at `path`.
///
/// Edits the document in place so comments and unrelated keys survive.
pub fn save_client_secret(path: &Path, client_secret: &str) -> ClientResult<()> {
    let content = if path.exists() {
        std::fs::read_to_string(path)?
    } else {
        String::new()
    };

    let mut doc = content.parse::<toml_edit::DocumentMut>().map_err(|e| {
        ClientError::Config(format!("could not parse {} for writing: {}", path.display(), e))
    })?;

    if !doc.contains_key("google") {
        doc["google"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    let google = doc["google"].as_table_mut().ok_or_else(|| {
        ClientError::Config(format!("`google` in {} is not a table", path.display()))
    })?;
    google["client_secret"] = toml_edit::value(client_secret);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, doc.to_string())?;
    info!(path = %path.display(), "saved client secret");
    Ok(())
}
