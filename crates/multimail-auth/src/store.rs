//! Persisted session store.
//!
//! A string key-value contract ([`KeyValueStore`]) with two backends, and a
//! typed view over it ([`SessionStore`]) for the fixed keys the authorization
//! core owns. Stored values are JSON. Malformed values are discarded and read
//! as empty, never surfaced as errors.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use multimail_core::{AccountSession, SelectionSet};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};

/// Fixed storage keys.
pub mod keys {
    pub const CLIENT_ID: &str = "multimail.clientId";
    pub const ACCOUNTS: &str = "multimail.accounts";
    pub const SELECTED_ACCOUNTS: &str = "multimail.selectedAccounts";
    /// Owned by the search component.
    pub const SEARCH_QUERY: &str = "multimail.searchQuery";
}

/// A durable string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AuthResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AuthResult<()>;
    fn remove(&self, key: &str) -> AuthResult<()>;
}

/// In-memory store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with raw values.
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: Mutex::new(values),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AuthResult<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// The file is read once on open and rewritten on every mutation, through a
/// temp file and rename. On Unix the file is made readable by the owner only,
/// since it holds bearer tokens.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`.
    ///
    /// A missing file opens empty. An unreadable or malformed file also opens
    /// empty and is replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = Self::read_file(&path).unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn read_file(path: &Path) -> Option<BTreeMap<String, String>> {
        if !path.exists() {
            debug!(?path, "no session file");
            return None;
        }
        let content = fs::read_to_string(path)
            .inspect_err(|e| warn!(?path, error = %e, "failed to read session file"))
            .ok()?;
        let values = serde_json::from_str(&content)
            .inspect_err(|e| warn!(?path, error = %e, "discarding malformed session file"))
            .ok()?;
        info!(?path, "loaded session file");
        Some(values)
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AuthError::storage(format!("failed to create session directory: {e}"))
                    .with_source(e)
            })?;
        }

        let content = serde_json::to_string_pretty(values)
            .map_err(|e| AuthError::storage(format!("failed to serialize session: {e}")))?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content).map_err(|e| {
            AuthError::storage(format!("failed to write session file: {e}")).with_source(e)
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600));
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            AuthError::storage(format!("failed to replace session file: {e}")).with_source(e)
        })?;

        debug!(path = ?self.path, "saved session file");
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> AuthResult<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut values);
        self.save(&values)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> AuthResult<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

/// Typed access to the session keys.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Returns the configured OAuth client id. Empty ids read as absent.
    pub fn client_id(&self) -> Option<String> {
        self.read::<String>(keys::CLIENT_ID)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
    }

    /// Stores the client id; `None` or an empty id removes it.
    pub fn set_client_id(&self, client_id: Option<&str>) -> AuthResult<()> {
        match client_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self.write(keys::CLIENT_ID, &id),
            None => self.kv.remove(keys::CLIENT_ID),
        }
    }

    /// Returns the stored roster.
    ///
    /// Entries that do not parse are dropped. Duplicate emails collapse to
    /// the first occurrence.
    pub fn accounts(&self) -> Vec<AccountSession> {
        let mut seen = HashSet::new();
        self.read_list::<AccountSession>(keys::ACCOUNTS)
            .into_iter()
            .filter(|account| seen.insert(account.email.clone()))
            .collect()
    }

    pub fn save_accounts(&self, accounts: &[AccountSession]) -> AuthResult<()> {
        self.write(keys::ACCOUNTS, &accounts)
    }

    /// Returns the stored selection. Non-string entries are dropped.
    pub fn selection(&self) -> SelectionSet {
        SelectionSet::from_emails(self.read_list::<String>(keys::SELECTED_ACCOUNTS))
    }

    pub fn save_selection(&self, selection: &SelectionSet) -> AuthResult<()> {
        self.write(keys::SELECTED_ACCOUNTS, selection)
    }

    fn raw(&self, key: &str) -> Option<Value> {
        let raw = match self.kv.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "failed to read stored value");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .inspect_err(|e| warn!(key, error = %e, "discarding unparsable stored value"))
            .ok()
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.raw(key)?;
        serde_json::from_value(value)
            .inspect_err(|e| warn!(key, error = %e, "discarding malformed stored value"))
            .ok()
    }

    fn read_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match self.raw(key) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| {
                    serde_json::from_value(item)
                        .inspect_err(|e| warn!(key, error = %e, "dropping malformed stored entry"))
                        .ok()
                })
                .collect(),
            Some(_) => {
                warn!(key, "discarding stored value that is not a list");
                Vec::new()
            }
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> AuthResult<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| AuthError::storage(format!("failed to serialize {key}: {e}")))?;
        self.kv.set(key, &json)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}
