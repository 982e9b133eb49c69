//! Account registry.
//!
//! Holds the roster and the selection set in memory and persists both after
//! every mutation. Every mutation also repairs the selection against the
//! roster (see [`SelectionSet::reconcile`]).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use multimail_core::{AccountSession, SelectionSet};
use tracing::{debug, info, warn};

use crate::error::AuthResult;
use crate::provider::TokenRevoker;
use crate::store::SessionStore;

#[derive(Default)]
struct Roster {
    accounts: Vec<AccountSession>,
    selection: SelectionSet,
}

impl Roster {
    fn position(&self, email: &str) -> Option<usize> {
        self.accounts.iter().position(|a| a.email == email)
    }
}

/// The set of authorized accounts.
pub struct AccountRegistry {
    session: SessionStore,
    revoker: Arc<dyn TokenRevoker>,
    roster: Mutex<Roster>,
}

impl AccountRegistry {
    /// Loads the roster and selection from the session store.
    pub fn load(session: SessionStore, revoker: Arc<dyn TokenRevoker>) -> Self {
        let accounts = session.accounts();
        let mut selection = session.selection();
        if selection.reconcile(&accounts) {
            debug!("repaired stored selection");
            if let Err(e) = session.save_selection(&selection) {
                warn!(error = %e, "failed to persist repaired selection");
            }
        }
        info!(accounts = accounts.len(), "loaded account roster");

        Self {
            session,
            revoker,
            roster: Mutex::new(Roster {
                accounts,
                selection,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Roster> {
        self.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Repairs the selection and writes both keys.
    fn persist(&self, roster: &mut Roster) -> AuthResult<()> {
        roster.selection.reconcile(&roster.accounts);
        self.session.save_accounts(&roster.accounts)?;
        self.session.save_selection(&roster.selection)
    }

    pub fn accounts(&self) -> Vec<AccountSession> {
        self.lock().accounts.clone()
    }

    pub fn account(&self, email: &str) -> Option<AccountSession> {
        let roster = self.lock();
        roster.position(email).map(|i| roster.accounts[i].clone())
    }

    pub fn selection(&self) -> SelectionSet {
        self.lock().selection.clone()
    }

    /// Accounts included in search, in roster order.
    pub fn selected_accounts(&self) -> Vec<AccountSession> {
        let roster = self.lock();
        roster
            .accounts
            .iter()
            .filter(|a| roster.selection.contains(&a.email))
            .cloned()
            .collect()
    }

    /// Returns true if at least one account is registered.
    pub fn is_signed_in(&self) -> bool {
        !self.lock().accounts.is_empty()
    }

    /// Inserts or updates the account for `email` with a fresh token.
    ///
    /// A new email is appended to the selection. An existing selection is
    /// never narrowed by this call.
    pub fn add_or_update_account(&self, email: &str, token: &str) -> AuthResult<AccountSession> {
        let mut roster = self.lock();
        let account = match roster.position(email) {
            Some(i) => {
                roster.accounts[i].grant(token);
                debug!(email, "updated account token");
                roster.accounts[i].clone()
            }
            None => {
                let account = AccountSession::authorized(email, token);
                roster.accounts.push(account.clone());
                info!(email, "added account");
                account
            }
        };
        roster.selection.insert(email);
        self.persist(&mut roster)?;
        Ok(account)
    }

    /// Drops the token of `email` and flags it for interactive consent.
    ///
    /// Returns false if the account is unknown.
    pub fn mark_needs_consent(&self, email: &str) -> AuthResult<bool> {
        let mut roster = self.lock();
        let Some(i) = roster.position(email) else {
            return Ok(false);
        };
        let account = &mut roster.accounts[i];
        account.token = None;
        account.needs_consent = true;
        self.persist(&mut roster)?;
        Ok(true)
    }

    /// Replaces the selection. Unknown emails are dropped, and an empty
    /// result selects every account.
    pub fn set_selection<I, S>(&self, emails: I) -> AuthResult<SelectionSet>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut roster = self.lock();
        roster.selection = SelectionSet::from_emails(emails);
        self.persist(&mut roster)?;
        Ok(roster.selection.clone())
    }

    /// Revokes the account's token, then deletes the account.
    ///
    /// Revocation is best-effort and skipped when the account has no token.
    /// Returns false if the account is unknown.
    pub async fn remove_account(&self, email: &str) -> AuthResult<bool> {
        let token = {
            let roster = self.lock();
            match roster.position(email) {
                Some(i) => roster.accounts[i].token.clone(),
                None => return Ok(false),
            }
        };

        if let Some(token) = token {
            if let Err(e) = self.revoker.revoke(&token).await {
                warn!(email, error = %e, "token revoke failed, removing account anyway");
            }
        }

        let mut roster = self.lock();
        let Some(i) = roster.position(email) else {
            return Ok(false);
        };
        roster.accounts.remove(i);
        roster.selection.remove(email);
        self.persist(&mut roster)?;
        info!(email, "removed account");
        Ok(true)
    }

    /// Revokes every stored token in turn, then clears the roster and the
    /// selection.
    pub async fn sign_out_all(&self) -> AuthResult<()> {
        let tokens: Vec<(String, String)> = self
            .lock()
            .accounts
            .iter()
            .filter_map(|a| a.token.clone().map(|t| (a.email.clone(), t)))
            .collect();

        for (email, token) in &tokens {
            if let Err(e) = self.revoker.revoke(token).await {
                warn!(email, error = %e, "token revoke failed during sign-out");
            }
        }

        let mut roster = self.lock();
        roster.accounts.clear();
        roster.selection.clear();
        self.persist(&mut roster)?;
        info!(revoked = tokens.len(), "signed out of all accounts");
        Ok(())
    }
}

impl std::fmt::Debug for AccountRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roster = self.lock();
        f.debug_struct("AccountRegistry")
            .field("accounts", &roster.accounts.len())
            .field("selected", &roster.selection.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::provider::BoxFuture;
    use crate::store::{KeyValueStore, MemoryStore, keys};

    #[derive(Default)]
    struct RecordingRevoker {
        revoked: Mutex<Vec<String>>,
        fail: bool,
    }

    impl TokenRevoker for RecordingRevoker {
        fn revoke(&self, token: &str) -> BoxFuture<'_, AuthResult<()>> {
            self.revoked.lock().unwrap().push(token.to_string());
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(AuthError::provider_message("revoke endpoint unavailable"))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn registry_with(kv: Arc<MemoryStore>, revoker: Arc<RecordingRevoker>) -> AccountRegistry {
        AccountRegistry::load(SessionStore::new(kv), revoker)
    }

    fn registry() -> (AccountRegistry, Arc<RecordingRevoker>) {
        let revoker = Arc::new(RecordingRevoker::default());
        (
            registry_with(Arc::new(MemoryStore::new()), revoker.clone()),
            revoker,
        )
    }

    fn assert_selection_consistent(registry: &AccountRegistry) {
        let accounts = registry.accounts();
        let selection = registry.selection();
        for email in selection.emails() {
            assert!(accounts.iter().any(|a| &a.email == email), "{email} not in roster");
        }
        if !accounts.is_empty() {
            assert!(!selection.is_empty());
        }
    }

    #[test]
    fn upsert_replaces_token() {
        let (registry, _) = registry();
        registry.add_or_update_account("a@x.com", "t1").unwrap();
        registry.add_or_update_account("a@x.com", "t2").unwrap();

        let accounts = registry.accounts();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].token.as_deref(), Some("t2"));
        assert_eq!(registry.selection().emails(), ["a@x.com"]);
        assert!(registry.is_signed_in());
    }

    #[test]
    fn upsert_clears_consent_flag() {
        let (registry, _) = registry();
        registry.add_or_update_account("a@x.com", "t1").unwrap();
        assert!(registry.mark_needs_consent("a@x.com").unwrap());
        let account = registry.account("a@x.com").unwrap();
        assert!(account.needs_consent);
        assert!(account.token.is_none());

        let account = registry.add_or_update_account("a@x.com", "t2").unwrap();
        assert!(!account.needs_consent);
        assert!(!registry.mark_needs_consent("nobody@x.com").unwrap());
    }

    #[test]
    fn upsert_does_not_narrow_selection() {
        let (registry, _) = registry();
        registry.add_or_update_account("a@x.com", "t1").unwrap();
        registry.add_or_update_account("b@x.com", "t2").unwrap();
        registry.set_selection(["b@x.com"]).unwrap();

        registry.add_or_update_account("a@x.com", "t3").unwrap();
        assert_eq!(registry.selection().emails(), ["b@x.com", "a@x.com"]);
    }

    #[test]
    fn empty_selection_resets_to_all() {
        let (registry, _) = registry();
        registry.add_or_update_account("a@x.com", "t1").unwrap();
        registry.add_or_update_account("b@x.com", "t2").unwrap();

        let selection = registry.set_selection(["gone@x.com"]).unwrap();
        assert_eq!(selection.emails(), ["a@x.com", "b@x.com"]);
    }

    #[tokio::test]
    async fn selection_stays_consistent_across_mutations() {
        let (registry, _) = registry();
        let steps: [(&str, bool); 7] = [
            ("a@x.com", true),
            ("b@x.com", true),
            ("a@x.com", false),
            ("c@x.com", true),
            ("b@x.com", false),
            ("c@x.com", false),
            ("d@x.com", true),
        ];
        for (email, add) in steps {
            if add {
                registry.add_or_update_account(email, "tok").unwrap();
            } else {
                registry.remove_account(email).await.unwrap();
            }
            assert_selection_consistent(&registry);
        }
        assert_eq!(registry.selection().emails(), ["d@x.com"]);
    }

    #[tokio::test]
    async fn remove_revokes_before_deleting() {
        let (registry, revoker) = registry();
        registry.add_or_update_account("a@x.com", "t1").unwrap();
        registry.add_or_update_account("b@x.com", "t2").unwrap();

        assert!(registry.remove_account("a@x.com").await.unwrap());
        assert_eq!(*revoker.revoked.lock().unwrap(), ["t1"]);
        assert_eq!(registry.accounts().len(), 1);
        assert!(!registry.selection().contains("a@x.com"));
    }

    #[tokio::test]
    async fn remove_without_token_skips_revoke() {
        let (registry, revoker) = registry();
        registry.add_or_update_account("a@x.com", "t1").unwrap();
        registry.mark_needs_consent("a@x.com").unwrap();

        assert!(registry.remove_account("a@x.com").await.unwrap());
        assert!(revoker.revoked.lock().unwrap().is_empty());
        assert!(!registry.is_signed_in());
        assert!(!registry.remove_account("a@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn remove_tolerates_revoke_failure() {
        let revoker = Arc::new(RecordingRevoker {
            fail: true,
            ..RecordingRevoker::default()
        });
        let registry = registry_with(Arc::new(MemoryStore::new()), revoker);
        registry.add_or_update_account("a@x.com", "t1").unwrap();

        assert!(registry.remove_account("a@x.com").await.unwrap());
        assert!(registry.accounts().is_empty());
    }

    #[tokio::test]
    async fn sign_out_revokes_every_token_and_clears() {
        let revoker = Arc::new(RecordingRevoker {
            fail: true,
            ..RecordingRevoker::default()
        });
        let kv = Arc::new(MemoryStore::new());
        let registry = registry_with(kv.clone(), revoker.clone());
        registry.add_or_update_account("a@x.com", "t1").unwrap();
        registry.add_or_update_account("b@x.com", "t2").unwrap();
        registry.mark_needs_consent("b@x.com").unwrap();
        registry.add_or_update_account("c@x.com", "t3").unwrap();

        registry.sign_out_all().await.unwrap();
        assert_eq!(*revoker.revoked.lock().unwrap(), ["t1", "t3"]);
        assert!(registry.accounts().is_empty());
        assert!(registry.selection().is_empty());
        assert_eq!(kv.get(keys::ACCOUNTS).unwrap().as_deref(), Some("[]"));
        assert_eq!(kv.get(keys::SELECTED_ACCOUNTS).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn load_repairs_stale_selection() {
        let kv = Arc::new(MemoryStore::with_values([
            (keys::ACCOUNTS, r#"[{"email":"a@x.com"},{"email":"b@x.com","token":"t"}]"#),
            (keys::SELECTED_ACCOUNTS, r#"["gone@x.com"]"#),
        ]));
        let registry = registry_with(kv.clone(), Arc::new(RecordingRevoker::default()));

        assert_eq!(registry.selection().emails(), ["a@x.com", "b@x.com"]);
        assert_eq!(
            kv.get(keys::SELECTED_ACCOUNTS).unwrap().as_deref(),
            Some(r#"["a@x.com","b@x.com"]"#)
        );
        assert_eq!(registry.selected_accounts().len(), 2);
    }

    #[test]
    fn mutations_persist_roster() {
        let kv = Arc::new(MemoryStore::new());
        let registry = registry_with(kv.clone(), Arc::new(RecordingRevoker::default()));
        registry.add_or_update_account("a@x.com", "t1").unwrap();

        let reloaded = registry_with(kv, Arc::new(RecordingRevoker::default()));
        assert_eq!(reloaded.accounts(), registry.accounts());
        assert_eq!(reloaded.selection().emails(), ["a@x.com"]);
    }
}
