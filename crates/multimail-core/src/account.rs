//! Account sessions and the search selection set.
//!
//! An [`AccountSession`] is one authorized Gmail account. The roster holds at
//! most one session per email (exact, case-sensitive match). The
//! [`SelectionSet`] is the subset of the roster included in searches and is
//! kept consistent with the roster through [`SelectionSet::reconcile`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One authorized Gmail account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSession {
    /// Email address as returned by the profile lookup.
    pub email: String,

    /// Bearer token. `None` means the account must be reauthorized before use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// When a token was last granted for this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_authorized: Option<DateTime<Utc>>,

    /// Set when the last silent refresh failed and interactive consent is required.
    #[serde(default)]
    pub needs_consent: bool,
}

/// Per-account connection sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The account has a bearer token.
    Connected,
    /// The account is registered but has no token.
    NeedsAuth,
}

impl ConnectionState {
    /// Returns a short label for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::NeedsAuth => "needs auth",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AccountSession {
    /// Creates a registered account without a token.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            token: None,
            last_authorized: None,
            needs_consent: false,
        }
    }

    /// Creates an account holding a freshly granted token.
    pub fn authorized(email: impl Into<String>, token: impl Into<String>) -> Self {
        let mut account = Self::new(email);
        account.grant(token);
        account
    }

    /// Records a newly granted token.
    ///
    /// Replaces the token, clears `needs_consent` and stamps `last_authorized`.
    pub fn grant(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
        self.needs_consent = false;
        self.last_authorized = Some(Utc::now());
    }

    /// Returns the connection sub-state.
    pub fn connection(&self) -> ConnectionState {
        if self.token.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::NeedsAuth
        }
    }

    /// Returns true if the account holds a token.
    pub fn is_connected(&self) -> bool {
        self.connection() == ConnectionState::Connected
    }
}

/// Emails of the accounts included in search.
///
/// Order is preserved for display but carries no meaning. Duplicates are
/// never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionSet(Vec<String>);

impl SelectionSet {
    /// Creates an empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a selection from emails, dropping duplicates.
    pub fn from_emails<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selection = Self::new();
        for email in emails {
            selection.insert(email);
        }
        selection
    }

    /// Appends an email if it is not already selected.
    ///
    /// Returns true if the email was added.
    pub fn insert(&mut self, email: impl Into<String>) -> bool {
        let email = email.into();
        if self.contains(&email) {
            return false;
        }
        self.0.push(email);
        true
    }

    /// Removes an email. Returns true if it was selected.
    pub fn remove(&mut self, email: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|e| e != email);
        self.0.len() != before
    }

    /// Returns true if the email is selected.
    pub fn contains(&self, email: &str) -> bool {
        self.0.iter().any(|e| e == email)
    }

    /// Returns the selected emails.
    pub fn emails(&self) -> &[String] {
        &self.0
    }

    /// Returns the number of selected emails.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Empties the selection.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Repairs the selection against the current roster.
    ///
    /// Drops emails with no matching account. If that leaves the selection
    /// empty while accounts exist, every account is selected.
    ///
    /// Returns true if the selection changed.
    pub fn reconcile(&mut self, accounts: &[AccountSession]) -> bool {
        let before = self.0.clone();

        self.0.retain(|email| accounts.iter().any(|a| &a.email == email));

        if self.0.is_empty() && !accounts.is_empty() {
            self.0 = accounts.iter().map(|a| a.email.clone()).collect();
        }

        self.0 != before
    }
}
