//! The surface the search component consumes.

use multimail_core::AccountSession;
use tracing::debug;

use crate::error::AuthResult;
use crate::provider::{BoxFuture, TokenRequestOptions};

/// Read access to the roster plus the narrow mutation surface search needs
/// to self-heal a missing token.
pub trait SearchAuth: Send + Sync {
    /// True once the mail API is initialized and at least one account exists.
    fn ready_for_search(&self) -> bool;

    fn accounts(&self) -> Vec<AccountSession>;

    fn selected_accounts(&self) -> Vec<AccountSession>;

    fn request_access_token(&self, options: TokenRequestOptions) -> BoxFuture<'_, AuthResult<String>>;

    fn add_or_update_account(&self, email: &str, token: &str) -> AuthResult<AccountSession>;

    /// Returns a usable token for `email`.
    ///
    /// The stored token is returned as is. An account without one gets a
    /// silent request hinted with its email, and the granted token is stored
    /// under that email.
    fn ensure_account_token<'a>(&'a self, email: &'a str) -> BoxFuture<'a, AuthResult<String>> {
        Box::pin(async move {
            let stored = self
                .accounts()
                .into_iter()
                .find(|a| a.email == email)
                .and_then(|a| a.token);
            if let Some(token) = stored {
                return Ok(token);
            }

            debug!(email, "no stored token, requesting one silently");
            let token = self
                .request_access_token(TokenRequestOptions::silent().with_hint(email))
                .await?;
            self.add_or_update_account(email, &token)?;
            Ok(token)
        })
    }
}
