//! Whole-session commands.

use multimail_auth::{AuthState, Authorizer, SearchAuth};

use crate::commands::accounts::render_accounts;
use crate::error::ClientResult;

/// Show authorization state and connected accounts.
pub fn status(authorizer: &Authorizer, session_path: &std::path::Path) -> ClientResult<()> {
    let state = authorizer.state();
    println!("state: {}", state);
    match authorizer.client_id() {
        Some(id) => println!("client id: {}", id),
        None => println!("client id: not set"),
    }
    println!("session: {}", session_path.display());
    println!();
    print!(
        "{}",
        render_accounts(&authorizer.accounts(), &authorizer.selection())
    );
    if state == AuthState::Unconfigured {
        println!();
        println!("Run `multimail config set-client-id <ID>` to get started.");
    }
    Ok(())
}

/// Revoke every token and forget all accounts.
pub async fn signout(authorizer: &Authorizer) -> ClientResult<()> {
    authorizer.sign_out().await?;
    Ok(())
}
