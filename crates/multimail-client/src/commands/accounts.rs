//! Account commands.

use std::fmt::Write as _;

use multimail_auth::{Authorizer, ReauthOptions, SearchAuth};
use multimail_core::{AccountSession, SelectionSet};
use tracing::warn;

use crate::cli::SelectArgs;
use crate::error::{ClientError, ClientResult};

/// List connected accounts.
pub fn list(authorizer: &Authorizer) -> ClientResult<()> {
    print!(
        "{}",
        render_accounts(&authorizer.accounts(), &authorizer.selection())
    );
    Ok(())
}

/// Connect a new account.
pub async fn add(authorizer: &Authorizer) -> ClientResult<()> {
    println!("A browser window will open for you to pick the account to connect.");
    println!("If it doesn't, copy the URL printed in the terminal.");
    let account = authorizer.authorize_new_account().await?;
    println!("Connected {}", account.email);
    Ok(())
}

/// Silently fetch tokens for every account that has none.
pub async fn restore(authorizer: &Authorizer) -> ClientResult<()> {
    let report = authorizer.restore_sessions().await?;
    for email in &report.restored {
        println!("Restored {}", email);
    }
    for email in &report.needs_consent {
        println!("{} needs consent: run `multimail accounts reauth {}`", email, email);
    }
    Ok(())
}

/// Refresh an account's token.
pub async fn reauth(authorizer: &Authorizer, email: Option<&str>, force: bool) -> ClientResult<()> {
    if let Some(email) = email
        && authorizer.account(email).is_none()
    {
        return Err(ClientError::UnknownAccount(email.to_string()));
    }

    let account = authorizer
        .authorize_account(email, ReauthOptions { force_prompt: force })
        .await?;
    if let Some(requested) = email
        && requested != account.email
    {
        println!("Signed in as {} instead of {}", account.email, requested);
    }
    Ok(())
}

/// Disconnect one account.
pub async fn remove(authorizer: &Authorizer, email: &str) -> ClientResult<()> {
    if authorizer.remove_account(email).await? {
        Ok(())
    } else {
        Err(ClientError::UnknownAccount(email.to_string()))
    }
}

/// Replace the search selection.
pub fn select(authorizer: &Authorizer, args: &SelectArgs) -> ClientResult<()> {
    let requested: Vec<String> = if args.all {
        authorizer.accounts().into_iter().map(|a| a.email).collect()
    } else {
        args.emails.clone()
    };

    let selection = authorizer.set_selection(requested.iter().cloned())?;
    for email in requested.iter().filter(|e| !selection.contains(e)) {
        warn!(email = %email, "ignoring unknown account");
    }
    Ok(())
}

/// Formats the roster, one account per line.
pub fn render_accounts(accounts: &[AccountSession], selection: &SelectionSet) -> String {
    if accounts.is_empty() {
        return "No accounts connected.\n".to_string();
    }

    let width = accounts.iter().map(|a| a.email.len()).max().unwrap_or(0);
    let mut out = String::new();
    for account in accounts {
        let marker = if selection.contains(&account.email) { '*' } else { ' ' };
        let mut state = account.connection().to_string();
        if account.needs_consent {
            state.push_str(", consent required");
        }
        let when = account
            .last_authorized
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let _ = writeln!(
            out,
            "{marker} {:<width$}  {state}  (authorized {when})",
            account.email
        );
    }
    out
}
