//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// multimail - connect Gmail accounts and keep their tokens fresh
#[derive(Debug, Parser)]
#[command(name = "multimail")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "MULTIMAIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long = "verbose", short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Connected account commands
    Accounts {
        #[command(subcommand)]
        action: AccountsAction,
    },

    /// Revoke every token and forget all accounts
    Signout,

    /// Show authorization state and connected accounts
    Status,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration and session file paths
    Path,

    /// Store the OAuth client id used for new connections
    SetClientId {
        /// Client id from the Google Cloud Console (empty to clear)
        client_id: String,

        /// Client secret to save under [google] in config.toml
        #[arg(long, env = "MULTIMAIL_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
    },
}

/// Account actions.
#[derive(Debug, Subcommand)]
pub enum AccountsAction {
    /// List connected accounts
    List,

    /// Connect a new account through the browser
    Add,

    /// Silently fetch tokens for accounts that have none
    Restore,

    /// Refresh the token of an account
    Reauth {
        /// Account to refresh; without it the provider picks the account
        email: Option<String>,

        /// Skip the silent attempt and ask for consent right away
        #[arg(long, short)]
        force: bool,
    },

    /// Disconnect an account and revoke its token
    Remove {
        /// Account to remove
        email: String,
    },

    /// Choose which accounts are searched
    Select(SelectArgs),
}

/// Arguments for `accounts select`.
#[derive(Debug, Args)]
pub struct SelectArgs {
    /// Accounts to select
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub emails: Vec<String>,

    /// Select every connected account
    #[arg(long)]
    pub all: bool,
}
