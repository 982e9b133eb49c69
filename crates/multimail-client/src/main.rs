//! multimail CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use multimail_client::cli::{AccountsAction, Cli, Command, ConfigAction};
use multimail_client::commands;
use multimail_client::config::ClientConfig;
use multimail_client::error::ClientResult;
use multimail_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tracing = if cli.debug || config.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::cli()
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: {}", e);
    }

    match run(cli, config, &config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> ClientResult<ClientConfig> {
    match cli.config {
        Some(ref path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    }
}

async fn run(cli: Cli, config: ClientConfig, config_path: &std::path::Path) -> ClientResult<()> {
    let Some(command) = cli.command else {
        println!("multimail - connect Gmail accounts and keep their tokens fresh");
        println!();
        println!("Run 'multimail --help' for usage information.");
        println!();
        println!("Quick start:");
        println!("  1. Store your OAuth client id: multimail config set-client-id <ID>");
        println!("  2. Connect an account: multimail accounts add");
        return Ok(());
    };

    // Commands that never touch the session.
    let command = match command {
        Command::Config {
            action: ConfigAction::Dump,
        } => return commands::config::dump(&config),
        Command::Config {
            action: ConfigAction::Validate,
        } => return commands::config::validate(&config),
        Command::Config {
            action: ConfigAction::Path,
        } => return commands::config::path(config_path, &config),
        other => other,
    };

    let authorizer = commands::build_authorizer(&config)?;
    let result = match command {
        Command::Config {
            action:
                ConfigAction::SetClientId {
                    client_id,
                    client_secret,
                },
        } => commands::config::set_client_id(
            &authorizer,
            &client_id,
            client_secret.as_deref(),
            config_path,
        ),
        Command::Config { .. } => Ok(()),
        Command::Accounts { action } => match action {
            AccountsAction::List => commands::accounts::list(&authorizer),
            AccountsAction::Add => commands::accounts::add(&authorizer).await,
            AccountsAction::Restore => commands::accounts::restore(&authorizer).await,
            AccountsAction::Reauth { email, force } => {
                commands::accounts::reauth(&authorizer, email.as_deref(), force).await
            }
            AccountsAction::Remove { email } => {
                commands::accounts::remove(&authorizer, &email).await
            }
            AccountsAction::Select(args) => commands::accounts::select(&authorizer, &args),
        },
        Command::Signout => commands::session::signout(&authorizer).await,
        Command::Status => {
            commands::session::status(&authorizer, &config.storage.session_path())
        }
    };

    println!("{}", authorizer.status());
    result
}
