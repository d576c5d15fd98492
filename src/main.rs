//! Taskboard
//!
//! A personal task board web server with password and Google sign-in.

use anyhow::{Result, anyhow};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use taskboard::auth::{self, GoogleProvider, IdentityProvider, Registration};
use taskboard::cli::{Cli, Command, CreateAccountArgs};
use taskboard::config::{Config, ConfigLoader};
use taskboard::db::Database;
use taskboard::logging::{self, LogTarget};
use taskboard::web::{self, AppState};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let mut loader = match &cli.config {
        Some(path) => ConfigLoader::load_file(Path::new(path))?,
        None => ConfigLoader::load()?,
    };
    if let Some(path) = loader.config_path() {
        info!("Using config file {}", path.display());
    }

    // Command-line overrides
    let config = loader.config_mut();
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let mut config = loader.into_config();
    config.finalize()?;

    match cli.command {
        Some(Command::CreateAccount(args)) => create_account(&config, args),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

fn open_database(config: &Config) -> Result<Database> {
    let db_path = &config.server.db_path;
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    info!("Opening database at {}", db_path.display());
    Database::open(db_path)
}

fn create_account(config: &Config, args: CreateAccountArgs) -> Result<()> {
    let db = open_database(config)?;
    let form = Registration {
        email: args.email,
        name: args.name,
        password: args.password.clone(),
        password_confirmation: args.password,
    };
    let account = auth::register(&db, &form, config.auth.min_password_length)
        .map_err(|e| anyhow!("{}", e))?;
    println!("Created account {} ({})", account.id, account.email);
    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    let db = Arc::new(open_database(&config)?);

    let provider: Option<Arc<dyn IdentityProvider>> = match GoogleProvider::from_config(&config.google)? {
        Some(google) => {
            info!("Google sign-in enabled, callback {}", config.google.redirect_uri);
            Some(Arc::new(google))
        }
        None => {
            warn!("Google sign-in disabled: GOOGLE_CLIENT_ID or GOOGLE_CLIENT_SECRET not set");
            None
        }
    };

    let state = AppState::new(db, Arc::new(config), provider);
    let server = web::start_server(state).await?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");
    server.shutdown().await;

    Ok(())
}
