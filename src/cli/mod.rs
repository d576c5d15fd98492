//! CLI command definitions for taskboard.
//!
//! The main entry point is the `Cli` struct; `serve` runs when no subcommand is given.

use clap::{Args, Parser, Subcommand};

/// Personal task board web server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// HTTP port (overrides config)
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the web server (default if no subcommand given)
    Serve,

    /// Create a password account
    CreateAccount(CreateAccountArgs),
}

#[derive(Args, Debug)]
pub struct CreateAccountArgs {
    /// Email address to sign in with
    #[arg(long)]
    pub email: String,

    /// Display name
    #[arg(long)]
    pub name: String,

    /// Initial password
    #[arg(long)]
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::try_parse_from(["taskboard"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log, "2");
        assert!(!cli.verbose);
    }

    #[test]
    fn test_create_account_args() {
        let cli = Cli::try_parse_from([
            "taskboard",
            "--database",
            "/tmp/t.db",
            "create-account",
            "--email",
            "a@x.com",
            "--name",
            "Alice",
            "--password",
            "password1",
        ])
        .unwrap();
        assert_eq!(cli.database.as_deref(), Some("/tmp/t.db"));
        match cli.command {
            Some(Command::CreateAccount(args)) => {
                assert_eq!(args.email, "a@x.com");
                assert_eq!(args.name, "Alice");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
