//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crud_lifecycle::ListenerKind;
use crud_lifecycle::tracing::LogFormat;

/// crud - product catalogue server
#[derive(Debug, Parser)]
#[command(name = "crud")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CRUD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log output format (pretty, compact, json)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Listener transport (tcp or unix)
    #[arg(long, env = "CRUD_LISTENER")]
    pub listener: Option<ListenerKind>,

    /// TCP address: a bare port or host:port
    #[arg(long, short, env = "CRUD_ADDRESS")]
    pub address: Option<String>,

    /// Path to the Unix socket
    #[arg(long, env = "CRUD_SOCKET")]
    pub socket_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server in the foreground (default)
    Serve,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump the effective configuration
    Dump,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_listener_flags() {
        let cli = Cli::try_parse_from([
            "crud",
            "--listener",
            "unix",
            "--socket-path",
            "/run/crud.sock",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.listener, Some(ListenerKind::Unix));
        assert_eq!(cli.socket_path, Some(PathBuf::from("/run/crud.sock")));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_config_subcommand() {
        let cli = Cli::try_parse_from(["crud", "-a", "9000", "config", "dump"]).unwrap();

        assert_eq!(cli.address.as_deref(), Some("9000"));
        assert!(matches!(
            cli.command,
            Some(Command::Config {
                action: ConfigAction::Dump
            })
        ));
    }

    #[test]
    fn rejects_unknown_listener() {
        assert!(Cli::try_parse_from(["crud", "--listener", "udp"]).is_err());
    }
}
