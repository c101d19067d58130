//! Command implementations.

pub mod config;
pub mod serve;

use crud_lifecycle::tracing::init_tracing;

use crate::cli::{Cli, Command, ConfigAction};
use crate::config::AppConfig;
use crate::error::AppResult;

/// Dispatches the parsed command line.
///
/// The config file is only read by commands that need its contents.
pub async fn run(cli: Cli) -> AppResult<()> {
    match cli.command {
        Some(Command::Config {
            action: ConfigAction::Path,
        }) => config::path(cli.config.as_deref()),
        Some(Command::Config {
            action: ConfigAction::Dump,
        }) => config::dump(&AppConfig::resolve(&cli)?),
        Some(Command::Serve) | None => {
            let config = AppConfig::resolve(&cli)?;
            init_tracing(config.logging.to_log_config(cli.debug)?)?;
            serve::run(&config).await
        }
    }
}
