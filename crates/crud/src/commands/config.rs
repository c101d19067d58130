//! Configuration commands.

use std::path::Path;

use crate::config::AppConfig;
use crate::error::AppResult;

/// Dump the effective configuration to stdout.
pub fn dump(config: &AppConfig) -> AppResult<()> {
    let toml_str = config.to_toml()?;
    println!("# config.toml ({})", AppConfig::default_path().display());
    println!("{}", toml_str);
    Ok(())
}

/// Show the configuration file path.
pub fn path(explicit: Option<&Path>) -> AppResult<()> {
    match explicit {
        Some(path) => println!("config: {}", path.display()),
        None => println!("config: {}", AppConfig::default_path().display()),
    }
    Ok(())
}
