//! crud server entry point.

use std::process::ExitCode;

use clap::Parser;

use crud::cli::Cli;
use crud::commands;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
