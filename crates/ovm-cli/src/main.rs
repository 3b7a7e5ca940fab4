//! ovm - Windows-side lifecycle controller for a WSL2-hosted VM.

use clap::Parser;
use std::process::ExitCode;

mod assets;
mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => commands::init::execute(&cli).await,
        Commands::Run(ref args) => commands::run::execute(&cli, args.clone()).await,
        Commands::Migrate(ref args) => commands::migrate::execute(&cli, args.clone()).await,
    };

    match result {
        Ok(()) => {
            tracing::info!("Done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            // The log may not be set up yet when validation fails.
            eprintln!("ovm: {e:#}");
            tracing::error!("Command failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
