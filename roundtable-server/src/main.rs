#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Entry point for the Roundtable stream server.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;
use std::error::Error;
use std::path::PathBuf;

/// Roundtable stream server
#[derive(Parser, Debug)]
#[command(name = "roundtable-server")]
#[command(about = "Buffered, resumable stream server for Roundtable rounds", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Port to bind, overriding the configuration file and environment
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (YAML or JSON). Defaults are used when omitted.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Loads `.env` and parses the command line.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

/// Resolves configuration and runs the server until shutdown.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let resolved_config = Config::load_config(config, port)?;
    server::server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = initialize_cli();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}
