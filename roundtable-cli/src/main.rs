#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Main entry point for the Roundtable CLI.

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use server::server;
use shared::config::server::Config;
use std::path::PathBuf;

mod commands;

/// Roundtable CLI
#[derive(Parser, Debug)]
#[command(name = "roundtable")]
#[command(about = "Command-line interface for Roundtable rounds and streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the Roundtable CLI
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the stream server
    Serve {
        /// The port number to bind the server to (e.g., 8080). Example usage: `--port 8080`
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to the configuration file (optional)
        #[arg(
            long,
            short,
            help = "Path to the configuration file (e.g., config.yaml or config.json). If not provided, defaults will be used."
        )]
        config: Option<PathBuf>,
    },

    /// Ask the server what can be resumed for a round
    Resume(commands::resume::ResumeArgs),

    /// Follow a round phase by phase until it completes
    Follow(commands::follow::FollowArgs),

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(long, short)]
        shell: clap_complete::Shell,
    },

    /// Print a default configuration file
    Config {
        /// Format of the configuration file to generate (yaml or json). Defaults to yaml.
        #[arg(long, short, default_value = "yaml")]
        format: String,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => {
            let resolved_config = Config::load_config(config, port)?;
            server::run(resolved_config)
                .await
                .map_err(|err| anyhow!("server exited: {err}"))?;
        }
        Commands::Resume(args) => commands::resume::handle_resume(args).await?,
        Commands::Follow(args) => commands::follow::handle_follow(args).await?,
        Commands::Completion { shell } => commands::completion::generate_completion(shell),
        Commands::Config { format, output } => {
            commands::config::generate_config(&format, output.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn follow_defaults_to_one_participant_without_search() {
        let cli = Cli::try_parse_from(["roundtable", "follow", "--thread", "t"]).unwrap();
        let Commands::Follow(args) = cli.command else {
            panic!("expected follow");
        };
        assert_eq!(args.thread, "t");
        assert_eq!(args.round, 0);
        assert_eq!(args.participants, 1);
        assert!(!args.web_search);
    }

    #[test]
    fn completion_rejects_unknown_shell() {
        assert!(Cli::try_parse_from(["roundtable", "completion", "--shell", "tcsh"]).is_err());
    }
}
