// Copyright 2026 Slothound Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use slothound_runtime::cli;
use slothound_runtime::config::DEFAULT_CONFIG_FILE;
use slothound_runtime::logging;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "slothound",
    about = "Slothound — appointment slot acquisition for 91160.com",
    version,
    after_help = "Run 'slothound <command> --help' for details on each command."
)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactively set account and city in the configuration file
    Init,
    /// Poll for an open slot and book it
    Register {
        /// Log file (rotated at 10 MB)
        #[arg(long, default_value = logging::DEFAULT_LOG_FILE)]
        log_file: PathBuf,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_file: Option<&Path> = match &cli.command {
        Commands::Register { log_file } => Some(log_file.as_path()),
        _ => None,
    };
    logging::init(cli.verbose, cli.quiet, log_file);

    let result: Result<i32> = match &cli.command {
        Commands::Init => cli::init_cmd::run(&cli.config).await.map(|()| 0),
        Commands::Register { .. } => cli::register_cmd::run(&cli.config).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "slothound", &mut std::io::stdout());
            Ok(0)
        }
    };

    // 0 = booked or done, 1 = anything else
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if !cli.quiet {
                eprintln!("  Error: {e:#}");
            }
            std::process::exit(1);
        }
    }
}
