// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

//! # bringup
//!
//! Brings a web application and its DICOM receiver up on a Linux host:
//! profiles the machine, picks a deployment mode, backs up, deploys, checks
//! health, registers autostart and writes a report.
//!
//! ## Commands
//!
//! - `bringup deploy [--yes]` - Full phased deployment
//! - `bringup start|stop|status` - Manage the services of the last deployment
//! - `bringup rollback [--backup DIR]` - Restore a pre-deployment backup
//! - `bringup config show|validate|generate` - Configuration management
//!
//! Exit codes: 0 deployed (or dependencies installed), 1 failed or unhealthy,
//! 2 failed and rolled back, 3 rollback failed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use bringup_cli::commands::{self, deploy, ConfigCommand, PromptMode};

/// bringup - phased, self-healing application deployment
#[derive(Parser)]
#[command(name = "bringup")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "BRINGUP_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "BRINGUP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Profile the host and run the full deployment
    #[command(name = "deploy")]
    Deploy {
        /// Answer "yes" to every prompt (deploy despite red tests, roll back
        /// on a failed health check)
        #[arg(short, long)]
        yes: bool,
    },

    /// Relaunch the services of the last deployment
    #[command(name = "start")]
    Start,

    /// Stop every service of the last deployment
    #[command(name = "stop")]
    Stop,

    /// Show liveness and readiness of deployed services
    #[command(name = "status")]
    Status,

    /// Restore a pre-deployment backup
    #[command(name = "rollback")]
    Rollback {
        /// Backup directory (default: most recent)
        #[arg(long, value_name = "DIR")]
        backup: Option<PathBuf>,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let code = match cli.command {
        Some(Commands::Deploy { yes }) => {
            deploy::deploy(cli.config, PromptMode { assume_yes: yes }).await?
        }
        Some(Commands::Start) => deploy::start(cli.config).await?,
        Some(Commands::Stop) => deploy::stop(cli.config).await?,
        Some(Commands::Status) => deploy::status(cli.config).await?,
        Some(Commands::Rollback { backup }) => deploy::rollback(cli.config, backup).await?,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await?;
            0
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            1
        }
    };

    std::process::exit(code);
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
