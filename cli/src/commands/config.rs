// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use bringup_core::domain::config::{DeployConfigManifest, CONFIG_ENV_VAR, SAMPLE_CONFIG};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (after discovery and env overrides)
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate an annotated sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./bringup.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(&output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. {}: {}",
            CONFIG_ENV_VAR,
            std::env::var(CONFIG_ENV_VAR)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./bringup.yaml");
        println!("  4. ~/.bringup/config.yaml");
        println!("  5. /etc/bringup/config.yaml");
        println!();
    }

    let config = DeployConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;

    println!("{}", "Effective configuration:".bold());
    println!();
    print!(
        "{}",
        serde_yaml::to_string(&config).context("Failed to render configuration")?
    );
    println!();
    println!("{}", "Derived:".bold());
    println!("  Unit name:  {}", config.unit_name());
    println!("  State dir:  {}", config.state_dir().display());
    println!("  Web:        {}", config.web_service().command);
    if let Some(receiver) = config.receiver_service() {
        println!("  Receiver:   {}", receiver.command);
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = DeployConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

pub async fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            output.display()
        );
    }

    std::fs::write(output, SAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
