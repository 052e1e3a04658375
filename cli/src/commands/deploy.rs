// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

//! Deployment lifecycle commands
//!
//! Commands: deploy, start, stop, status, rollback

use anyhow::{Context, Result};
use bringup_core::application::orchestrator::{DeploymentStatus, RunSummary};
use bringup_core::application::{Components, Orchestrator};
use bringup_core::domain::config::DeployConfigManifest;
use bringup_core::domain::phase::RunOutcome;
use bringup_core::domain::service::ServiceTarget;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::console::{PhaseProgress, TerminalPrompt};
use crate::signals::interrupt_token;

/// Prompt behaviour for a command invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptMode {
    /// Answer every question "yes".
    pub assume_yes: bool,
}

impl PromptMode {
    fn prompt(&self) -> TerminalPrompt {
        if self.assume_yes {
            TerminalPrompt::assume(true)
        } else {
            TerminalPrompt::new()
        }
    }
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<DeployConfigManifest> {
    let config =
        DeployConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    info!(
        app = %config.spec.app.name,
        working_dir = %config.working_dir().display(),
        "Configuration loaded"
    );
    Ok(config)
}

fn orchestrator(config: DeployConfigManifest, mode: PromptMode) -> Orchestrator {
    let prompt = Arc::new(mode.prompt());
    let parts = Components::for_host(&config, prompt.clone());
    Orchestrator::new(
        config,
        parts,
        prompt,
        Arc::new(PhaseProgress::new()),
        interrupt_token(),
    )
}

/// Full phased deployment. Returns the process exit code.
pub async fn deploy(config_path: Option<PathBuf>, mode: PromptMode) -> Result<i32> {
    let config = load_config(config_path)?;
    println!(
        "{} {} from {}",
        "Deploying".bold(),
        config.spec.app.name.bold(),
        config.working_dir().display()
    );

    let summary = orchestrator(config, mode)
        .deploy()
        .await
        .context("Deployment could not start")?;
    print_summary(&summary);
    Ok(summary.outcome.exit_code())
}

pub async fn start(config_path: Option<PathBuf>) -> Result<i32> {
    let config = load_config(config_path)?;
    let handles = orchestrator(config, PromptMode::default())
        .start()
        .await
        .context("Failed to start services")?;
    for handle in &handles {
        println!(
            "{} {} on port {}",
            "✓".green(),
            handle.name.bold(),
            handle.bound_port
        );
    }
    Ok(0)
}

pub async fn stop(config_path: Option<PathBuf>) -> Result<i32> {
    let config = load_config(config_path)?;
    orchestrator(config, PromptMode::default())
        .stop()
        .await
        .context("Failed to stop services")?;
    println!("{}", "✓ All services stopped".green());
    Ok(0)
}

pub async fn status(config_path: Option<PathBuf>) -> Result<i32> {
    let config = load_config(config_path)?;
    let status = orchestrator(config, PromptMode::default())
        .status()
        .await
        .context("Failed to read deployment status")?;
    print!("{}", render_status(&status));
    let all_ready = status.services.iter().all(|s| s.alive && s.ready);
    Ok(if all_ready { 0 } else { 1 })
}

pub async fn rollback(config_path: Option<PathBuf>, backup: Option<PathBuf>) -> Result<i32> {
    let config = load_config(config_path)?;
    let manifest = orchestrator(config, PromptMode::default())
        .rollback(backup.as_deref())
        .await
        .context("Rollback failed")?;
    println!(
        "{} restored {} artifact(s) from {}",
        "✓".green(),
        manifest.artifacts.len(),
        manifest.directory.display()
    );
    Ok(0)
}

fn print_summary(summary: &RunSummary) {
    println!();
    let headline = match &summary.outcome {
        RunOutcome::Done => "✓ Deployment complete".green().bold(),
        RunOutcome::RerunRequired => {
            "✓ Dependencies installed. Run `bringup deploy` again to deploy.".yellow().bold()
        }
        RunOutcome::Unhealthy { .. } => "⚠ Deployed, but the health check failed".yellow().bold(),
        RunOutcome::Failed { phase, .. } => format!("✗ Deployment failed in {}", phase).red().bold(),
        RunOutcome::RolledBack { phase, .. } => {
            format!("✗ Deployment failed in {}, backup restored", phase).red().bold()
        }
        RunOutcome::RollbackFailed { phase, .. } => {
            format!("✗ Deployment failed in {} and ROLLBACK FAILED", phase).red().bold()
        }
    };
    println!("{}", headline);

    if let Some(mode) = summary.report.mode {
        println!("  Mode:   {}", mode);
    }
    let access = &summary.report.access_points;
    println!("  Web:    {}", access.web_url);
    if let Some(receiver) = &access.receiver {
        println!("  DICOM:  {}", receiver);
    }
    if let Some(url) = &access.public_url {
        println!("  Public: {}", url);
    }
    for warning in &summary.report.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    if let Some(path) = &summary.report_path {
        println!("  Report: {}", path.display());
    }
}

/// Plain-text status table.
pub fn render_status(status: &DeploymentStatus) -> String {
    let mut out = String::new();
    match &status.record {
        Some(record) => out.push_str(&format!(
            "Mode: {} (recorded {})\n",
            record.mode,
            record.recorded_at.format("%Y-%m-%d %H:%M:%S UTC")
        )),
        None => out.push_str("No deployment recorded\n"),
    }
    if status.services.is_empty() {
        out.push_str("No services running\n");
        return out;
    }

    out.push_str(&format!(
        "{:<20} {:<16} {:<6} {:<6} {:<6} {}\n",
        "SERVICE", "TARGET", "PORT", "ALIVE", "READY", "DETAIL"
    ));
    for service in &status.services {
        let target = match &service.handle.target {
            ServiceTarget::Process(pid) => format!("pid {}", pid),
            ServiceTarget::Container(ids) => {
                let first = ids.split(',').next().unwrap_or_default();
                format!("ctr {}", &first[..first.len().min(12)])
            }
        };
        out.push_str(&format!(
            "{:<20} {:<16} {:<6} {:<6} {:<6} {}\n",
            service.handle.name,
            target,
            service.handle.bound_port,
            yes_no(service.alive),
            yes_no(service.ready),
            service.detail.as_deref().unwrap_or_default()
        ));
    }
    out
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
