// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Deployment report
//!
//! Human-readable markdown written at the end of every run, successful or
//! not. It always names the chosen mode and the access points.

use crate::domain::autostart::AutostartRegistration;
use crate::domain::phase::{Phase, PhaseStatus, RunOutcome};
use crate::domain::profile::{DeploymentMode, SystemProfile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;

/// Where the deployment can be reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccessPoints {
    pub web_url: String,
    pub receiver: Option<String>,
    pub public_url: Option<String>,
}

impl AccessPoints {
    /// `bind_host` 0.0.0.0 / :: is reported as this host's name.
    pub fn new(bind_host: &str, web_port: u16, receiver_port: Option<u16>) -> Self {
        let host = match bind_host {
            "0.0.0.0" | "::" | "" => hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string()),
            other => other.to_string(),
        };
        Self {
            web_url: format!("http://{}:{}/", host, web_port),
            receiver: receiver_port.map(|port| format!("{}:{}", host, port)),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: Option<DeploymentMode>,
    pub profile: Option<SystemProfile>,
    pub phases: Vec<Phase>,
    pub access_points: AccessPoints,
    pub registrations: Vec<AutostartRegistration>,
    pub warnings: Vec<String>,
    pub health_failures: Vec<String>,
    pub backup_dir: Option<PathBuf>,
    pub outcome: Option<RunOutcome>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, phases: Vec<Phase>, access_points: AccessPoints) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            mode: None,
            profile: None,
            phases,
            access_points,
            registrations: Vec::new(),
            warnings: Vec::new(),
            health_failures: Vec::new(),
            backup_dir: None,
            outcome: None,
        }
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        // fmt::Write into a String cannot fail
        let _ = self.write_markdown(&mut out);
        out
    }

    fn write_markdown(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "# Deployment report")?;
        writeln!(out)?;
        writeln!(out, "- **Run:** `{}`", self.run_id)?;
        writeln!(out, "- **Started:** {}", self.started_at.to_rfc3339())?;
        if let Some(finished) = self.finished_at {
            writeln!(out, "- **Finished:** {}", finished.to_rfc3339())?;
        }
        match self.mode {
            Some(mode) => writeln!(out, "- **Mode:** `{}`", mode)?,
            None => writeln!(out, "- **Mode:** not decided (profiling did not complete)")?,
        }
        writeln!(out, "- **Outcome:** {}", outcome_line(self.outcome.as_ref()))?;
        if let Some(profile) = &self.profile {
            writeln!(out, "- **Host:** {}", profile.summary())?;
        }
        if let Some(dir) = &self.backup_dir {
            writeln!(out, "- **Backup:** `{}`", dir.display())?;
        }

        writeln!(out, "\n## Access points\n")?;
        writeln!(out, "- Web: {}", self.access_points.web_url)?;
        if let Some(receiver) = &self.access_points.receiver {
            writeln!(out, "- DICOM receiver: {}", receiver)?;
        }
        if let Some(url) = &self.access_points.public_url {
            writeln!(out, "- Public: {}", url)?;
        }

        writeln!(out, "\n## Phases\n")?;
        writeln!(out, "| # | Phase | Status | Duration | Error |")?;
        writeln!(out, "|---|-------|--------|----------|-------|")?;
        for phase in &self.phases {
            let status = match phase.status {
                PhaseStatus::Pending => "skipped",
                PhaseStatus::Running => "running",
                PhaseStatus::Succeeded => "ok",
                PhaseStatus::Failed => "FAILED",
            };
            let duration = phase
                .duration_ms()
                .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                .unwrap_or_else(|| "-".to_string());
            let error = phase
                .error
                .as_deref()
                .map(|e| e.lines().next().unwrap_or_default().replace('|', "\\|"))
                .unwrap_or_default();
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                phase.ordinal, phase.name, status, duration, error
            )?;
        }

        if !self.registrations.is_empty() {
            writeln!(out, "\n## Autostart\n")?;
            writeln!(out, "| Service | Channel | Installed | Detail |")?;
            writeln!(out, "|---------|---------|-----------|--------|")?;
            for r in &self.registrations {
                let installed = match (r.installed, r.newly_written) {
                    (true, true) => "yes (new)",
                    (true, false) => "yes",
                    (false, _) => "no",
                };
                writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    r.service,
                    r.channel,
                    installed,
                    r.detail.as_deref().unwrap_or_default().replace('|', "\\|")
                )?;
            }
        }

        if !self.health_failures.is_empty() {
            writeln!(out, "\n## Health check failures\n")?;
            for failure in &self.health_failures {
                writeln!(out, "- {}", failure)?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(out, "\n## Warnings\n")?;
            for warning in &self.warnings {
                writeln!(out, "- {}", warning)?;
            }
        }

        Ok(())
    }
}

fn outcome_line(outcome: Option<&RunOutcome>) -> String {
    match outcome {
        None => "incomplete".to_string(),
        Some(RunOutcome::Done) => "deployed".to_string(),
        Some(RunOutcome::RerunRequired) => {
            "dependencies installed; run `bringup deploy` again to deploy".to_string()
        }
        Some(RunOutcome::Failed { phase, reason }) => {
            format!("FAILED in {} (no backup, nothing rolled back): {}", phase, first_line(reason))
        }
        Some(RunOutcome::RolledBack { phase, reason }) => {
            format!("FAILED in {}, rolled back to the pre-run backup: {}", phase, first_line(reason))
        }
        Some(RunOutcome::RollbackFailed {
            phase,
            reason,
            rollback_error,
        }) => format!(
            "FAILED in {} and ROLLBACK FAILED, host state needs attention: {} / {}",
            phase,
            first_line(reason),
            first_line(rollback_error)
        ),
        Some(RunOutcome::Unhealthy { failures }) => {
            format!("deployed but unhealthy ({} failing checks)", failures.len())
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
