// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Preflight Validator
//!
//! Every check is evaluated and reported independently. Fatal failures are
//! collected into a single [`DeployError::Validation`]; warnings are logged and
//! carried into the report. A failing test-suite hook asks the operator
//! instead of aborting on its own.

use crate::application::prompt::OperatorPrompt;
use crate::domain::error::{DeployError, DeployResult};
use crate::domain::profile::{DeploymentMode, SystemProfile, CONTAINER_FULL_STORAGE_GB, MIN_MEMORY_GB};
use crate::infrastructure::command::CommandRunner;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Memory pressure above this share is reported as a warning.
pub const MEMORY_WARN_PERCENT: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub severity: Severity,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn new(name: &str, severity: Severity, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            severity,
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn fatal_failures(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == Severity::Fatal)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == Severity::Warning)
            .collect()
    }
}

pub struct Validator {
    runner: CommandRunner,
    working_dir: PathBuf,
    runtime_binary: String,
    test_hook: Option<String>,
    prompt: Arc<dyn OperatorPrompt>,
}

impl Validator {
    pub fn new(
        runner: CommandRunner,
        working_dir: impl Into<PathBuf>,
        runtime_binary: impl Into<String>,
        test_hook: Option<String>,
        prompt: Arc<dyn OperatorPrompt>,
    ) -> Self {
        Self {
            runner,
            working_dir: working_dir.into(),
            runtime_binary: runtime_binary.into(),
            test_hook,
            prompt,
        }
    }

    /// Run every check. Returns the full report when no fatal check failed.
    pub async fn validate(
        &self,
        profile: &SystemProfile,
        mode: DeploymentMode,
    ) -> DeployResult<ValidationReport> {
        let mut report = ValidationReport {
            checks: resource_checks(profile, mode, &self.runtime_binary),
        };

        if let Some(hook) = &self.test_hook {
            report.checks.push(self.run_test_hook(hook).await?);
        }

        for check in report.warnings() {
            warn!(check = %check.name, "Preflight warning: {}", check.detail);
        }

        let fatal: Vec<String> = report
            .fatal_failures()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect();
        if !fatal.is_empty() {
            return Err(DeployError::Validation(fatal));
        }

        info!(checks = report.checks.len(), "Preflight validation passed");
        Ok(report)
    }

    async fn run_test_hook(&self, hook: &str) -> DeployResult<CheckResult> {
        info!(command = %hook, "Running test suite");
        let output = self.runner.run_shell(hook, Some(&self.working_dir)).await?;
        if output.success() {
            return Ok(CheckResult::new("test_suite", Severity::Fatal, true, "tests passed"));
        }

        warn!("Test suite failed:\n{}", output.tail(10));
        let question = "The test suite failed. Deploy anyway?";
        if self.prompt.confirm(question).await {
            Ok(CheckResult::new(
                "test_suite",
                Severity::Warning,
                false,
                "tests failed; operator chose to deploy anyway",
            ))
        } else {
            Ok(CheckResult::new(
                "test_suite",
                Severity::Fatal,
                false,
                format!("tests failed (exit {:?})", output.code),
            ))
        }
    }
}

/// Checks derived from the profile alone.
pub fn resource_checks(
    profile: &SystemProfile,
    mode: DeploymentMode,
    runtime_binary: &str,
) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    match profile.memory_gb {
        Some(total) => checks.push(CheckResult::new(
            "memory",
            Severity::Fatal,
            total >= MIN_MEMORY_GB,
            format!("{:.1} GB total, {:.0} GB required", total, MIN_MEMORY_GB),
        )),
        None => checks.push(CheckResult::new(
            "memory",
            Severity::Warning,
            false,
            "total memory unknown; could not verify the minimum",
        )),
    }

    if let Some(used) = profile.memory_used_percent {
        checks.push(CheckResult::new(
            "memory_pressure",
            Severity::Warning,
            used <= MEMORY_WARN_PERCENT,
            format!("{:.0}% in use", used),
        ));
    }

    let threshold = mode.storage_threshold_gb();
    match profile.free_storage_gb {
        Some(free) => {
            checks.push(CheckResult::new(
                "storage",
                Severity::Fatal,
                free >= threshold,
                format!("{:.1} GB free, {:.0} GB required for {}", free, threshold, mode),
            ));
            if threshold < CONTAINER_FULL_STORAGE_GB {
                checks.push(CheckResult::new(
                    "storage_headroom",
                    Severity::Warning,
                    free >= CONTAINER_FULL_STORAGE_GB,
                    format!("{:.1} GB free, below {:.0} GB", free, CONTAINER_FULL_STORAGE_GB),
                ));
            }
        }
        None => checks.push(CheckResult::new(
            "storage",
            Severity::Warning,
            false,
            format!("free storage unknown; {:.0} GB required for {}", threshold, mode),
        )),
    }

    if mode.is_native() {
        checks.push(CheckResult::new(
            "language_runtime",
            Severity::Fatal,
            profile.has_language_runtime,
            format!("{} must be on PATH for native deployment", runtime_binary),
        ));
    }

    if mode == DeploymentMode::NativeWithInitManager {
        checks.push(CheckResult::new(
            "privilege",
            Severity::Warning,
            profile.privilege_level.can_write_system(),
            "init-manager unit needs root or sudo; other autostart channels still apply",
        ));
    }

    checks.push(CheckResult::new(
        "network",
        Severity::Warning,
        profile.internet_reachable,
        "well-known hosts unreachable; continuing for local-only use",
    ));

    checks
}
