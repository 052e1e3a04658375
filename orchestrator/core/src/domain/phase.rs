// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Phase State Machine Types
//!
//! The orchestrator walks a fixed sequence of phases:
//!
//! ```text
//! PROFILE → VALIDATE → BACKUP → DEPENDENCY_SETUP → CONFIG_GENERATION
//!   → EXECUTE_DEPLOYMENT → POST_VALIDATE → MONITORING_SETUP → REPORT → DONE
//! ```
//!
//! `ROLLED_BACK` is a terminal state reachable from any phase after `BACKUP`
//! when that phase fails and a backup manifest exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseName {
    Profile,
    Validate,
    Backup,
    DependencySetup,
    ConfigGeneration,
    ExecuteDeployment,
    PostValidate,
    MonitoringSetup,
    Report,
}

impl PhaseName {
    /// The fixed run order.
    pub const SEQUENCE: [PhaseName; 9] = [
        Self::Profile,
        Self::Validate,
        Self::Backup,
        Self::DependencySetup,
        Self::ConfigGeneration,
        Self::ExecuteDeployment,
        Self::PostValidate,
        Self::MonitoringSetup,
        Self::Report,
    ];

    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Profile => 1,
            Self::Validate => 2,
            Self::Backup => 3,
            Self::DependencySetup => 4,
            Self::ConfigGeneration => 5,
            Self::ExecuteDeployment => 6,
            Self::PostValidate => 7,
            Self::MonitoringSetup => 8,
            Self::Report => 9,
        }
    }

    /// Phases that change the host. A backup must exist before any of them runs.
    pub fn is_mutating(&self) -> bool {
        *self > Self::Backup
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "PROFILE",
            Self::Validate => "VALIDATE",
            Self::Backup => "BACKUP",
            Self::DependencySetup => "DEPENDENCY_SETUP",
            Self::ConfigGeneration => "CONFIG_GENERATION",
            Self::ExecuteDeployment => "EXECUTE_DEPLOYMENT",
            Self::PostValidate => "POST_VALIDATE",
            Self::MonitoringSetup => "MONITORING_SETUP",
            Self::Report => "REPORT",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    pub ordinal: u8,
    pub status: PhaseStatus,
    /// File holding this run's phase log lines.
    pub log_reference: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Phase {
    pub fn new(name: PhaseName, log_reference: PathBuf) -> Self {
        Self {
            name,
            ordinal: name.ordinal(),
            status: PhaseStatus::Pending,
            log_reference,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = PhaseStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self) {
        self.status = PhaseStatus::Succeeded;
        self.ended_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = PhaseStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Terminal state of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every phase succeeded.
    Done,
    /// Only dependencies were installed; `deploy` must be run again.
    RerunRequired,
    /// A phase failed before any backup existed; nothing was rolled back.
    Failed { phase: PhaseName, reason: String },
    /// A phase failed and the backup was restored.
    RolledBack { phase: PhaseName, reason: String },
    /// A phase failed and restoring the backup also failed.
    RollbackFailed {
        phase: PhaseName,
        reason: String,
        rollback_error: String,
    },
    /// Deployed but the post-deployment health check failed; the operator
    /// declined rollback.
    Unhealthy { failures: Vec<String> },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done | Self::RerunRequired)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Done | Self::RerunRequired => 0,
            Self::Failed { .. } | Self::Unhealthy { .. } => 1,
            Self::RolledBack { .. } => 2,
            Self::RollbackFailed { .. } => 3,
        }
    }
}
