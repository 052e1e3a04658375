// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::autostart::AutostartChannel;
use thiserror::Error;

/// Errors raised while bringing a host up.
///
/// `Validation`, `ServiceStart`, `PortConflict`, `Collaborator` and
/// `Interrupted` are phase-fatal. `Registration` is accumulated and never fails
/// a run on its own. `Rollback` is terminal and must be surfaced distinctly:
/// after it the host state is ambiguous.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Preflight validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Port {port} still in use after {attempts} reclaim attempts")]
    PortConflict { port: u16, attempts: u32 },

    #[error("Service '{service}' failed to become ready: {reason}")]
    ServiceStart { service: String, reason: String },

    #[error("Rollback could not restore {}: {}", failed.len(), failed.join(", "))]
    Rollback { failed: Vec<String> },

    #[error("Autostart channel {channel} failed: {reason}")]
    Registration {
        channel: AutostartChannel,
        reason: String,
    },

    #[error("Interrupted by operator")]
    Interrupted,

    #[error("{operation} failed: {reason}")]
    Collaborator { operation: String, reason: String },

    #[error("Command '{command}' failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Persisted state error: {0}")]
    State(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeployError {
    pub fn collaborator(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Collaborator {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error leaves the host in a state needing operator attention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(e: serde_json::Error) -> Self {
        Self::State(e.to_string())
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
