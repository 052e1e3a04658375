// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod autostart;
pub mod backup;
pub mod config_generation;
pub mod health;
pub mod launcher;
pub mod orchestrator;
pub mod ports;
pub mod profiler;
pub mod prompt;
pub mod report;
pub mod validator;

// Re-export the entry points for convenience
pub use orchestrator::{
    Components, DeploymentObserver, DeploymentStatus, NoopObserver, Orchestrator, RunSummary,
};
pub use prompt::OperatorPrompt;
