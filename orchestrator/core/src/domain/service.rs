// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// What is actually running: a host process or a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ServiceTarget {
    Process(u32),
    Container(String),
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(pid) => write!(f, "pid {}", pid),
            Self::Container(id) => write!(f, "container {}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    Starting,
    Ready,
    Failed,
}

/// How readiness of a service is judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKind {
    /// HTTP GET against `path` must answer with a non-5xx status.
    Http { path: String },
    /// A raw TCP connect must succeed.
    Tcp,
}

/// Everything the launcher needs to start one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub command: String,
    pub port: u16,
    pub probe: ProbeKind,
    /// Init-manager unit that relaunches this service after a reboot.
    pub unit: String,
}

/// Live handle to a launched service. Owned by the launcher; persisted so
/// `stop`/`status` can act on the last run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub name: String,
    pub target: ServiceTarget,
    pub bound_port: u16,
    pub readiness_state: ReadinessState,
    pub probe: ProbeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<std::path::PathBuf>,
    /// Start time of the process (seconds since the epoch). A pid whose
    /// current start time differs belongs to someone else and is never signalled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    /// Init-manager unit that may own this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ServiceHandle {
    pub fn is_ready(&self) -> bool {
        self.readiness_state == ReadinessState::Ready
    }
}
