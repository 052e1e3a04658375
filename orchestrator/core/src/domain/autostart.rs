// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Autostart channels: the mechanisms that relaunch the service after reboot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Marker written around every block the registrar owns, so repeated runs can
/// detect an existing entry instead of appending a duplicate.
pub const AUTOSTART_MARKER: &str = "# managed-by: bringup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutostartChannel {
    InitUnit,
    LegacyInitScript,
    RebootTask,
    LoginHook,
}

impl AutostartChannel {
    /// Every channel, strongest guarantee first.
    pub const ALL: [AutostartChannel; 4] = [
        Self::InitUnit,
        Self::LegacyInitScript,
        Self::RebootTask,
        Self::LoginHook,
    ];
}

impl fmt::Display for AutostartChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitUnit => "init_unit",
            Self::LegacyInitScript => "legacy_init_script",
            Self::RebootTask => "reboot_task",
            Self::LoginHook => "login_hook",
        };
        f.write_str(name)
    }
}

/// Outcome of registering one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutostartRegistration {
    /// Service this entry relaunches.
    pub service: String,
    pub channel: AutostartChannel,
    /// The channel holds exactly one entry for this service.
    pub installed: bool,
    /// This run wrote the entry (false when it already existed).
    #[serde(default)]
    pub newly_written: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What gets registered: a shell command run from a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchScript {
    /// Unit / script file name.
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    pub port: u16,
    /// Where stdout/stderr go when no init manager captures them.
    pub log_path: PathBuf,
}

impl LaunchScript {
    /// Single shell line that starts the service from its directory.
    pub fn shell_line(&self) -> String {
        format!(
            "cd '{}' && PORT={} {}",
            self.working_dir.display(),
            self.port,
            self.command
        )
    }

    /// Begin marker identifying this script's entries in shared files.
    pub fn marker(&self) -> String {
        format!("{} {}", AUTOSTART_MARKER, self.name)
    }
}
