// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Host Profile & Deployment Mode
//!
//! [`SystemProfile`] is the one-shot snapshot of what the host can do. It is
//! produced once per run by the profiler and passed by reference to every
//! later component; nothing mutates it afterwards.
//!
//! [`decide_mode`] turns a profile into a [`DeploymentMode`]. The decision is a
//! pure function of the profile so the same host always yields the same mode.
//!
//! ## Mode Decision Table
//! | Condition (first match wins) | Mode |
//! |------------------------------|------|
//! | runtime missing, packages installable | `DependenciesOnly` |
//! | container runtime, ≥ 10 GB free | `ContainerFull` |
//! | container runtime, ≥ 7 GB free | `ContainerMinimal` |
//! | init manager present | `NativeWithInitManager` |
//! | otherwise | `NativeSimple` |

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Free storage required for a full container build (images + volumes).
pub const CONTAINER_FULL_STORAGE_GB: f64 = 10.0;
/// Free storage required for the slimmed container build.
pub const CONTAINER_MINIMAL_STORAGE_GB: f64 = 7.0;
/// Free storage required for any native deployment.
pub const NATIVE_STORAGE_GB: f64 = 5.0;
/// Minimum total memory for any deployment.
pub const MIN_MEMORY_GB: f64 = 1.0;

/// Unique identifier of a profiling run, recorded in backup manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub Uuid);

impl ProfileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Debian,
    RedHat,
    Arch,
    Alpine,
    Suse,
    Other(String),
    Unknown,
}

impl OsFamily {
    /// Map an os-release `ID`/`ID_LIKE` token to a family.
    pub fn from_os_release_id(id: &str) -> Option<Self> {
        match id.trim().trim_matches('"').to_lowercase().as_str() {
            "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" => Some(Self::Debian),
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" => Some(Self::RedHat),
            "arch" | "manjaro" | "endeavouros" => Some(Self::Arch),
            "alpine" => Some(Self::Alpine),
            "suse" | "opensuse" | "opensuse-leap" | "sles" => Some(Self::Suse),
            _ => None,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debian => write!(f, "debian"),
            Self::RedHat => write!(f, "redhat"),
            Self::Arch => write!(f, "arch"),
            Self::Alpine => write!(f, "alpine"),
            Self::Suse => write!(f, "suse"),
            Self::Other(name) => write!(f, "{}", name),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeLevel {
    Root,
    Sudo,
    None,
}

impl PrivilegeLevel {
    /// Whether system-wide locations (`/etc`, init manager) can be written.
    pub fn can_write_system(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Immutable snapshot of the host, created once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemProfile {
    pub id: ProfileId,
    pub os_family: OsFamily,
    pub os_version: String,
    pub architecture: String,
    /// Total memory; `None` when the host did not report it.
    pub memory_gb: Option<f64>,
    pub cpu_cores: u32,
    /// Free storage in the working directory; `None` when unreadable.
    pub free_storage_gb: Option<f64>,
    pub has_container_runtime: bool,
    pub has_init_manager: bool,
    pub has_reverse_proxy: bool,
    pub privilege_level: PrivilegeLevel,
    pub internet_reachable: bool,
    /// Language runtime (e.g. `python3`) found on `PATH`.
    #[serde(default)]
    pub has_language_runtime: bool,
    /// A package manager able to install the runtime was found.
    #[serde(default)]
    pub packages_installable: bool,
    /// Memory currently in use, as a percentage of total.
    #[serde(default)]
    pub memory_used_percent: Option<f64>,
}

/// Render an optional gigabyte figure, `unknown` when missing.
pub fn format_gb(value: Option<f64>) -> String {
    match value {
        Some(gb) => format!("{:.1} GB", gb),
        None => "unknown".to_string(),
    }
}

impl SystemProfile {
    pub fn summary(&self) -> String {
        format!(
            "{} {} ({}), {} cores, {} RAM, {} free disk, privilege={:?}",
            self.os_family,
            self.os_version,
            self.architecture,
            self.cpu_cores,
            format_gb(self.memory_gb),
            format_gb(self.free_storage_gb),
            self.privilege_level,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    ContainerFull,
    ContainerMinimal,
    NativeWithInitManager,
    NativeSimple,
    DependenciesOnly,
}

impl DeploymentMode {
    pub fn is_container(&self) -> bool {
        matches!(self, Self::ContainerFull | Self::ContainerMinimal)
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::NativeWithInitManager | Self::NativeSimple)
    }

    /// Free storage (GB) this mode needs at preflight.
    pub fn storage_threshold_gb(&self) -> f64 {
        match self {
            Self::ContainerFull => CONTAINER_FULL_STORAGE_GB,
            Self::ContainerMinimal => CONTAINER_MINIMAL_STORAGE_GB,
            Self::NativeWithInitManager | Self::NativeSimple | Self::DependenciesOnly => {
                NATIVE_STORAGE_GB
            }
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ContainerFull => "container_full",
            Self::ContainerMinimal => "container_minimal",
            Self::NativeWithInitManager => "native_with_init_manager",
            Self::NativeSimple => "native_simple",
            Self::DependenciesOnly => "dependencies_only",
        };
        f.write_str(name)
    }
}

/// Derive the deployment mode from a profile. Pure and deterministic.
pub fn decide_mode(profile: &SystemProfile) -> DeploymentMode {
    if !profile.has_language_runtime && profile.packages_installable {
        return DeploymentMode::DependenciesOnly;
    }
    // Unknown storage never qualifies for a container mode.
    if let (true, Some(free)) = (profile.has_container_runtime, profile.free_storage_gb) {
        if free >= CONTAINER_FULL_STORAGE_GB {
            return DeploymentMode::ContainerFull;
        }
        if free >= CONTAINER_MINIMAL_STORAGE_GB {
            return DeploymentMode::ContainerMinimal;
        }
    }
    if profile.has_init_manager {
        return DeploymentMode::NativeWithInitManager;
    }
    DeploymentMode::NativeSimple
}

#[cfg(test)]
pub(crate) fn test_profile() -> SystemProfile {
    SystemProfile {
        id: ProfileId::new(),
        os_family: OsFamily::Debian,
        os_version: "24.04".to_string(),
        architecture: "x86_64".to_string(),
        memory_gb: Some(4.0),
        cpu_cores: 2,
        free_storage_gb: Some(20.0),
        has_container_runtime: false,
        has_init_manager: false,
        has_reverse_proxy: false,
        privilege_level: PrivilegeLevel::Root,
        internet_reachable: true,
        has_language_runtime: true,
        packages_installable: true,
        memory_used_percent: Some(30.0),
    }
}
