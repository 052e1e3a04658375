// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! System Profiler
//!
//! Inspects the host once per run and produces an immutable
//! [`SystemProfile`]. Profiling never fails: a tool that is missing or a
//! file that cannot be read degrades the corresponding field to
//! `false`/`unknown`.

use crate::domain::profile::{OsFamily, PrivilegeLevel, ProfileId, SystemProfile};
use crate::infrastructure::collaborators::PackageManager;
use crate::infrastructure::command::CommandRunner;
use crate::infrastructure::container::ContainerRuntime;
use crate::infrastructure::probe::tcp_probe;
use crate::infrastructure::process;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const REVERSE_PROXIES: [&str; 4] = ["nginx", "apache2", "httpd", "caddy"];

/// Source of the per-run host profile.
#[async_trait]
pub trait HostProfiler: Send + Sync {
    async fn profile(&self) -> SystemProfile;
}

pub struct Profiler {
    runner: CommandRunner,
    /// The runtime container modes launch through.
    containers: Arc<dyn ContainerRuntime>,
    /// Directory whose filesystem is measured for free storage.
    storage_path: PathBuf,
    runtime_binary: String,
    network_probes: Vec<String>,
    probe_timeout: Duration,
}

impl Profiler {
    pub fn new(
        runner: CommandRunner,
        containers: Arc<dyn ContainerRuntime>,
        storage_path: impl Into<PathBuf>,
        runtime_binary: impl Into<String>,
        network_probes: Vec<String>,
    ) -> Self {
        Self {
            runner: runner.with_timeout(Duration::from_secs(5)),
            containers,
            storage_path: storage_path.into(),
            runtime_binary: runtime_binary.into(),
            network_probes,
            probe_timeout: Duration::from_secs(3),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub async fn profile(&self) -> SystemProfile {
        let (os_family, os_version) = std::fs::read_to_string("/etc/os-release")
            .map(|content| parse_os_release(&content))
            .unwrap_or((OsFamily::Unknown, "unknown".to_string()));

        let meminfo = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|content| parse_meminfo(&content));
        let memory_gb = meminfo.map(|(total, _)| total);
        let memory_used_percent = meminfo.map(|(_, used)| used);

        let cpu_cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);

        let free_storage_gb = free_storage_gb(&self.storage_path);
        let privilege_level = self.privilege_level().await;
        let has_container_runtime = self.containers.available().await;
        let has_init_manager = Path::new("/run/systemd/system").is_dir() && found("systemctl");
        let has_reverse_proxy = REVERSE_PROXIES.iter().any(|bin| found(bin));
        let has_language_runtime = found(&self.runtime_binary);
        let packages_installable =
            PackageManager::detect().is_some() && privilege_level.can_write_system();
        let internet_reachable = self.internet_reachable().await;

        let profile = SystemProfile {
            id: ProfileId::new(),
            os_family,
            os_version,
            architecture: std::env::consts::ARCH.to_string(),
            memory_gb,
            cpu_cores,
            free_storage_gb,
            has_container_runtime,
            has_init_manager,
            has_reverse_proxy,
            privilege_level,
            internet_reachable,
            has_language_runtime,
            packages_installable,
            memory_used_percent,
        };

        info!(profile_id = %profile.id, "Host profile: {}", profile.summary());
        debug!(?profile, "Full host profile");
        profile
    }

    async fn privilege_level(&self) -> PrivilegeLevel {
        if process::effective_uid() == 0 {
            return PrivilegeLevel::Root;
        }
        if !found("sudo") {
            return PrivilegeLevel::None;
        }
        match self.runner.run("sudo", &["-n", "true"], None).await {
            Ok(output) if output.success() => PrivilegeLevel::Sudo,
            _ => PrivilegeLevel::None,
        }
    }

    async fn internet_reachable(&self) -> bool {
        let probes = self.network_probes.iter().filter_map(|target| {
            let (host, port) = target.rsplit_once(':')?;
            let port = port.parse::<u16>().ok()?;
            Some(tcp_probe(host, port, self.probe_timeout))
        });
        futures::future::join_all(probes)
            .await
            .iter()
            .any(Result::is_ok)
    }
}

#[async_trait]
impl HostProfiler for Profiler {
    async fn profile(&self) -> SystemProfile {
        Profiler::profile(self).await
    }
}

fn found(binary: &str) -> bool {
    which::which(binary).is_ok()
}

/// Parse `/etc/os-release` into a family and version. `ID` is tried first,
/// then each `ID_LIKE` token.
pub fn parse_os_release(content: &str) -> (OsFamily, String) {
    let mut id = None;
    let mut id_like = None;
    let mut version = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "ID" => id = Some(value),
            "ID_LIKE" => id_like = Some(value),
            "VERSION_ID" => version = Some(value),
            _ => {}
        }
    }

    let family = id
        .as_deref()
        .and_then(OsFamily::from_os_release_id)
        .or_else(|| {
            id_like
                .as_deref()
                .and_then(|like| like.split_whitespace().find_map(OsFamily::from_os_release_id))
        })
        .or_else(|| id.clone().map(OsFamily::Other))
        .unwrap_or(OsFamily::Unknown);

    (family, version.unwrap_or_else(|| "unknown".to_string()))
}

/// Parse `/proc/meminfo` into (total GB, used percent).
pub fn parse_meminfo(content: &str) -> Option<(f64, f64)> {
    let field = |name: &str| -> Option<f64> {
        content
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<f64>().ok())
    };

    let total_kb = field("MemTotal:")?;
    if total_kb <= 0.0 {
        return None;
    }
    let available_kb = field("MemAvailable:").or_else(|| field("MemFree:"))?;
    let total_gb = total_kb / 1024.0 / 1024.0;
    let used_percent = ((total_kb - available_kb) / total_kb * 100.0).clamp(0.0, 100.0);
    Some((total_gb, used_percent))
}

/// Free space available to unprivileged users on the filesystem holding `path`.
/// Walks up to the nearest existing ancestor so a not-yet-created working
/// directory still measures its eventual filesystem.
pub fn free_storage_gb(path: &Path) -> Option<f64> {
    use std::os::unix::ffi::OsStrExt;

    let existing = path.ancestors().find(|p| p.exists())?;
    let c_path = std::ffi::CString::new(existing.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let bytes = stat.f_bavail as f64 * stat.f_frsize as f64;
    Some(bytes / 1024.0 / 1024.0 / 1024.0)
}
