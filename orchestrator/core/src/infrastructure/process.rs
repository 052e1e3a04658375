// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Host process helpers: detached spawn, liveness, identity and signals.

use crate::domain::error::{DeployError, DeployResult};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tokio::time::sleep;
use tracing::{info, warn};

pub const SIGTERM: i32 = libc::SIGTERM;
pub const SIGKILL: i32 = libc::SIGKILL;

/// Start `line` under `sh -c` in its own process group so it outlives the
/// orchestrator. stdout and stderr are appended to `log_path`.
pub fn spawn_detached(
    line: &str,
    work_dir: &Path,
    log_path: &Path,
    env: &[(&str, String)],
) -> DeployResult<u32> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let stdout_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let stderr_file = stdout_file.try_clone()?;

    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c").arg(line).current_dir(work_dir);
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.process_group(0);
    cmd.stdin(Stdio::null())
        .stdout(stdout_file)
        .stderr(stderr_file);

    let child = cmd
        .spawn()
        .map_err(|e| DeployError::command(line, format!("failed to spawn: {}", e)))?;
    let pid = child.id();
    // Reap in the background so the child never lingers as a zombie while we run.
    std::thread::spawn(move || {
        let mut child = child;
        let _ = child.wait();
    });

    info!(pid, command = %line, "Spawned detached process");
    Ok(pid)
}

pub fn process_exists(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Start time of `pid` in seconds since the epoch, when it is running.
pub fn start_time(pid: u32) -> Option<u64> {
    let pid = SysPid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.start_time())
}

/// Whether `pid` is still the process that was recorded at `started_at`.
/// A pid without a recorded start time is never trusted.
pub fn is_same_process(pid: u32, started_at: Option<u64>) -> bool {
    match (started_at, start_time(pid)) {
        (Some(recorded), Some(current)) => recorded.abs_diff(current) <= 1,
        _ => false,
    }
}

pub fn send_signal(pid: u32, signal: i32) -> DeployResult<()> {
    let rc = unsafe { libc::kill(pid as i32, signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Already gone is fine.
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(DeployError::command(
            format!("kill -{} {}", signal, pid),
            err.to_string(),
        ));
    }
    Ok(())
}

/// Signal the whole process group led by `pid` (detached services run
/// under `sh -c`, so the group carries the real server).
pub fn signal_group(pid: u32, signal: i32) -> DeployResult<()> {
    let rc = unsafe { libc::kill(-(pid as i32), signal) };
    if rc != 0 {
        return send_signal(pid, signal);
    }
    Ok(())
}

/// SIGTERM, wait up to `grace`, then SIGKILL. Returns true when the process
/// had to be killed.
pub async fn terminate(pid: u32, grace: Duration) -> DeployResult<bool> {
    if !process_exists(pid) {
        return Ok(false);
    }

    info!(pid, "Sending SIGTERM");
    signal_group(pid, SIGTERM)?;

    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < grace {
        if !process_exists(pid) {
            info!(pid, "Process stopped gracefully");
            return Ok(false);
        }
        sleep(step).await;
        waited += step;
    }

    warn!(pid, "Graceful shutdown timeout, sending SIGKILL");
    signal_group(pid, SIGKILL)?;
    sleep(step).await;
    Ok(true)
}

pub fn effective_uid() -> u32 {
    unsafe { libc::geteuid() }
}
