// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Port Reclaimer
//!
//! `ensure_free(port)` finds whoever listens on a TCP port and escalates
//! SIGTERM → SIGKILL, re-checking after each step, for a fixed number of
//! attempts. It returns `PortConflict` when the port is still held; it never
//! waits without a bound.
//!
//! Occupancy is read through every usable [`PortInspector`], in order:
//! process-socket listing (`lsof`), connection table (`ss`, then `netstat`),
//! raw connect probe. The first one that names owning pids wins. A port is
//! free only when no inspector sees it held: an unprivileged `lsof` cannot see
//! other users' sockets, so its empty answer alone proves nothing. The connect
//! probe can tell a port is taken but not by whom.

use crate::domain::error::{DeployError, DeployResult};
use crate::infrastructure::command::CommandRunner;
use crate::infrastructure::probe::tcp_probe;
use crate::infrastructure::process::{self, SIGKILL, SIGTERM};
use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortUsage {
    Free,
    /// Held; the owning pids, when the inspector can tell.
    Occupied(Vec<u32>),
}

#[async_trait]
pub trait PortInspector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the underlying facility exists on this host.
    fn available(&self) -> bool;

    async fn usage(&self, port: u16) -> DeployResult<PortUsage>;
}

pub trait ProcessSignaller: Send + Sync {
    fn signal(&self, pid: u32, signal: i32) -> DeployResult<()>;
}

/// Signals real host processes.
pub struct HostSignaller;

impl ProcessSignaller for HostSignaller {
    fn signal(&self, pid: u32, signal: i32) -> DeployResult<()> {
        process::send_signal(pid, signal)
    }
}

pub struct LsofInspector {
    runner: CommandRunner,
}

#[async_trait]
impl PortInspector for LsofInspector {
    fn name(&self) -> &'static str {
        "lsof"
    }

    fn available(&self) -> bool {
        which::which("lsof").is_ok()
    }

    async fn usage(&self, port: u16) -> DeployResult<PortUsage> {
        let filter = format!("TCP:{}", port);
        let output = self
            .runner
            .run("lsof", &["-t", "-n", "-P", "-i", &filter, "-sTCP:LISTEN"], None)
            .await?;
        // lsof exits 1 with no output when nothing matches.
        let pids = parse_pid_lines(&output.stdout);
        if pids.is_empty() {
            if output.success() || output.code == Some(1) {
                return Ok(PortUsage::Free);
            }
            return Err(DeployError::command("lsof", output.tail(2)));
        }
        Ok(PortUsage::Occupied(pids))
    }
}

pub struct SsInspector {
    runner: CommandRunner,
}

#[async_trait]
impl PortInspector for SsInspector {
    fn name(&self) -> &'static str {
        "ss"
    }

    fn available(&self) -> bool {
        which::which("ss").is_ok()
    }

    async fn usage(&self, port: u16) -> DeployResult<PortUsage> {
        let output = self.runner.run("ss", &["-H", "-l", "-t", "-n", "-p"], None).await?;
        if !output.success() {
            return Err(DeployError::command("ss", output.tail(2)));
        }
        Ok(parse_socket_table(&output.stdout, port, 3))
    }
}

pub struct NetstatInspector {
    runner: CommandRunner,
}

#[async_trait]
impl PortInspector for NetstatInspector {
    fn name(&self) -> &'static str {
        "netstat"
    }

    fn available(&self) -> bool {
        which::which("netstat").is_ok()
    }

    async fn usage(&self, port: u16) -> DeployResult<PortUsage> {
        let output = self.runner.run("netstat", &["-l", "-t", "-n", "-p"], None).await?;
        if !output.success() {
            return Err(DeployError::command("netstat", output.tail(2)));
        }
        Ok(parse_socket_table(&output.stdout, port, 3))
    }
}

/// Last resort: a successful connect means something is listening.
pub struct ConnectProbeInspector {
    timeout: Duration,
}

#[async_trait]
impl PortInspector for ConnectProbeInspector {
    fn name(&self) -> &'static str {
        "connect-probe"
    }

    fn available(&self) -> bool {
        true
    }

    async fn usage(&self, port: u16) -> DeployResult<PortUsage> {
        match tcp_probe("127.0.0.1", port, self.timeout).await {
            Ok(()) => Ok(PortUsage::Occupied(vec![])),
            Err(_) => Ok(PortUsage::Free),
        }
    }
}

/// Inspectors in preference order.
pub fn host_inspectors(runner: &CommandRunner) -> Vec<Box<dyn PortInspector>> {
    let runner = runner.with_timeout(Duration::from_secs(10));
    vec![
        Box::new(LsofInspector {
            runner: runner.clone(),
        }),
        Box::new(SsInspector {
            runner: runner.clone(),
        }),
        Box::new(NetstatInspector { runner }),
        Box::new(ConnectProbeInspector {
            timeout: Duration::from_secs(1),
        }),
    ]
}

pub struct PortReclaimer {
    inspectors: Vec<Box<dyn PortInspector>>,
    signaller: Arc<dyn ProcessSignaller>,
    attempts: u32,
    grace: Duration,
    cancel: CancellationToken,
}

impl PortReclaimer {
    pub fn new(
        inspectors: Vec<Box<dyn PortInspector>>,
        signaller: Arc<dyn ProcessSignaller>,
        attempts: u32,
        grace: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inspectors,
            signaller,
            attempts: attempts.max(1),
            grace,
            cancel,
        }
    }

    /// Guarantee nothing listens on `port`. A free port is a no-op.
    pub async fn ensure_free(&self, port: u16) -> DeployResult<()> {
        for attempt in 1..=self.attempts {
            let pids = match self.usage(port).await? {
                PortUsage::Free => {
                    if attempt > 1 {
                        info!(port, attempt, "Port reclaimed");
                    }
                    return Ok(());
                }
                PortUsage::Occupied(pids) => pids,
            };

            counter!("bringup_port_reclaim_attempts_total").increment(1);
            if pids.is_empty() {
                warn!(port, attempt, "Port in use by an unidentified process; waiting");
                self.wait().await?;
                continue;
            }

            info!(port, attempt, ?pids, "Port in use, sending SIGTERM");
            self.signal_all(&pids, SIGTERM);
            self.wait().await?;

            let still_held = match self.usage(port).await? {
                PortUsage::Free => {
                    info!(port, attempt, "Port reclaimed");
                    return Ok(());
                }
                PortUsage::Occupied(remaining) if remaining.is_empty() => pids,
                PortUsage::Occupied(remaining) => remaining,
            };

            warn!(port, attempt, pids = ?still_held, "Port still in use, sending SIGKILL");
            self.signal_all(&still_held, SIGKILL);
            self.wait().await?;
        }

        match self.usage(port).await? {
            PortUsage::Free => Ok(()),
            PortUsage::Occupied(_) => Err(DeployError::PortConflict {
                port,
                attempts: self.attempts,
            }),
        }
    }

    async fn usage(&self, port: u16) -> DeployResult<PortUsage> {
        let mut seen_free = false;
        let mut held_by_unknown = false;
        let mut last_error = None;

        for inspector in self.inspectors.iter().filter(|i| i.available()) {
            match inspector.usage(port).await {
                Ok(PortUsage::Occupied(pids)) if !pids.is_empty() => {
                    debug!(port, inspector = inspector.name(), ?pids, "Port held");
                    return Ok(PortUsage::Occupied(pids));
                }
                Ok(PortUsage::Occupied(_)) => {
                    debug!(port, inspector = inspector.name(), "Port held by an unknown owner");
                    held_by_unknown = true;
                }
                Ok(PortUsage::Free) => {
                    debug!(port, inspector = inspector.name(), "Port looks free");
                    seen_free = true;
                }
                Err(e) => {
                    debug!(inspector = inspector.name(), "Port inspector failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if held_by_unknown {
            Ok(PortUsage::Occupied(Vec::new()))
        } else if seen_free {
            Ok(PortUsage::Free)
        } else {
            Err(last_error.unwrap_or_else(|| {
                DeployError::command("port inspection", "no port inspector is available")
            }))
        }
    }

    fn signal_all(&self, pids: &[u32], signal: i32) {
        for &pid in pids {
            if pid == std::process::id() {
                continue;
            }
            if let Err(e) = self.signaller.signal(pid, signal) {
                warn!(pid, signal, "Failed to signal process: {}", e);
            }
        }
    }

    async fn wait(&self) -> DeployResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DeployError::Interrupted),
            _ = tokio::time::sleep(self.grace) => Ok(()),
        }
    }
}

fn parse_pid_lines(stdout: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = stdout
        .lines()
        .filter_map(|l| l.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Extract owners of `port` from `ss -ltnp`/`netstat -ltnp` output.
/// `local_column` is the whitespace-separated index of the local address.
pub fn parse_socket_table(stdout: &str, port: u16, local_column: usize) -> PortUsage {
    let suffix = format!(":{}", port);
    let mut occupied = false;
    let mut pids = Vec::new();

    for line in stdout.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        let Some(local) = columns.get(local_column) else {
            continue;
        };
        if !local.ends_with(&suffix) {
            continue;
        }
        occupied = true;
        // ss: users:(("python3",pid=123,fd=4)); netstat: 123/python3
        for token in line.split(|c: char| c == ',' || c.is_whitespace()) {
            if let Some(pid) = token.strip_prefix("pid=") {
                pids.extend(pid.parse::<u32>().ok());
            } else if let Some((pid, _)) = token.split_once('/') {
                pids.extend(pid.parse::<u32>().ok());
            }
        }
    }

    if !occupied {
        return PortUsage::Free;
    }
    pids.sort_unstable();
    pids.dedup();
    PortUsage::Occupied(pids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy)]
    enum Holder {
        ObeysTerm,
        IgnoresTerm,
        Immortal,
    }

    /// Pretend host: a set of pids holding the port and how each reacts to signals.
    #[derive(Default)]
    struct FakeHost {
        holders: Mutex<HashMap<u32, Holder>>,
        signals: Mutex<Vec<(u32, i32)>>,
    }

    struct FakeInspector(Arc<FakeHost>);

    #[async_trait]
    impl PortInspector for FakeInspector {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn available(&self) -> bool {
            true
        }
        async fn usage(&self, _port: u16) -> DeployResult<PortUsage> {
            let holders = self.0.holders.lock().unwrap();
            if holders.is_empty() {
                Ok(PortUsage::Free)
            } else {
                let mut pids: Vec<u32> = holders.keys().copied().collect();
                pids.sort_unstable();
                Ok(PortUsage::Occupied(pids))
            }
        }
    }

    struct UnavailableInspector;

    #[async_trait]
    impl PortInspector for UnavailableInspector {
        fn name(&self) -> &'static str {
            "missing"
        }
        fn available(&self) -> bool {
            false
        }
        async fn usage(&self, _port: u16) -> DeployResult<PortUsage> {
            panic!("unavailable inspector must not be called");
        }
    }

    /// Always gives the same answer, like an `lsof` that cannot see the socket.
    struct FixedInspector(PortUsage);

    #[async_trait]
    impl PortInspector for FixedInspector {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn available(&self) -> bool {
            true
        }
        async fn usage(&self, _port: u16) -> DeployResult<PortUsage> {
            Ok(self.0.clone())
        }
    }

    struct FakeSignaller(Arc<FakeHost>);

    impl ProcessSignaller for FakeSignaller {
        fn signal(&self, pid: u32, signal: i32) -> DeployResult<()> {
            self.0.signals.lock().unwrap().push((pid, signal));
            let mut holders = self.0.holders.lock().unwrap();
            let dies = match holders.get(&pid) {
                Some(Holder::ObeysTerm) => true,
                Some(Holder::IgnoresTerm) => signal == SIGKILL,
                Some(Holder::Immortal) | None => false,
            };
            if dies {
                holders.remove(&pid);
            }
            Ok(())
        }
    }

    fn reclaimer(host: &Arc<FakeHost>) -> PortReclaimer {
        PortReclaimer::new(
            vec![
                Box::new(UnavailableInspector),
                Box::new(FakeInspector(host.clone())),
            ],
            Arc::new(FakeSignaller(host.clone())),
            5,
            Duration::from_millis(5),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn free_port_is_a_noop() {
        let host = Arc::new(FakeHost::default());
        let r = reclaimer(&host);
        r.ensure_free(8000).await.unwrap();
        r.ensure_free(8000).await.unwrap();
        assert!(host.signals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn graceful_holder_only_gets_sigterm() {
        let host = Arc::new(FakeHost::default());
        host.holders.lock().unwrap().insert(100, Holder::ObeysTerm);
        reclaimer(&host).ensure_free(8000).await.unwrap();
        assert_eq!(*host.signals.lock().unwrap(), vec![(100, SIGTERM)]);
    }

    #[tokio::test]
    async fn stale_holder_ignoring_sigterm_is_killed() {
        let host = Arc::new(FakeHost::default());
        host.holders.lock().unwrap().insert(200, Holder::IgnoresTerm);
        reclaimer(&host).ensure_free(8000).await.unwrap();
        assert_eq!(
            *host.signals.lock().unwrap(),
            vec![(200, SIGTERM), (200, SIGKILL)]
        );
        assert!(host.holders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unkillable_holder_is_a_port_conflict() {
        let host = Arc::new(FakeHost::default());
        host.holders.lock().unwrap().insert(300, Holder::Immortal);

        let started = std::time::Instant::now();
        let err = reclaimer(&host).ensure_free(8000).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::PortConflict {
                port: 8000,
                attempts: 5
            }
        ));
        // 5 attempts × (TERM + KILL) and no more.
        assert_eq!(host.signals.lock().unwrap().len(), 10);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn blind_free_answer_is_checked_by_later_inspectors() {
        let host = Arc::new(FakeHost::default());
        host.holders.lock().unwrap().insert(400, Holder::ObeysTerm);
        let r = PortReclaimer::new(
            vec![
                Box::new(FixedInspector(PortUsage::Free)),
                Box::new(FakeInspector(host.clone())),
            ],
            Arc::new(FakeSignaller(host.clone())),
            5,
            Duration::from_millis(5),
            CancellationToken::new(),
        );

        r.ensure_free(8000).await.unwrap();
        assert_eq!(*host.signals.lock().unwrap(), vec![(400, SIGTERM)]);
    }

    #[tokio::test]
    async fn unknown_owner_is_never_reported_free() {
        let host = Arc::new(FakeHost::default());
        let r = PortReclaimer::new(
            vec![
                Box::new(FixedInspector(PortUsage::Free)),
                Box::new(FixedInspector(PortUsage::Occupied(vec![]))),
            ],
            Arc::new(FakeSignaller(host.clone())),
            2,
            Duration::from_millis(5),
            CancellationToken::new(),
        );

        let err = r.ensure_free(8000).await.unwrap_err();
        assert!(matches!(err, DeployError::PortConflict { port: 8000, attempts: 2 }));
        assert!(host.signals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_inspector_is_an_error() {
        let r = PortReclaimer::new(
            vec![Box::new(UnavailableInspector)],
            Arc::new(HostSignaller),
            1,
            Duration::from_millis(1),
            CancellationToken::new(),
        );
        assert!(matches!(r.ensure_free(8000).await, Err(DeployError::Command { .. })));
    }

    #[tokio::test]
    async fn connect_probe_detects_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = ConnectProbeInspector {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(probe.usage(port).await.unwrap(), PortUsage::Occupied(vec![]));
        drop(listener);
        assert_eq!(probe.usage(port).await.unwrap(), PortUsage::Free);
    }

    #[test]
    fn parses_ss_output() {
        let out = "LISTEN 0 128 0.0.0.0:8000 0.0.0.0:* users:((\"python3\",pid=4242,fd=3),(\"python3\",pid=4243,fd=3))\n\
                   LISTEN 0 128 0.0.0.0:18000 0.0.0.0:* users:((\"other\",pid=1,fd=3))\n";
        assert_eq!(parse_socket_table(out, 8000, 3), PortUsage::Occupied(vec![4242, 4243]));
        assert_eq!(parse_socket_table(out, 9000, 3), PortUsage::Free);
    }

    #[test]
    fn parses_netstat_output() {
        let out = "Proto Recv-Q Send-Q Local Address Foreign Address State PID/Program name\n\
                   tcp 0 0 0.0.0.0:11112 0.0.0.0:* LISTEN 777/python3\n\
                   tcp6 0 0 :::11112 :::* LISTEN -\n";
        assert_eq!(parse_socket_table(out, 11112, 3), PortUsage::Occupied(vec![777]));
    }

    #[test]
    fn parses_lsof_pids() {
        assert_eq!(parse_pid_lines("42\n17\n42\n"), vec![17, 42]);
        assert!(parse_pid_lines("").is_empty());
    }
}
