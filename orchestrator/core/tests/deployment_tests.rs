// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end runs of the phase orchestrator against a temporary working
//! directory. Host facilities (profiling, package managers, port tables,
//! readiness probes, container runtime, init manager) are faked; native
//! services are real detached `sleep` processes.

use async_trait::async_trait;
use bringup_core::application::autostart::{
    AutostartRegistrar, InitUnits, Invocation, SystemCommands,
};
use bringup_core::application::backup::BackupManager;
use bringup_core::application::config_generation::ConfigGenerator;
use bringup_core::application::health::HealthValidator;
use bringup_core::application::launcher::ServiceLauncher;
use bringup_core::application::ports::{HostSignaller, PortInspector, PortUsage, PortReclaimer};
use bringup_core::application::profiler::HostProfiler;
use bringup_core::application::prompt::FixedAnswer;
use bringup_core::application::validator::Validator;
use bringup_core::application::{Components, NoopObserver, Orchestrator};
use bringup_core::domain::config::{DeployConfigManifest, ReceiverConfig};
use bringup_core::domain::error::{DeployError, DeployResult};
use bringup_core::domain::phase::{PhaseName, PhaseStatus, RunOutcome};
use bringup_core::domain::profile::{OsFamily, PrivilegeLevel, ProfileId, SystemProfile};
use bringup_core::domain::service::{ProbeKind, ServiceTarget};
use bringup_core::infrastructure::collaborators::{Collaborators, Exposure};
use bringup_core::infrastructure::command::{CommandOutput, CommandRunner};
use bringup_core::infrastructure::container::{ContainerReadiness, ContainerRuntime};
use bringup_core::infrastructure::probe::ReadinessProbe;
use bringup_core::infrastructure::process;
use bringup_core::infrastructure::retry::RetryPolicy;
use bringup_core::infrastructure::state_store::StateStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const WEB_PORT: u16 = 18_080;
const RECEIVER_PORT: u16 = 18_112;

struct FixedProfile(SystemProfile);

#[async_trait]
impl HostProfiler for FixedProfile {
    async fn profile(&self) -> SystemProfile {
        self.0.clone()
    }
}

fn native_host() -> SystemProfile {
    SystemProfile {
        id: ProfileId::new(),
        os_family: OsFamily::Debian,
        os_version: "12".to_string(),
        architecture: "x86_64".to_string(),
        memory_gb: Some(8.0),
        cpu_cores: 4,
        free_storage_gb: Some(40.0),
        has_container_runtime: false,
        has_init_manager: false,
        has_reverse_proxy: false,
        privilege_level: PrivilegeLevel::None,
        internet_reachable: true,
        has_language_runtime: true,
        packages_installable: true,
        memory_used_percent: Some(20.0),
    }
}

#[derive(Default)]
struct RecordingCollaborators {
    calls: Mutex<Vec<String>>,
    fail_migrations: AtomicBool,
    /// Removed while migrations run, to make the backup unrestorable.
    remove_on_migrate: Mutex<Option<PathBuf>>,
}

impl RecordingCollaborators {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Collaborators for RecordingCollaborators {
    async fn ensure_packages(&self, packages: &[String]) -> DeployResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("ensure_packages {}", packages.join(" ")));
        Ok(())
    }

    async fn run_migrations(&self) -> DeployResult<()> {
        self.calls.lock().unwrap().push("migrate".to_string());
        let doomed = self.remove_on_migrate.lock().unwrap().take();
        if let Some(dir) = doomed {
            std::fs::remove_dir_all(dir)?;
        }
        if self.fail_migrations.load(Ordering::SeqCst) {
            return Err(DeployError::collaborator("migrate", "no such table: auth_user"));
        }
        Ok(())
    }

    async fn collect_static_assets(&self) -> DeployResult<()> {
        self.calls.lock().unwrap().push("collect_static".to_string());
        Ok(())
    }

    async fn expose(&self, _port: u16) -> DeployResult<Option<Exposure>> {
        Ok(None)
    }
}

/// Reports a port as held by whichever persisted process handle is bound to
/// it and still alive, like a real socket table would.
struct HandleTable {
    store: StateStore,
}

#[async_trait]
impl PortInspector for HandleTable {
    fn name(&self) -> &'static str {
        "handle-table"
    }

    fn available(&self) -> bool {
        true
    }

    async fn usage(&self, port: u16) -> DeployResult<PortUsage> {
        let pids: Vec<u32> = self
            .store
            .load_handles()?
            .into_iter()
            .filter(|h| h.bound_port == port)
            .filter_map(|h| match h.target {
                ServiceTarget::Process(pid) if process::process_exists(pid) => Some(pid),
                _ => None,
            })
            .collect();
        Ok(if pids.is_empty() {
            PortUsage::Free
        } else {
            PortUsage::Occupied(pids)
        })
    }
}

struct Switch(Arc<AtomicBool>);

#[async_trait]
impl ReadinessProbe for Switch {
    async fn probe(&self, _host: &str, _port: u16, _kind: &ProbeKind) -> Result<(), String> {
        if self.0.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("connection refused".to_string())
        }
    }
}

/// Compose stand-in: every `up` yields one healthy container.
#[derive(Default)]
struct RecordingContainers {
    calls: Mutex<Vec<String>>,
}

impl RecordingContainers {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for RecordingContainers {
    async fn available(&self) -> bool {
        true
    }
    async fn up(&self, file: &Path, _p: Option<&str>, _w: &Path) -> DeployResult<Vec<String>> {
        self.calls.lock().unwrap().push(format!("up {}", file.display()));
        Ok(vec!["c0ffee".to_string()])
    }
    async fn readiness(&self, _id: &str) -> DeployResult<ContainerReadiness> {
        Ok(ContainerReadiness::Ready)
    }
    async fn down(&self, file: &Path, _p: Option<&str>, _w: &Path) -> DeployResult<()> {
        self.calls.lock().unwrap().push(format!("down {}", file.display()));
        Ok(())
    }
    async fn stop_container(&self, id: &str) -> DeployResult<()> {
        self.calls.lock().unwrap().push(format!("stop {}", id));
        Ok(())
    }
}

/// A host with no init manager, no legacy init and no crontab.
struct BareHost;

#[async_trait]
impl SystemCommands for BareHost {
    async fn run(&self, invocation: Invocation) -> DeployResult<CommandOutput> {
        Err(DeployError::command(invocation.program, "not available"))
    }

    fn has(&self, _program: &str) -> bool {
        false
    }
}

/// `systemctl` stand-in that runs each restarted unit as a real detached
/// process and ends it on `stop`.
struct FakeSystemd {
    log: PathBuf,
    running: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSystemd {
    fn new(log: PathBuf) -> Self {
        Self {
            log,
            running: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn running(&self) -> HashMap<String, u32> {
        self.running.lock().unwrap().clone()
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SystemCommands for FakeSystemd {
    async fn run(&self, invocation: Invocation) -> DeployResult<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", invocation.program, invocation.args.join(" ")));
        let unit = invocation.args.last().cloned().unwrap_or_default();
        let mut stdout = String::new();
        match invocation.args.first().map(String::as_str) {
            Some("restart") => {
                let pid = process::spawn_detached("exec sleep 30", Path::new("/"), &self.log, &[])?;
                self.running.lock().unwrap().insert(unit, pid);
            }
            Some("stop") => {
                let pid = self.running.lock().unwrap().remove(&unit);
                if let Some(pid) = pid {
                    process::terminate(pid, Duration::from_secs(2)).await?;
                }
            }
            Some("show") => {
                stdout = self.running.lock().unwrap().get(&unit).copied().unwrap_or(0).to_string();
            }
            _ => {}
        }
        Ok(CommandOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }

    fn has(&self, program: &str) -> bool {
        program == "systemctl"
    }
}

struct Harness {
    dir: TempDir,
    config: DeployConfigManifest,
    profile: SystemProfile,
    collaborators: Arc<RecordingCollaborators>,
    containers: Arc<RecordingContainers>,
    systemd: Option<Arc<FakeSystemd>>,
    launch_ready: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DeployConfigManifest::default();
        let spec = &mut config.spec;
        spec.app.name = "webapp".to_string();
        spec.app.working_dir = dir.path().join("app");
        spec.app.command = "exec sleep 30".to_string();
        spec.app.port = WEB_PORT;
        spec.app.bind_host = "127.0.0.1".to_string();
        spec.receiver = Some(ReceiverConfig {
            name: "receiver".to_string(),
            command: "exec sleep 30".to_string(),
            port: RECEIVER_PORT,
        });
        spec.backup.database_url_env = "BRINGUP_TEST_UNSET_DATABASE_URL".to_string();
        spec.readiness.timeout = Duration::from_secs(2);
        spec.readiness.interval = Duration::from_millis(50);
        spec.health.attempts = 2;
        spec.health.backoff = Duration::from_millis(20);
        spec.ports.attempts = 5;
        spec.ports.grace = Duration::from_millis(200);
        spec.autostart.unit_dir = dir.path().join("no-systemd");
        spec.autostart.init_dir = dir.path().join("no-init.d");
        spec.autostart.login_files = vec![PathBuf::from(".profile")];
        std::fs::create_dir_all(config.working_dir()).unwrap();
        std::fs::create_dir_all(dir.path().join("home")).unwrap();

        Self {
            dir,
            config,
            profile: native_host(),
            collaborators: Arc::new(RecordingCollaborators::default()),
            containers: Arc::new(RecordingContainers::default()),
            systemd: None,
            launch_ready: Arc::new(AtomicBool::new(true)),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    fn home(&self) -> PathBuf {
        self.dir.path().join("home")
    }

    fn store(&self) -> StateStore {
        StateStore::new(self.config.state_dir())
    }

    fn orchestrator(&self, answer: bool, interrupt: CancellationToken) -> Orchestrator {
        let work = CancellationToken::new();
        let runner = CommandRunner::new(Duration::from_secs(10), work.clone());
        let store = self.store();
        let working_dir = self.config.working_dir().to_path_buf();
        let prompt = Arc::new(FixedAnswer(answer));

        let reclaimer = PortReclaimer::new(
            vec![Box::new(HandleTable { store: store.clone() })],
            Arc::new(HostSignaller),
            self.config.spec.ports.attempts,
            self.config.spec.ports.grace,
            work.clone(),
        );
        let mut launcher = ServiceLauncher::new(
            reclaimer,
            Arc::new(Switch(self.launch_ready.clone())),
            self.containers.clone(),
            store.clone(),
            self.config.spec.container.clone(),
            &working_dir,
            "127.0.0.1",
            RetryPolicy::within(self.config.spec.readiness.timeout, self.config.spec.readiness.interval),
            work.clone(),
        )
        .with_stop_grace(Duration::from_secs(2));
        let commands: Arc<dyn SystemCommands> = match &self.systemd {
            Some(systemd) => {
                launcher = launcher.with_init_units(InitUnits::new(
                    systemd.clone(),
                    self.config.spec.autostart.unit_dir.clone(),
                ));
                systemd.clone()
            }
            None => Arc::new(BareHost),
        };

        let parts = Components {
            store: store.clone(),
            profiler: Arc::new(FixedProfile(self.profile.clone())),
            validator: Validator::new(runner.clone(), &working_dir, "python3", None, prompt.clone()),
            backup: BackupManager::new(store, self.config.spec.backup.clone(), &working_dir, runner),
            collaborators: self.collaborators.clone(),
            config_generator: ConfigGenerator::new(&working_dir),
            launcher: Arc::new(launcher),
            registrar: AutostartRegistrar::new(self.config.spec.autostart.clone(), commands)
                .with_home(Some(self.home())),
            health: HealthValidator::new(
                Arc::new(Switch(self.healthy.clone())),
                "127.0.0.1",
                RetryPolicy::new(self.config.spec.health.attempts, self.config.spec.health.backoff),
                work,
            ),
        };
        Orchestrator::new(
            self.config.clone(),
            parts,
            prompt,
            Arc::new(NoopObserver),
            interrupt,
        )
    }

    fn compose_file(&self) -> PathBuf {
        self.config.working_dir().join("docker-compose.yml")
    }

    fn live_pids(&self) -> Vec<u32> {
        self.store()
            .load_handles()
            .unwrap()
            .into_iter()
            .filter_map(|h| match h.target {
                ServiceTarget::Process(pid) if process::process_exists(pid) => Some(pid),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test]
async fn native_deploy_runs_every_phase_and_reports() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(false, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Done);
    assert_eq!(summary.outcome.exit_code(), 0);
    assert!(summary
        .report
        .phases
        .iter()
        .all(|p| p.status == PhaseStatus::Succeeded));
    assert_eq!(
        harness.collaborators.calls(),
        vec![
            format!("ensure_packages {}", harness.config.spec.app.packages.join(" ")),
            "migrate".to_string(),
            "collect_static".to_string(),
        ]
    );

    let handles = harness.store().load_handles().unwrap();
    assert_eq!(handles.len(), 2);
    assert!(handles.iter().all(|h| h.is_ready()));
    assert_eq!(harness.live_pids().len(), 2);

    let env = std::fs::read_to_string(harness.config.working_dir().join(".env")).unwrap();
    assert!(env.contains(&format!("WEB_PORT={}", WEB_PORT)));
    assert!(env.contains(&format!("DICOM_PORT={}", RECEIVER_PORT)));

    let report = std::fs::read_to_string(summary.report_path.unwrap()).unwrap();
    assert!(report.contains("- **Mode:** `native_simple`"));
    assert!(report.contains(&format!("- Web: http://127.0.0.1:{}/", WEB_PORT)));

    let profile = std::fs::read_to_string(harness.home().join(".profile")).unwrap();
    assert!(profile.contains("# managed-by: bringup webapp\n"));
    assert!(profile.contains("# managed-by: bringup webapp-receiver\n"));

    orchestrator.stop().await.unwrap();
    assert!(harness.store().load_handles().unwrap().is_empty());
}

#[tokio::test]
async fn redeploy_replaces_services_without_duplicating_state() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(false, CancellationToken::new());

    orchestrator.deploy().await.unwrap();
    let first_pids = harness.live_pids();
    let env_first = std::fs::read_to_string(harness.config.working_dir().join(".env")).unwrap();
    let profile_first = std::fs::read_to_string(harness.home().join(".profile")).unwrap();

    let second = orchestrator.deploy().await.unwrap();
    assert_eq!(second.outcome, RunOutcome::Done);

    // Old processes were reclaimed from their ports, new ones took over.
    for pid in &first_pids {
        assert!(!process::process_exists(*pid), "pid {} survived the redeploy", pid);
    }
    assert_eq!(harness.store().load_handles().unwrap().len(), 2);
    assert_eq!(harness.live_pids().len(), 2);

    // The secret key survives, autostart entries are not duplicated.
    let env_second = std::fs::read_to_string(harness.config.working_dir().join(".env")).unwrap();
    assert_eq!(env_first, env_second);
    let profile_second = std::fs::read_to_string(harness.home().join(".profile")).unwrap();
    assert_eq!(profile_first, profile_second);
    assert!(second
        .report
        .registrations
        .iter()
        .filter(|r| r.installed)
        .all(|r| !r.newly_written));

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn init_manager_host_hands_services_to_their_units() {
    let mut harness = Harness::new();
    harness.profile.has_init_manager = true;
    harness.profile.privilege_level = PrivilegeLevel::Root;
    harness.config.spec.autostart.unit_dir = harness.dir.path().join("systemd");
    std::fs::create_dir_all(&harness.config.spec.autostart.unit_dir).unwrap();
    let systemd = Arc::new(FakeSystemd::new(harness.dir.path().join("units.log")));
    harness.systemd = Some(systemd.clone());
    let orchestrator = harness.orchestrator(false, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Done);
    assert_eq!(summary.report.mode.map(|m| m.to_string()), Some("native_with_init_manager".to_string()));
    assert!(harness.config.spec.autostart.unit_dir.join("webapp.service").is_file());

    // The running copies are the units' main processes, not detached children.
    let mut unit_pids: Vec<u32> = systemd.running().values().copied().collect();
    let mut handle_pids = harness.live_pids();
    unit_pids.sort_unstable();
    handle_pids.sort_unstable();
    assert_eq!(unit_pids.len(), 2);
    assert_eq!(handle_pids, unit_pids);

    let calls = systemd.calls();
    let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
    assert!(position("systemctl enable webapp.service") < position("systemctl restart webapp.service"));
    assert!(position("systemctl stop webapp-receiver.service") < position("systemctl restart webapp-receiver.service"));

    orchestrator.stop().await.unwrap();
    assert!(systemd.running().is_empty());
    assert!(harness.store().load_handles().unwrap().is_empty());
}

#[tokio::test]
async fn dependencies_only_host_asks_for_a_rerun() {
    let mut harness = Harness::new();
    harness.profile.has_language_runtime = false;
    let orchestrator = harness.orchestrator(false, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::RerunRequired);
    assert_eq!(summary.outcome.exit_code(), 0);
    assert_eq!(harness.collaborators.calls().len(), 1);
    assert!(harness.store().load_handles().unwrap().is_empty());

    let status = |name: PhaseName| {
        summary
            .report
            .phases
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.status)
            .unwrap()
    };
    assert_eq!(status(PhaseName::DependencySetup), PhaseStatus::Succeeded);
    assert_eq!(status(PhaseName::ExecuteDeployment), PhaseStatus::Pending);
    assert_eq!(status(PhaseName::Report), PhaseStatus::Succeeded);
    assert!(summary.report_path.is_some());

    let err = orchestrator.start().await.unwrap_err();
    assert!(matches!(err, DeployError::State(_)));
}

#[tokio::test]
async fn failing_phase_restores_the_backup() {
    let harness = Harness::new();
    let env_path = harness.config.working_dir().join(".env");
    std::fs::write(&env_path, "SECRET_KEY=original\nWEB_PORT=7000\n").unwrap();
    harness.collaborators.fail_migrations.store(true, Ordering::SeqCst);
    let orchestrator = harness.orchestrator(false, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    match &summary.outcome {
        RunOutcome::RolledBack { phase, reason } => {
            assert_eq!(*phase, PhaseName::ConfigGeneration);
            assert!(reason.contains("no such table"));
        }
        other => panic!("expected rollback, got {:?}", other),
    }
    assert_eq!(
        std::fs::read_to_string(&env_path).unwrap(),
        "SECRET_KEY=original\nWEB_PORT=7000\n"
    );
    assert!(harness.store().load_handles().unwrap().is_empty());
    assert!(summary.report.backup_dir.is_some());
    let report = std::fs::read_to_string(summary.report_path.unwrap()).unwrap();
    assert!(report.contains("rolled back"));
}

#[tokio::test]
async fn unrestorable_backup_is_reported_as_rollback_failure() {
    let harness = Harness::new();
    let env_path = harness.config.working_dir().join(".env");
    std::fs::write(&env_path, "SECRET_KEY=original\n").unwrap();
    harness.collaborators.fail_migrations.store(true, Ordering::SeqCst);
    *harness.collaborators.remove_on_migrate.lock().unwrap() = Some(harness.store().backups_dir());
    let orchestrator = harness.orchestrator(false, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    match &summary.outcome {
        RunOutcome::RollbackFailed {
            phase,
            reason,
            rollback_error,
        } => {
            assert_eq!(*phase, PhaseName::ConfigGeneration);
            assert!(reason.contains("no such table"));
            assert!(rollback_error.contains(".env"), "{}", rollback_error);
        }
        other => panic!("expected a failed rollback, got {:?}", other),
    }
    assert_eq!(summary.outcome.exit_code(), 3);
    let report = std::fs::read_to_string(summary.report_path.unwrap()).unwrap();
    assert!(report.contains("ROLLBACK FAILED"));
}

#[tokio::test]
async fn container_deploy_brings_the_compose_project_up() {
    let mut harness = Harness::new();
    harness.profile.has_container_runtime = true;
    let orchestrator = harness.orchestrator(false, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Done);
    let compose = harness.compose_file();
    assert_eq!(
        harness.containers.calls(),
        vec![
            format!("down {}", compose.display()),
            format!("up {}", compose.display()),
        ]
    );
    // Images carry their dependencies; nothing runs on the host.
    assert!(harness.collaborators.calls().is_empty());

    let handles = harness.store().load_handles().unwrap();
    assert_eq!(handles.len(), 2);
    assert!(handles
        .iter()
        .all(|h| h.is_ready() && h.target == ServiceTarget::Container("c0ffee".to_string())));

    let report = std::fs::read_to_string(summary.report_path.unwrap()).unwrap();
    assert!(report.contains("- **Mode:** `container_full`"));

    // One autostart entry relaunches the whole project in the foreground.
    let profile = std::fs::read_to_string(harness.home().join(".profile")).unwrap();
    assert!(profile.contains("# managed-by: bringup webapp\n"));
    assert!(!profile.contains("bringup webapp-receiver"));
    assert!(profile.contains(&format!("'{}' up", compose.display())));

    orchestrator.stop().await.unwrap();
    assert_eq!(
        harness.containers.calls().last(),
        Some(&format!("down {}", compose.display()))
    );
    assert!(harness.store().load_handles().unwrap().is_empty());
}

#[tokio::test]
async fn container_rollback_takes_the_project_down_once() {
    let mut harness = Harness::new();
    harness.profile.has_container_runtime = true;
    harness.healthy.store(false, Ordering::SeqCst);
    let orchestrator = harness.orchestrator(true, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    assert!(matches!(
        summary.outcome,
        RunOutcome::RolledBack {
            phase: PhaseName::PostValidate,
            ..
        }
    ));
    let compose = harness.compose_file();
    assert_eq!(
        harness.containers.calls(),
        vec![
            format!("down {}", compose.display()),
            format!("up {}", compose.display()),
            format!("down {}", compose.display()),
        ]
    );
    assert!(harness.store().load_handles().unwrap().is_empty());
}

#[tokio::test]
async fn service_that_never_becomes_ready_is_rolled_back() {
    let harness = Harness::new();
    harness.launch_ready.store(false, Ordering::SeqCst);
    let orchestrator = harness.orchestrator(false, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    assert!(matches!(
        summary.outcome,
        RunOutcome::RolledBack {
            phase: PhaseName::ExecuteDeployment,
            ..
        }
    ));
    assert!(harness.live_pids().is_empty());
}

#[tokio::test]
async fn unhealthy_deploy_is_kept_when_rollback_is_declined() {
    let harness = Harness::new();
    harness.healthy.store(false, Ordering::SeqCst);
    let orchestrator = harness.orchestrator(false, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    match &summary.outcome {
        RunOutcome::Unhealthy { failures } => assert_eq!(failures.len(), 2),
        other => panic!("expected unhealthy, got {:?}", other),
    }
    let post = summary
        .report
        .phases
        .iter()
        .find(|p| p.name == PhaseName::PostValidate)
        .unwrap();
    assert_eq!(post.status, PhaseStatus::Failed);
    // Later phases still ran.
    let monitoring = summary
        .report
        .phases
        .iter()
        .find(|p| p.name == PhaseName::MonitoringSetup)
        .unwrap();
    assert_eq!(monitoring.status, PhaseStatus::Succeeded);
    assert_eq!(harness.live_pids().len(), 2);

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn unhealthy_deploy_is_rolled_back_when_accepted() {
    let harness = Harness::new();
    harness.healthy.store(false, Ordering::SeqCst);
    let orchestrator = harness.orchestrator(true, CancellationToken::new());

    let summary = orchestrator.deploy().await.unwrap();

    assert!(matches!(
        summary.outcome,
        RunOutcome::RolledBack {
            phase: PhaseName::PostValidate,
            ..
        }
    ));
    assert!(harness.live_pids().is_empty());
}

#[tokio::test]
async fn interrupt_during_launch_rolls_back_and_stops_services() {
    let mut harness = Harness::new();
    harness.config.spec.readiness.timeout = Duration::from_secs(20);
    harness.launch_ready.store(false, Ordering::SeqCst);
    let interrupt = CancellationToken::new();
    let orchestrator = harness.orchestrator(false, interrupt.clone());

    let trigger = interrupt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let summary = orchestrator.deploy().await.unwrap();

    match &summary.outcome {
        RunOutcome::RolledBack { phase, reason } => {
            assert_eq!(*phase, PhaseName::ExecuteDeployment);
            assert!(reason.contains("Interrupted"));
        }
        other => panic!("expected rollback, got {:?}", other),
    }
    assert!(harness.live_pids().is_empty());
    assert!(summary.report_path.is_some());
}

#[tokio::test]
async fn start_relaunches_from_the_persisted_mode() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(false, CancellationToken::new());
    orchestrator.deploy().await.unwrap();
    orchestrator.stop().await.unwrap();
    assert!(harness.live_pids().is_empty());

    let handles = orchestrator.start().await.unwrap();
    assert_eq!(handles.len(), 2);
    assert_eq!(harness.live_pids().len(), 2);

    let status = orchestrator.status().await.unwrap();
    assert_eq!(status.record.map(|r| r.mode.to_string()), Some("native_simple".to_string()));
    assert!(status.services.iter().all(|s| s.alive && s.ready));

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn manual_rollback_uses_the_latest_backup() {
    let harness = Harness::new();
    let env_path = harness.config.working_dir().join(".env");
    std::fs::write(&env_path, "SECRET_KEY=before\n").unwrap();
    let orchestrator = harness.orchestrator(false, CancellationToken::new());
    orchestrator.deploy().await.unwrap();
    assert_ne!(std::fs::read_to_string(&env_path).unwrap(), "SECRET_KEY=before\n");

    let manifest = orchestrator.rollback(None).await.unwrap();

    assert!(manifest.directory.starts_with(harness.store().backups_dir()));
    assert_eq!(std::fs::read_to_string(&env_path).unwrap(), "SECRET_KEY=before\n");
    assert!(harness.live_pids().is_empty());
}

#[tokio::test]
async fn rollback_without_any_backup_is_an_error() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(false, CancellationToken::new());
    let err = orchestrator.rollback(None).await.unwrap_err();
    assert!(matches!(err, DeployError::State(_)));
}
