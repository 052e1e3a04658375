// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Phase Orchestrator
//!
//! Drives one deployment run through the fixed phase sequence:
//!
//! ```text
//! PROFILE → VALIDATE → BACKUP → DEPENDENCY_SETUP → CONFIG_GENERATION
//!   → EXECUTE_DEPLOYMENT → POST_VALIDATE → MONITORING_SETUP → REPORT
//! ```
//!
//! Phases run strictly one after another. A failing phase (including an
//! operator interrupt) ends the sequence; when a backup manifest exists the
//! run is rolled back, otherwise it ends as a plain failure. `REPORT` runs in
//! every case.
//!
//! `EXECUTE_DEPLOYMENT` is the only mode-polymorphic phase; it dispatches
//! through [`DeploymentStrategy`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Own the run state machine and the failure/rollback policy
//! - **Collaborators:** every other application service, via [`Components`]

use crate::application::autostart::{AutostartRegistrar, HostCommands, InitUnits, SystemCommands};
use crate::application::backup::{BackupManager, RunningServices};
use crate::application::config_generation::{ConfigGenerator, EnvSettings};
use crate::application::health::HealthValidator;
use crate::application::launcher::{ServiceLauncher, ServiceStatus};
use crate::application::ports::{host_inspectors, HostSignaller, PortReclaimer};
use crate::application::profiler::{HostProfiler, Profiler};
use crate::application::prompt::OperatorPrompt;
use crate::application::report::{AccessPoints, RunReport};
use crate::application::validator::Validator;
use crate::domain::autostart::{AutostartChannel, AutostartRegistration, LaunchScript};
use crate::domain::backup::BackupManifest;
use crate::domain::config::DeployConfigManifest;
use crate::domain::error::{DeployError, DeployResult};
use crate::domain::phase::{Phase, PhaseName, RunOutcome};
use crate::domain::profile::{decide_mode, DeploymentMode, SystemProfile};
use crate::domain::service::{ProbeKind, ReadinessState, ServiceHandle, ServiceSpec, ServiceTarget};
use crate::infrastructure::collaborators::{Collaborators, ShellCollaborators};
use crate::infrastructure::command::CommandRunner;
use crate::infrastructure::container::{foreground_up_line, ComposeRuntime, ContainerRuntime};
use crate::infrastructure::probe::{probe_host, NetworkProbe, ReadinessProbe};
use crate::infrastructure::process;
use crate::infrastructure::retry::RetryPolicy;
use crate::infrastructure::state_store::{append_log_line, PersistedProfile, StateStore};
use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Handle name under which a spawned tunnel process is persisted.
pub const TUNNEL_SERVICE: &str = "tunnel";

const ROLLBACK_QUESTION: &str =
    "Post-deployment health check failed. Roll back to the pre-deployment backup?";

#[async_trait]
pub trait DeploymentObserver: Send + Sync {
    async fn on_phase_start(&self, phase: &Phase);
    async fn on_phase_complete(&self, phase: &Phase);
    async fn on_phase_fail(&self, phase: &Phase, error: &str);
    async fn on_rollback_start(&self, backup_dir: &Path);
    async fn on_rollback_complete(&self, error: Option<&str>);
}

/// Observer that ignores every event.
pub struct NoopObserver;

#[async_trait]
impl DeploymentObserver for NoopObserver {
    async fn on_phase_start(&self, _phase: &Phase) {}
    async fn on_phase_complete(&self, _phase: &Phase) {}
    async fn on_phase_fail(&self, _phase: &Phase, _error: &str) {}
    async fn on_rollback_start(&self, _backup_dir: &Path) {}
    async fn on_rollback_complete(&self, _error: Option<&str>) {}
}

/// Execution strategy selected once per run from the deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStrategy {
    /// Compose project; the runtime's health state gates readiness.
    Container,
    /// Detached host processes; the readiness probe gates readiness.
    Native,
    /// Packages only; nothing is launched.
    InstallOnly,
}

impl DeploymentStrategy {
    pub fn for_mode(mode: DeploymentMode) -> Self {
        match mode {
            DeploymentMode::ContainerFull | DeploymentMode::ContainerMinimal => Self::Container,
            DeploymentMode::NativeWithInitManager | DeploymentMode::NativeSimple => Self::Native,
            DeploymentMode::DependenciesOnly => Self::InstallOnly,
        }
    }
}

/// Everything the orchestrator drives.
pub struct Components {
    pub store: StateStore,
    pub profiler: Arc<dyn HostProfiler>,
    pub validator: Validator,
    pub backup: BackupManager,
    pub collaborators: Arc<dyn Collaborators>,
    pub config_generator: ConfigGenerator,
    pub launcher: Arc<ServiceLauncher>,
    pub registrar: AutostartRegistrar,
    pub health: HealthValidator,
}

impl Components {
    /// Wire the real host implementations from configuration.
    ///
    /// Components get their own cancellation token: an operator interrupt
    /// abandons the running phase by dropping it, and rollback must still be
    /// able to run commands afterwards.
    pub fn for_host(config: &DeployConfigManifest, prompt: Arc<dyn OperatorPrompt>) -> Self {
        let spec = &config.spec;
        let work = CancellationToken::new();
        let runner = CommandRunner::new(Duration::from_secs(120), work.clone());
        let long_runner = runner.with_timeout(spec.collaborators.timeout);
        let working_dir = config.working_dir().to_path_buf();
        let store = StateStore::new(config.state_dir());

        let probe: Arc<dyn ReadinessProbe> = Arc::new(NetworkProbe::default());
        let host = probe_host(&spec.app.bind_host).to_string();

        let reclaimer = PortReclaimer::new(
            host_inspectors(&runner),
            Arc::new(HostSignaller),
            spec.ports.attempts,
            spec.ports.grace,
            work.clone(),
        );
        let containers: Arc<dyn ContainerRuntime> = Arc::new(ComposeRuntime::new(long_runner.clone()));
        let commands: Arc<dyn SystemCommands> = Arc::new(HostCommands::new(runner.clone()));
        let launcher = ServiceLauncher::new(
            reclaimer,
            probe.clone(),
            containers.clone(),
            store.clone(),
            spec.container.clone(),
            &working_dir,
            host.clone(),
            RetryPolicy::within(spec.readiness.timeout, spec.readiness.interval),
            work.clone(),
        )
        .with_init_units(InitUnits::new(commands.clone(), spec.autostart.unit_dir.clone()));

        Self {
            profiler: Arc::new(Profiler::new(
                runner.clone(),
                containers,
                &working_dir,
                &spec.app.runtime,
                spec.network_probes.clone(),
            )),
            validator: Validator::new(
                long_runner.clone(),
                &working_dir,
                &spec.app.runtime,
                spec.test_hook.clone(),
                prompt,
            ),
            backup: BackupManager::new(store.clone(), spec.backup.clone(), &working_dir, long_runner),
            collaborators: Arc::new(ShellCollaborators::new(
                spec.collaborators.clone(),
                &working_dir,
                store.logs_dir(),
                runner.clone(),
            )),
            config_generator: ConfigGenerator::new(&working_dir),
            launcher: Arc::new(launcher),
            registrar: AutostartRegistrar::new(spec.autostart.clone(), commands),
            health: HealthValidator::new(
                probe,
                host,
                RetryPolicy::new(spec.health.attempts, spec.health.backoff),
                work,
            ),
            store,
        }
    }
}

/// Result of one `deploy` run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub report: RunReport,
    pub report_path: Option<PathBuf>,
}

/// Persisted state of the last run, for `status`.
#[derive(Debug, Clone)]
pub struct DeploymentStatus {
    pub record: Option<PersistedProfile>,
    pub services: Vec<ServiceStatus>,
}

/// What a phase asks the run loop to do next.
enum PhaseFlow {
    Continue,
    /// The phase did not succeed but the run goes on (declined rollback).
    Degraded(String),
    /// Stop the sequence here with this outcome.
    Finish(RunOutcome),
}

/// Mutable state of one run.
struct RunState {
    log: PathBuf,
    profile: Option<SystemProfile>,
    mode: Option<DeploymentMode>,
    manifest: Option<BackupManifest>,
    handles: Vec<ServiceHandle>,
    report: RunReport,
}

impl RunState {
    fn decided(&self) -> DeployResult<(&SystemProfile, DeploymentMode)> {
        match (&self.profile, self.mode) {
            (Some(profile), Some(mode)) => Ok((profile, mode)),
            _ => Err(DeployError::State("phase ran before PROFILE".to_string())),
        }
    }
}

pub struct Orchestrator {
    config: DeployConfigManifest,
    parts: Components,
    prompt: Arc<dyn OperatorPrompt>,
    observer: Arc<dyn DeploymentObserver>,
    interrupt: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: DeployConfigManifest,
        parts: Components,
        prompt: Arc<dyn OperatorPrompt>,
        observer: Arc<dyn DeploymentObserver>,
        interrupt: CancellationToken,
    ) -> Self {
        Self {
            config,
            parts,
            prompt,
            observer,
            interrupt,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.parts.store
    }

    /// Run the full phase sequence. Only infrastructure errors that prevent
    /// the run from starting at all are returned as `Err`; phase failures
    /// are reported through [`RunSummary::outcome`].
    pub async fn deploy(&self) -> DeployResult<RunSummary> {
        self.parts.store.ensure_layout()?;

        let run_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let log = self.parts.store.run_log_path(&run_id);
        let phases = PhaseName::SEQUENCE
            .iter()
            .map(|name| Phase::new(*name, log.clone()))
            .collect();
        let mut state = RunState {
            log,
            profile: None,
            mode: None,
            manifest: None,
            handles: Vec::new(),
            report: RunReport::new(&run_id, phases, self.access_points()),
        };

        info!(run_id = %run_id, "Starting deployment");
        let mut outcome = None;
        for name in PhaseName::SEQUENCE {
            if name == PhaseName::Report {
                break;
            }
            match self.run_phase(name, &mut state).await {
                Ok(PhaseFlow::Continue) | Ok(PhaseFlow::Degraded(_)) => {}
                Ok(PhaseFlow::Finish(finished)) => {
                    outcome = Some(finished);
                    break;
                }
                Err(e) => {
                    outcome = Some(self.recover(name, e, &state).await);
                    break;
                }
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            if state.report.health_failures.is_empty() {
                RunOutcome::Done
            } else {
                RunOutcome::Unhealthy {
                    failures: state.report.health_failures.clone(),
                }
            }
        });
        let report_path = self.write_report(&mut state, &outcome).await;

        counter!("bringup_runs_total", "outcome" => outcome_label(&outcome)).increment(1);
        info!(run_id = %run_id, exit_code = outcome.exit_code(), "Deployment finished: {:?}", outcome);

        Ok(RunSummary {
            run_id,
            outcome,
            report: state.report,
            report_path,
        })
    }

    /// Relaunch the services from the persisted profile and mode, without
    /// profiling or backing up again.
    pub async fn start(&self) -> DeployResult<Vec<ServiceHandle>> {
        let record = self.parts.store.load_profile()?.ok_or_else(|| {
            DeployError::State("no persisted profile; run `bringup deploy` first".to_string())
        })?;
        info!(mode = %record.mode, "Starting services from last deployment");
        self.interruptible(self.launch_services(record.mode)).await
    }

    /// Stop every persisted service.
    pub async fn stop(&self) -> DeployResult<()> {
        self.interruptible(self.parts.launcher.stop_all()).await
    }

    pub async fn status(&self) -> DeployResult<DeploymentStatus> {
        Ok(DeploymentStatus {
            record: self.parts.store.load_profile()?,
            services: self.parts.launcher.status().await?,
        })
    }

    /// Restore from `backup_dir`, or from the most recent backup.
    pub async fn rollback(&self, backup_dir: Option<&Path>) -> DeployResult<BackupManifest> {
        let manifest = match backup_dir {
            Some(dir) => self.parts.store.load_manifest(dir)?,
            None => self
                .parts
                .store
                .latest_manifest()?
                .ok_or_else(|| DeployError::State("no backup found".to_string()))?,
        };
        self.observer.on_rollback_start(&manifest.directory).await;
        let result = self
            .parts
            .backup
            .rollback(&manifest, self.parts.launcher.as_ref())
            .await;
        let message = result.as_ref().err().map(|e| e.to_string());
        self.observer.on_rollback_complete(message.as_deref()).await;
        result.map(|()| manifest)
    }

    async fn run_phase(&self, name: PhaseName, state: &mut RunState) -> DeployResult<PhaseFlow> {
        let index = usize::from(name.ordinal() - 1);
        state.report.phases[index].start();
        self.observer.on_phase_start(&state.report.phases[index]).await;
        append_log_line(&state.log, &format!("[{}] {} started", name.ordinal(), name));
        info!(phase = %name, "Phase started");

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => {
                warn!(phase = %name, "Interrupted");
                Err(DeployError::Interrupted)
            }
            result = self.execute_phase(name, state) => result,
        };
        histogram!("bringup_phase_duration_seconds", "phase" => name.as_str())
            .record(started.elapsed().as_secs_f64());

        let phase = &mut state.report.phases[index];
        match &result {
            Ok(PhaseFlow::Degraded(reason)) => {
                phase.fail(reason.clone());
                append_log_line(&state.log, &format!("[{}] {} degraded: {}", name.ordinal(), name, reason));
                warn!(phase = %name, "Phase degraded: {}", reason);
                self.observer.on_phase_fail(phase, reason).await;
            }
            Ok(_) => {
                phase.succeed();
                append_log_line(&state.log, &format!("[{}] {} succeeded", name.ordinal(), name));
                info!(phase = %name, duration_ms = phase.duration_ms(), "Phase succeeded");
                self.observer.on_phase_complete(phase).await;
            }
            Err(e) => {
                let message = e.to_string();
                phase.fail(message.clone());
                append_log_line(&state.log, &format!("[{}] {} failed: {}", name.ordinal(), name, message));
                error!(phase = %name, "Phase failed: {}", message);
                counter!("bringup_phase_failures_total", "phase" => name.as_str()).increment(1);
                self.observer.on_phase_fail(phase, &message).await;
            }
        }
        result
    }

    async fn execute_phase(&self, name: PhaseName, state: &mut RunState) -> DeployResult<PhaseFlow> {
        match name {
            PhaseName::Profile => {
                let profile = self.parts.profiler.profile().await;
                let mode = decide_mode(&profile);
                info!(%mode, "Deployment mode selected");
                self.parts.store.save_profile(&PersistedProfile {
                    profile: profile.clone(),
                    mode,
                    recorded_at: Utc::now(),
                })?;
                state.report.mode = Some(mode);
                state.report.profile = Some(profile.clone());
                state.profile = Some(profile);
                state.mode = Some(mode);
            }

            PhaseName::Validate => {
                let (profile, mode) = state.decided()?;
                let report = self.parts.validator.validate(profile, mode).await?;
                let warnings: Vec<String> = report
                    .warnings()
                    .iter()
                    .map(|c| format!("{}: {}", c.name, c.detail))
                    .collect();
                state.report.warnings.extend(warnings);
            }

            PhaseName::Backup => {
                let (profile, mode) = state.decided()?;
                let manifest = self.parts.backup.snapshot(profile, mode).await?;
                for skipped in &manifest.skipped {
                    state.report.warnings.push(format!(
                        "backup skipped {}: {}",
                        skipped.artifact_name, skipped.reason
                    ));
                }
                state.report.backup_dir = Some(manifest.directory.clone());
                state.manifest = Some(manifest);
            }

            PhaseName::DependencySetup => {
                let (profile, mode) = state.decided()?;
                let strategy = DeploymentStrategy::for_mode(mode);
                let packages = &self.config.spec.app.packages;

                match strategy {
                    DeploymentStrategy::Container => {
                        info!("Container images carry their own dependencies");
                    }
                    _ if profile.packages_installable => {
                        self.parts.collaborators.ensure_packages(packages).await?;
                    }
                    _ => {
                        let warning = "no usable package manager; assuming packages are installed";
                        warn!("{}", warning);
                        state.report.warnings.push(warning.to_string());
                    }
                }

                if strategy == DeploymentStrategy::InstallOnly {
                    info!("Dependencies installed; deploy must be run again");
                    return Ok(PhaseFlow::Finish(RunOutcome::RerunRequired));
                }
            }

            PhaseName::ConfigGeneration => {
                let (_, mode) = state.decided()?;
                let generated = self.parts.config_generator.generate(&EnvSettings {
                    web_port: self.config.spec.app.port,
                    receiver_port: self.config.spec.receiver.as_ref().map(|r| r.port),
                })?;
                info!(created = generated.created, keys = generated.updated_keys.len(), "Configuration generated");

                if DeploymentStrategy::for_mode(mode) == DeploymentStrategy::Native {
                    self.parts.collaborators.run_migrations().await?;
                    self.parts.collaborators.collect_static_assets().await?;
                }
            }

            PhaseName::ExecuteDeployment => {
                let (_, mode) = state.decided()?;
                state.handles = self.launch_services(mode).await?;
            }

            PhaseName::PostValidate => {
                if let Err(failures) = self.parts.health.validate_deployment(&state.handles).await {
                    state.report.health_failures = failures.clone();
                    let summary = failures.join("; ");
                    if self.prompt.confirm(ROLLBACK_QUESTION).await {
                        return Err(DeployError::ServiceStart {
                            service: "health check".to_string(),
                            reason: summary,
                        });
                    }
                    warn!("Rollback declined; deployment left in place");
                    return Ok(PhaseFlow::Degraded(summary));
                }
            }

            PhaseName::MonitoringSetup => {
                let (profile, mode) = state.decided()?;
                let scripts = self.launch_scripts(mode);
                let registrations = self.parts.registrar.register_all(&scripts, profile).await;
                for script in &scripts {
                    let installed = registrations
                        .iter()
                        .any(|r| r.service == script.name && r.installed);
                    if !installed {
                        state
                            .report
                            .warnings
                            .push(format!("{} has no autostart channel; it will not survive a reboot", script.name));
                    }
                }
                if mode == DeploymentMode::NativeWithInitManager {
                    self.hand_over_to_init_units(mode, &registrations, &mut state.handles)
                        .await?;
                }
                state.report.registrations = registrations;

                match self.expose().await {
                    Ok(url) => state.report.access_points.public_url = url,
                    Err(DeployError::Interrupted) => return Err(DeployError::Interrupted),
                    Err(e) => {
                        warn!("Public exposure failed: {}", e);
                        state.report.warnings.push(format!("public exposure failed: {}", e));
                    }
                }
            }

            PhaseName::Report => {}
        }
        Ok(PhaseFlow::Continue)
    }

    /// Decide the terminal outcome after `phase` failed.
    async fn recover(&self, phase: PhaseName, error: DeployError, state: &RunState) -> RunOutcome {
        let reason = error.to_string();
        let Some(manifest) = &state.manifest else {
            info!(%phase, "No backup exists; nothing to roll back");
            return RunOutcome::Failed { phase, reason };
        };

        warn!(%phase, backup = ?manifest.directory, "Rolling back after failure");
        self.observer.on_rollback_start(&manifest.directory).await;
        let result = self
            .parts
            .backup
            .rollback(manifest, self.parts.launcher.as_ref())
            .await;
        append_log_line(
            &state.log,
            &format!("rollback: {}", result.as_ref().map(|_| "restored".to_string()).unwrap_or_else(|e| e.to_string())),
        );

        match result {
            Ok(()) => {
                self.observer.on_rollback_complete(None).await;
                RunOutcome::RolledBack { phase, reason }
            }
            Err(e) => {
                let rollback_error = e.to_string();
                error!(%phase, "ROLLBACK FAILED, host state is ambiguous: {}", rollback_error);
                self.observer.on_rollback_complete(Some(&rollback_error)).await;
                RunOutcome::RollbackFailed {
                    phase,
                    reason,
                    rollback_error,
                }
            }
        }
    }

    async fn write_report(&self, state: &mut RunState, outcome: &RunOutcome) -> Option<PathBuf> {
        let index = usize::from(PhaseName::Report.ordinal() - 1);
        state.report.phases[index].start();
        self.observer.on_phase_start(&state.report.phases[index]).await;

        let finished = Utc::now();
        state.report.finished_at = Some(finished);
        state.report.outcome = Some(outcome.clone());
        state.report.phases[index].succeed();
        let written = self
            .parts
            .store
            .write_report(finished, &state.report.render_markdown());

        let phase = &mut state.report.phases[index];
        match written {
            Ok(path) => {
                append_log_line(&state.log, &format!("report written to {}", path.display()));
                self.observer.on_phase_complete(phase).await;
                Some(path)
            }
            Err(e) => {
                let message = format!("could not write report: {}", e);
                error!("{}", message);
                phase.fail(message.clone());
                self.observer.on_phase_fail(phase, &message).await;
                None
            }
        }
    }

    async fn launch_services(&self, mode: DeploymentMode) -> DeployResult<Vec<ServiceHandle>> {
        let specs = self.service_specs();
        match DeploymentStrategy::for_mode(mode) {
            DeploymentStrategy::Container => self.parts.launcher.launch_containers(mode, &specs).await,
            DeploymentStrategy::Native => {
                let mut handles = Vec::with_capacity(specs.len());
                for spec in &specs {
                    handles.push(self.parts.launcher.launch(mode, spec).await?);
                }
                Ok(handles)
            }
            DeploymentStrategy::InstallOnly => Err(DeployError::State(
                "last run only installed dependencies; run `bringup deploy` again".to_string(),
            )),
        }
    }

    /// Relaunch every service whose init unit this run installed through that
    /// unit, so the init manager supervises the running copy.
    async fn hand_over_to_init_units(
        &self,
        mode: DeploymentMode,
        registrations: &[AutostartRegistration],
        handles: &mut Vec<ServiceHandle>,
    ) -> DeployResult<()> {
        let launcher = &self.parts.launcher;
        for spec in self.service_specs() {
            let fresh_unit = registrations.iter().any(|r| {
                r.service == spec.unit
                    && r.channel == AutostartChannel::InitUnit
                    && r.installed
                    && r.newly_written
            });
            if !fresh_unit {
                continue;
            }
            if let Some(detached) = handles.iter().find(|h| h.name == spec.name) {
                launcher.stop(detached).await?;
            }
            info!(service = %spec.name, unit = %spec.unit, "Handing service over to its init unit");
            let handle = launcher.launch(mode, &spec).await?;
            handles.retain(|h| h.name != spec.name);
            handles.push(handle);
        }
        Ok(())
    }

    /// Start the tunnel, replacing one left by an earlier run.
    async fn expose(&self) -> DeployResult<Option<String>> {
        let launcher = &self.parts.launcher;
        if let Some(previous) = self
            .parts
            .store
            .load_handles()?
            .into_iter()
            .find(|h| h.name == TUNNEL_SERVICE)
        {
            launcher.stop(&previous).await?;
        }

        let Some(exposure) = self.parts.collaborators.expose(self.config.spec.app.port).await? else {
            return Ok(None);
        };
        if let Some(pid) = exposure.pid {
            let api_port = reqwest::Url::parse(&self.config.spec.collaborators.tunnel_api)
                .ok()
                .and_then(|url| url.port_or_known_default())
                .unwrap_or(4040);
            launcher.record(&ServiceHandle {
                name: TUNNEL_SERVICE.to_string(),
                target: ServiceTarget::Process(pid),
                bound_port: api_port,
                readiness_state: ReadinessState::Ready,
                probe: ProbeKind::Tcp,
                log_path: Some(self.parts.store.logs_dir().join("tunnel.log")),
                started_at: process::start_time(pid),
                unit: None,
            })?;
        }
        Ok(Some(exposure.public_url))
    }

    fn service_specs(&self) -> Vec<ServiceSpec> {
        let mut specs = vec![self.config.web_service()];
        specs.extend(self.config.receiver_service());
        specs
    }

    /// What the autostart channels relaunch after a reboot.
    fn launch_scripts(&self, mode: DeploymentMode) -> Vec<LaunchScript> {
        let unit = self.config.unit_name();
        let working_dir = self.config.working_dir().to_path_buf();

        if DeploymentStrategy::for_mode(mode) == DeploymentStrategy::Container {
            let compose_file = self.parts.launcher.compose_file(mode);
            return vec![LaunchScript {
                name: unit.clone(),
                command: foreground_up_line(&compose_file, self.config.spec.container.project_name.as_deref()),
                working_dir,
                port: self.config.spec.app.port,
                log_path: self.parts.store.service_log_path(&unit),
            }];
        }

        self.service_specs()
            .into_iter()
            .map(|spec| LaunchScript {
                log_path: self.parts.store.service_log_path(&spec.name),
                name: spec.unit,
                command: spec.command,
                working_dir: working_dir.clone(),
                port: spec.port,
            })
            .collect()
    }

    fn access_points(&self) -> AccessPoints {
        AccessPoints::new(
            &self.config.spec.app.bind_host,
            self.config.spec.app.port,
            self.config.spec.receiver.as_ref().map(|r| r.port),
        )
    }

    async fn interruptible<T>(&self, work: impl Future<Output = DeployResult<T>>) -> DeployResult<T> {
        tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => Err(DeployError::Interrupted),
            result = work => result,
        }
    }
}

fn outcome_label(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Done => "done",
        RunOutcome::RerunRequired => "rerun_required",
        RunOutcome::Failed { .. } => "failed",
        RunOutcome::RolledBack { .. } => "rolled_back",
        RunOutcome::RollbackFailed { .. } => "rollback_failed",
        RunOutcome::Unhealthy { .. } => "unhealthy",
    }
}
