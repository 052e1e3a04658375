// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Service Launcher
//!
//! Native mode: reclaim the port, spawn the command detached from bringup's
//! own lifetime, then poll the readiness probe within a bounded timeout.
//! When the service's init unit is installed it is stopped before the port
//! is reclaimed, and in `native_with_init_manager` mode the unit itself is
//! started instead of a detached copy.
//!
//! Container mode: the compose project is brought up and the runtime's own
//! health state is polled with the same bounded discipline, followed by the
//! service's readiness probe on its published port.
//!
//! Every launched handle is persisted immediately so `stop`, `status` and a
//! rollback can find it even when the run dies half-way. A persisted pid is
//! only signalled while its start time still matches.

use crate::application::autostart::InitUnits;
use crate::application::backup::RunningServices;
use crate::application::ports::PortReclaimer;
use crate::domain::config::ContainerConfig;
use crate::domain::error::{DeployError, DeployResult};
use crate::domain::profile::DeploymentMode;
use crate::domain::service::{ReadinessState, ServiceHandle, ServiceSpec, ServiceTarget};
use crate::infrastructure::container::{ContainerReadiness, ContainerRuntime};
use crate::infrastructure::probe::ReadinessProbe;
use crate::infrastructure::process;
use crate::infrastructure::retry::{retry, RetryError, RetryPolicy};
use crate::infrastructure::state_store::StateStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Liveness and readiness of one persisted handle, for `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub handle: ServiceHandle,
    pub alive: bool,
    pub ready: bool,
    pub detail: Option<String>,
}

pub struct ServiceLauncher {
    reclaimer: PortReclaimer,
    probe: Arc<dyn ReadinessProbe>,
    containers: Arc<dyn ContainerRuntime>,
    store: StateStore,
    container_config: ContainerConfig,
    working_dir: PathBuf,
    probe_host: String,
    readiness: RetryPolicy,
    stop_grace: Duration,
    init_units: Option<InitUnits>,
    cancel: CancellationToken,
}

#[allow(clippy::too_many_arguments)]
impl ServiceLauncher {
    pub fn new(
        reclaimer: PortReclaimer,
        probe: Arc<dyn ReadinessProbe>,
        containers: Arc<dyn ContainerRuntime>,
        store: StateStore,
        container_config: ContainerConfig,
        working_dir: impl Into<PathBuf>,
        probe_host: impl Into<String>,
        readiness: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reclaimer,
            probe,
            containers,
            store,
            container_config,
            working_dir: working_dir.into(),
            probe_host: probe_host.into(),
            readiness,
            stop_grace: Duration::from_secs(10),
            init_units: None,
            cancel,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_init_units(mut self, units: InitUnits) -> Self {
        self.init_units = Some(units);
        self
    }

    pub fn reclaimer(&self) -> &PortReclaimer {
        &self.reclaimer
    }

    /// Launch one service in `mode`.
    pub async fn launch(&self, mode: DeploymentMode, spec: &ServiceSpec) -> DeployResult<ServiceHandle> {
        if mode.is_container() {
            let mut handles = self.launch_containers(mode, std::slice::from_ref(spec)).await?;
            return handles.pop().ok_or_else(|| DeployError::ServiceStart {
                service: spec.name.clone(),
                reason: "compose project started no containers".to_string(),
            });
        }
        self.launch_native(mode, spec).await
    }

    /// Units bringup may drive: installed and reachable through `systemctl`.
    fn managed_unit(&self, unit: &str) -> Option<&InitUnits> {
        self.init_units.as_ref().filter(|units| units.installed(unit))
    }

    async fn launch_native(&self, mode: DeploymentMode, spec: &ServiceSpec) -> DeployResult<ServiceHandle> {
        // An installed unit would restart its copy onto the port we reclaim.
        let managed = self.managed_unit(&spec.unit);
        if let Some(units) = managed {
            units.stop(&spec.unit).await?;
        }
        self.reclaimer.ensure_free(spec.port).await?;

        let log_path = self.store.service_log_path(&spec.name);
        let pid = match managed {
            Some(units) if mode == DeploymentMode::NativeWithInitManager => {
                units.restart(&spec.unit).await?
            }
            _ => process::spawn_detached(
                &spec.command,
                &self.working_dir,
                &log_path,
                &[("PORT", spec.port.to_string())],
            )?,
        };

        let mut handle = ServiceHandle {
            name: spec.name.clone(),
            target: ServiceTarget::Process(pid),
            bound_port: spec.port,
            readiness_state: ReadinessState::Starting,
            probe: spec.probe.clone(),
            log_path: Some(log_path.clone()),
            started_at: process::start_time(pid),
            unit: Some(spec.unit.clone()),
        };
        self.record(&handle)?;

        // A child token lets the poll loop stop early when the process dies.
        let exited = self.cancel.child_token();
        let result = retry(self.readiness, &exited, |_| {
            let exited = exited.clone();
            let probe = spec.probe.clone();
            async move {
                if !process::process_exists(pid) {
                    exited.cancel();
                    return Err("process exited".to_string());
                }
                self.probe.probe(&self.probe_host, spec.port, &probe).await
            }
        })
        .await;

        match result {
            Ok(()) => {
                handle.readiness_state = ReadinessState::Ready;
                self.record(&handle)?;
                info!(service = %spec.name, pid, port = spec.port, "Service ready");
                Ok(handle)
            }
            Err(RetryError::Cancelled) if self.cancel.is_cancelled() => {
                self.abandon(&mut handle).await;
                Err(DeployError::Interrupted)
            }
            Err(e) => {
                let reason = match e {
                    RetryError::Cancelled => "process exited before becoming ready".to_string(),
                    RetryError::Exhausted { attempts, last } => {
                        format!("not ready after {} probes: {}", attempts, last)
                    }
                };
                error!(service = %spec.name, pid, "{}", reason);
                self.abandon(&mut handle).await;
                Err(DeployError::ServiceStart {
                    service: spec.name.clone(),
                    reason: format!("{}\n--- last log lines ---\n{}", reason, log_tail(&log_path, 20)),
                })
            }
        }
    }

    /// Bring the compose project for `mode` up and wait until every container
    /// and every spec's probe is ready. Returns one handle per spec.
    pub async fn launch_containers(
        &self,
        mode: DeploymentMode,
        specs: &[ServiceSpec],
    ) -> DeployResult<Vec<ServiceHandle>> {
        let compose_file = self.compose_file(mode);
        let project = self.container_config.project_name.as_deref();

        // Tear down our own previous project first so its published ports
        // are not mistaken for stale holders.
        if let Err(e) = self.containers.down(&compose_file, project, &self.working_dir).await {
            warn!("Previous compose project could not be stopped: {}", e);
        }
        for spec in specs {
            self.reclaimer.ensure_free(spec.port).await?;
        }

        let ids = self.containers.up(&compose_file, project, &self.working_dir).await?;
        if ids.is_empty() {
            return Err(DeployError::ServiceStart {
                service: compose_file.display().to_string(),
                reason: "compose project started no containers".to_string(),
            });
        }

        let mut handles: Vec<ServiceHandle> = specs
            .iter()
            .map(|spec| ServiceHandle {
                name: spec.name.clone(),
                target: ServiceTarget::Container(ids.join(",")),
                bound_port: spec.port,
                readiness_state: ReadinessState::Starting,
                probe: spec.probe.clone(),
                log_path: None,
                started_at: None,
                unit: None,
            })
            .collect();
        for handle in &handles {
            self.record(handle)?;
        }

        let containers_ready = retry(self.readiness, &self.cancel, |_| {
            let ids = ids.clone();
            async move {
                for id in &ids {
                    match self.containers.readiness(id).await.map_err(|e| e.to_string())? {
                        ContainerReadiness::Ready => {}
                        ContainerReadiness::Starting => return Err(format!("{} starting", short(id))),
                        ContainerReadiness::Failed(reason) => {
                            return Err(format!("{}: {}", short(id), reason))
                        }
                    }
                }
                Ok(())
            }
        })
        .await;
        self.readiness_result(containers_ready, &compose_file.display().to_string())?;

        for handle in &mut handles {
            let probe = handle.probe.clone();
            let port = handle.bound_port;
            let ready = retry(self.readiness, &self.cancel, |_| {
                let probe = probe.clone();
                async move { self.probe.probe(&self.probe_host, port, &probe).await }
            })
            .await;
            self.readiness_result(ready, &handle.name)?;
            handle.readiness_state = ReadinessState::Ready;
            self.record(handle)?;
            info!(service = %handle.name, port, "Containerized service ready");
        }

        Ok(handles)
    }

    fn readiness_result(&self, result: Result<(), RetryError<String>>, service: &str) -> DeployResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Cancelled) => Err(DeployError::Interrupted),
            Err(RetryError::Exhausted { attempts, last }) => Err(DeployError::ServiceStart {
                service: service.to_string(),
                reason: format!("not ready after {} checks: {}", attempts, last),
            }),
        }
    }

    pub fn compose_file(&self, mode: DeploymentMode) -> PathBuf {
        let file = match (mode, &self.container_config.minimal_compose_file) {
            (DeploymentMode::ContainerMinimal, Some(minimal)) => minimal,
            _ => &self.container_config.compose_file,
        };
        if file.is_absolute() {
            file.clone()
        } else {
            self.working_dir.join(file)
        }
    }

    /// Stop one handle: the installed init unit first, then SIGTERM → bounded
    /// wait → SIGKILL for a process that is still the one recorded. Containers
    /// get a runtime stop.
    pub async fn stop(&self, handle: &ServiceHandle) -> DeployResult<()> {
        match &handle.target {
            ServiceTarget::Process(pid) => {
                if let Some(unit) = handle.unit.as_deref() {
                    if let Some(units) = self.managed_unit(unit) {
                        units.stop(unit).await?;
                    }
                }
                let pid = *pid;
                if !process::process_exists(pid) {
                    info!(service = %handle.name, pid, "Service already stopped");
                } else if !process::is_same_process(pid, handle.started_at) {
                    warn!(
                        service = %handle.name,
                        pid,
                        "Pid no longer belongs to the service; leaving it alone"
                    );
                } else {
                    let killed = process::terminate(pid, self.stop_grace).await?;
                    info!(service = %handle.name, pid, killed, "Service stopped");
                }
            }
            ServiceTarget::Container(ids) => {
                for id in ids.split(',').filter(|id| !id.is_empty()) {
                    self.containers.stop_container(id).await?;
                }
                info!(service = %handle.name, "Containers stopped");
            }
        }
        Ok(())
    }

    /// Liveness and a single readiness probe for each persisted handle.
    pub async fn status(&self) -> DeployResult<Vec<ServiceStatus>> {
        let mut statuses = Vec::new();
        for handle in self.store.load_handles()? {
            let (alive, detail) = match &handle.target {
                ServiceTarget::Process(pid) => {
                    let alive = process::is_same_process(*pid, handle.started_at);
                    let detail = (!alive && process::process_exists(*pid))
                        .then(|| format!("pid {} now belongs to another process", pid));
                    (alive, detail)
                }
                ServiceTarget::Container(ids) => {
                    let mut alive = true;
                    let mut detail = None;
                    for id in ids.split(',').filter(|id| !id.is_empty()) {
                        match self.containers.readiness(id).await {
                            Ok(ContainerReadiness::Failed(reason)) => {
                                alive = false;
                                detail = Some(reason);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                alive = false;
                                detail = Some(e.to_string());
                            }
                        }
                    }
                    (alive, detail)
                }
            };
            let probe = self
                .probe
                .probe(&self.probe_host, handle.bound_port, &handle.probe)
                .await;
            statuses.push(ServiceStatus {
                ready: probe.is_ok(),
                detail: detail.or(probe.err()),
                alive,
                handle,
            });
        }
        Ok(statuses)
    }

    /// Add or replace a handle in the persisted set.
    pub fn record(&self, handle: &ServiceHandle) -> DeployResult<()> {
        let mut handles = self.store.load_handles()?;
        handles.retain(|h| h.name != handle.name);
        handles.push(handle.clone());
        self.store.save_handles(&handles)
    }

    /// Tear down a service that never became ready.
    async fn abandon(&self, handle: &mut ServiceHandle) {
        handle.readiness_state = ReadinessState::Failed;
        if let Err(e) = self.stop(handle).await {
            warn!(service = %handle.name, "Failed to stop unready service: {}", e);
        }
        if let Err(e) = self.record(handle) {
            warn!(service = %handle.name, "Failed to record handle: {}", e);
        }
    }
}

#[async_trait]
impl RunningServices for ServiceLauncher {
    async fn stop_all(&self) -> DeployResult<()> {
        let handles = self.store.load_handles()?;
        let mut failures = Vec::new();
        let mut compose_stopped = false;

        for handle in &handles {
            let result = match (&handle.target, self.store.load_profile()) {
                // Containers go down as a project, once.
                (ServiceTarget::Container(_), Ok(Some(record))) if record.mode.is_container() => {
                    if compose_stopped {
                        Ok(())
                    } else {
                        compose_stopped = true;
                        self.containers
                            .down(
                                &self.compose_file(record.mode),
                                self.container_config.project_name.as_deref(),
                                &self.working_dir,
                            )
                            .await
                    }
                }
                _ => self.stop(handle).await,
            };
            if let Err(e) = result {
                warn!(service = %handle.name, "Failed to stop: {}", e);
                failures.push(format!("{}: {}", handle.name, e));
            }
        }

        if failures.is_empty() {
            self.store.clear_handles()?;
            Ok(())
        } else {
            Err(DeployError::State(format!(
                "could not stop {}",
                failures.join("; ")
            )))
        }
    }
}

fn short(id: &str) -> &str {
    &id[..id.len().min(12)]
}

fn log_tail(path: &Path, lines: usize) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let collected: Vec<&str> = content.lines().collect();
            collected[collected.len().saturating_sub(lines)..].join("\n")
        }
        Err(_) => "(no log output)".to_string(),
    }
}
