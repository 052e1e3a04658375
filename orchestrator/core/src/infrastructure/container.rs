// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Container runtime
//!
//! `up`/`down` go through the compose CLI; readiness is read from the
//! Docker API so the runtime's own health check decides when a container is
//! ready.

use crate::domain::error::{DeployError, DeployResult};
use crate::infrastructure::command::{shell_quote, CommandRunner};
use async_trait::async_trait;
use bollard::models::{ContainerStateStatusEnum, HealthStatusEnum};
use bollard::query_parameters::{InspectContainerOptions, StopContainerOptions};
use bollard::Docker;
use std::path::Path;
use tracing::{debug, info};

/// Readiness as reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerReadiness {
    Ready,
    Starting,
    Failed(String),
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the compose command is installed and the daemon answers.
    async fn available(&self) -> bool;

    /// Bring the compose project up detached; returns the container ids.
    async fn up(&self, compose_file: &Path, project: Option<&str>, work_dir: &Path)
        -> DeployResult<Vec<String>>;

    async fn readiness(&self, container_id: &str) -> DeployResult<ContainerReadiness>;

    /// Tear the compose project down. Idempotent.
    async fn down(&self, compose_file: &Path, project: Option<&str>, work_dir: &Path)
        -> DeployResult<()>;

    async fn stop_container(&self, container_id: &str) -> DeployResult<()>;
}

pub struct ComposeRuntime {
    docker: Option<Docker>,
    runner: CommandRunner,
    compose: (String, Vec<String>),
}

impl ComposeRuntime {
    pub fn new(runner: CommandRunner) -> Self {
        let docker = match Docker::connect_with_local_defaults() {
            Ok(docker) => Some(docker),
            Err(e) => {
                debug!("Docker API unavailable: {}", e);
                None
            }
        };
        Self {
            docker,
            runner,
            compose: detect_compose_command(),
        }
    }

    fn compose_args<'a>(
        &'a self,
        compose_file: &'a str,
        project: Option<&'a str>,
        tail: &[&'a str],
    ) -> Vec<&'a str> {
        let mut args: Vec<&str> = self.compose.1.iter().map(String::as_str).collect();
        args.extend(["-f", compose_file]);
        if let Some(project) = project {
            args.extend(["-p", project]);
        }
        args.extend_from_slice(tail);
        args
    }

    fn docker(&self) -> DeployResult<&Docker> {
        self.docker
            .as_ref()
            .ok_or_else(|| DeployError::command("docker", "Docker API is not reachable"))
    }
}

/// Shell line running the compose project in the foreground. Used as the
/// autostart command for container deployments.
pub fn foreground_up_line(compose_file: &Path, project: Option<&str>) -> String {
    let (program, prefix) = detect_compose_command();
    let mut parts = vec![program];
    parts.extend(prefix);
    parts.push("-f".to_string());
    parts.push(shell_quote(&compose_file.to_string_lossy()));
    if let Some(project) = project {
        parts.push("-p".to_string());
        parts.push(shell_quote(project));
    }
    parts.push("up".to_string());
    parts.join(" ")
}

/// Prefer the standalone `docker-compose` binary, else the `docker compose` plugin.
fn detect_compose_command() -> (String, Vec<String>) {
    if which::which("docker-compose").is_ok() {
        ("docker-compose".to_string(), vec![])
    } else {
        ("docker".to_string(), vec!["compose".to_string()])
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn available(&self) -> bool {
        if which::which(&self.compose.0).is_err() {
            debug!(binary = %self.compose.0, "Compose command not installed");
            return false;
        }
        match &self.docker {
            Some(docker) => docker.ping().await.is_ok(),
            None => false,
        }
    }

    async fn up(
        &self,
        compose_file: &Path,
        project: Option<&str>,
        work_dir: &Path,
    ) -> DeployResult<Vec<String>> {
        let file = compose_file.to_string_lossy();
        info!(compose_file = %file, "Starting compose project");

        let args = self.compose_args(&file, project, &["up", "-d", "--build"]);
        let output = self.runner.run(&self.compose.0, &args, Some(work_dir)).await?;
        if !output.success() {
            return Err(DeployError::ServiceStart {
                service: file.into_owned(),
                reason: format!("compose up failed: {}", output.tail(10)),
            });
        }

        let args = self.compose_args(&file, project, &["ps", "-q"]);
        let output = self.runner.run(&self.compose.0, &args, Some(work_dir)).await?;
        let ids: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        info!(containers = ids.len(), "Compose project is up");
        Ok(ids)
    }

    async fn readiness(&self, container_id: &str) -> DeployResult<ContainerReadiness> {
        let inspect = self
            .docker()?
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| DeployError::command(format!("inspect {}", container_id), e.to_string()))?;

        let Some(state) = inspect.state else {
            return Ok(ContainerReadiness::Starting);
        };

        match state.status {
            Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
                return Ok(ContainerReadiness::Failed(format!(
                    "container exited with code {}",
                    state.exit_code.unwrap_or_default()
                )));
            }
            Some(ContainerStateStatusEnum::RUNNING) => {}
            _ => return Ok(ContainerReadiness::Starting),
        }

        // Running: defer to the image's health check when it has one.
        let health = state.health.and_then(|h| h.status);
        Ok(match health {
            Some(HealthStatusEnum::HEALTHY) => ContainerReadiness::Ready,
            Some(HealthStatusEnum::UNHEALTHY) => {
                ContainerReadiness::Failed("health check reports unhealthy".to_string())
            }
            Some(HealthStatusEnum::STARTING) => ContainerReadiness::Starting,
            _ => ContainerReadiness::Ready,
        })
    }

    async fn down(
        &self,
        compose_file: &Path,
        project: Option<&str>,
        work_dir: &Path,
    ) -> DeployResult<()> {
        let file = compose_file.to_string_lossy();
        let args = self.compose_args(&file, project, &["down"]);
        let output = self.runner.run(&self.compose.0, &args, Some(work_dir)).await?;
        if !output.success() {
            return Err(DeployError::command(
                format!("{} {}", self.compose.0, args.join(" ")),
                output.tail(5),
            ));
        }
        info!(compose_file = %file, "Compose project is down");
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> DeployResult<()> {
        self.docker()?
            .stop_container(container_id, None::<StopContainerOptions>)
            .await
            .map_err(|e| DeployError::command(format!("stop {}", container_id), e.to_string()))
    }
}
