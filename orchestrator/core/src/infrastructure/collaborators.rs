// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! External collaborators
//!
//! Package installation, migrations, static asset collection and public
//! exposure are opaque side-effecting calls. [`ShellCollaborators`] runs the
//! configured shell commands; tests substitute their own implementation.

use crate::domain::config::CollaboratorConfig;
use crate::domain::error::{DeployError, DeployResult};
use crate::infrastructure::command::{shell_quote, CommandRunner};
use crate::infrastructure::process;
use crate::infrastructure::retry::{retry, RetryPolicy};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Result of exposing the web port publicly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exposure {
    pub public_url: String,
    /// Tunnel process, when the collaborator spawned one.
    pub pid: Option<u32>,
}

#[async_trait]
pub trait Collaborators: Send + Sync {
    async fn ensure_packages(&self, packages: &[String]) -> DeployResult<()>;

    async fn run_migrations(&self) -> DeployResult<()>;

    async fn collect_static_assets(&self) -> DeployResult<()>;

    /// `Ok(None)` when no exposure mechanism is configured.
    async fn expose(&self, port: u16) -> DeployResult<Option<Exposure>>;
}

/// Package managers the profiler can detect, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Pacman,
    Apk,
    Zypper,
}

impl PackageManager {
    const ALL: [PackageManager; 6] = [
        Self::Apt,
        Self::Dnf,
        Self::Yum,
        Self::Pacman,
        Self::Apk,
        Self::Zypper,
    ];

    pub fn binary(&self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Pacman => "pacman",
            Self::Apk => "apk",
            Self::Zypper => "zypper",
        }
    }

    pub fn detect() -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|pm| which::which(pm.binary()).is_ok())
    }

    /// Non-interactive install line; `{{PACKAGES}}` is substituted later.
    pub fn install_template(&self) -> &'static str {
        match self {
            Self::Apt => "apt-get update -qq && apt-get install -y -qq {{PACKAGES}}",
            Self::Dnf => "dnf install -y -q {{PACKAGES}}",
            Self::Yum => "yum install -y -q {{PACKAGES}}",
            Self::Pacman => "pacman -Sy --noconfirm --needed {{PACKAGES}}",
            Self::Apk => "apk add --no-cache {{PACKAGES}}",
            Self::Zypper => "zypper --non-interactive install {{PACKAGES}}",
        }
    }
}

pub struct ShellCollaborators {
    config: CollaboratorConfig,
    working_dir: PathBuf,
    log_dir: PathBuf,
    runner: CommandRunner,
    package_manager: Option<PackageManager>,
    use_sudo: bool,
    client: reqwest::Client,
    tunnel_policy: RetryPolicy,
}

impl ShellCollaborators {
    pub fn new(
        config: CollaboratorConfig,
        working_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
        runner: CommandRunner,
    ) -> Self {
        let runner = runner.with_timeout(config.timeout);
        Self {
            config,
            working_dir: working_dir.into(),
            log_dir: log_dir.into(),
            runner,
            package_manager: PackageManager::detect(),
            use_sudo: process::effective_uid() != 0,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(3))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            tunnel_policy: RetryPolicy::new(15, Duration::from_secs(2)),
        }
    }

    pub fn with_tunnel_policy(mut self, policy: RetryPolicy) -> Self {
        self.tunnel_policy = policy;
        self
    }

    fn install_line(&self, packages: &[String]) -> DeployResult<String> {
        let list = packages
            .iter()
            .map(|p| shell_quote(p))
            .collect::<Vec<_>>()
            .join(" ");

        if let Some(custom) = &self.config.ensure_packages {
            return Ok(custom.replace("{{PACKAGES}}", &list));
        }
        let Some(pm) = self.package_manager else {
            return Err(DeployError::collaborator(
                "ensure_packages",
                "no supported package manager found",
            ));
        };
        let line = pm.install_template().replace("{{PACKAGES}}", &list);
        if self.use_sudo {
            Ok(format!("sudo -n sh -c {}", shell_quote(&line)))
        } else {
            Ok(line)
        }
    }

    async fn run_configured(&self, operation: &str, line: Option<&String>) -> DeployResult<()> {
        let Some(line) = line else {
            info!(operation, "No command configured, skipping");
            return Ok(());
        };
        info!(operation, command = %line, "Running collaborator");
        self.runner
            .run_shell_checked(line, Some(&self.working_dir))
            .await
            .map(|_| ())
            .map_err(|e| match e {
                DeployError::Interrupted => e,
                other => DeployError::collaborator(operation, other.to_string()),
            })
    }
}

#[async_trait]
impl Collaborators for ShellCollaborators {
    async fn ensure_packages(&self, packages: &[String]) -> DeployResult<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let line = self.install_line(packages)?;
        self.run_configured("ensure_packages", Some(&line)).await
    }

    async fn run_migrations(&self) -> DeployResult<()> {
        self.run_configured("run_migrations", self.config.migrate.as_ref()).await
    }

    async fn collect_static_assets(&self) -> DeployResult<()> {
        self.run_configured("collect_static_assets", self.config.collect_static.as_ref())
            .await
    }

    async fn expose(&self, port: u16) -> DeployResult<Option<Exposure>> {
        let Some(template) = &self.config.expose else {
            return Ok(None);
        };
        let line = template.replace("{{PORT}}", &port.to_string());
        let log_path = self.log_dir.join("tunnel.log");
        let pid = process::spawn_detached(&line, &self.working_dir, &log_path, &[])?;

        let public_url = discover_public_url(
            &self.client,
            &self.config.tunnel_api,
            self.tunnel_policy,
            self.runner.cancel_token(),
        )
        .await
        .map_err(|e| {
            let _ = process::signal_group(pid, process::SIGTERM);
            DeployError::collaborator("expose", e)
        })?;

        info!(port, url = %public_url, "Public URL available");
        Ok(Some(Exposure {
            public_url,
            pid: Some(pid),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<Tunnel>,
}

#[derive(Debug, Deserialize)]
struct Tunnel {
    public_url: String,
}

/// Poll the tunnel agent's local API until it reports a public URL.
/// HTTPS URLs are preferred over plain HTTP.
pub async fn discover_public_url(
    client: &reqwest::Client,
    api_url: &str,
    policy: RetryPolicy,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<String, String> {
    retry(policy, cancel, |_| async move {
        let list: TunnelList = client
            .get(api_url)
            .send()
            .await
            .map_err(|e| format!("tunnel API unreachable: {}", e))?
            .json()
            .await
            .map_err(|e| format!("tunnel API answered garbage: {}", e))?;

        list.tunnels
            .iter()
            .find(|t| t.public_url.starts_with("https://"))
            .or_else(|| list.tunnels.first())
            .map(|t| t.public_url.clone())
            .ok_or_else(|| "no tunnel reported yet".to_string())
    })
    .await
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tokio_util::sync::CancellationToken;

    fn collaborators(config: CollaboratorConfig, dir: &Path) -> ShellCollaborators {
        let runner = CommandRunner::new(Duration::from_secs(10), CancellationToken::new());
        let mut c = ShellCollaborators::new(config, dir, dir.join("logs"), runner);
        c.package_manager = Some(PackageManager::Apt);
        c.use_sudo = false;
        c
    }

    #[test]
    fn install_line_quotes_packages() {
        let dir = tempfile::tempdir().unwrap();
        let c = collaborators(CollaboratorConfig::default(), dir.path());
        let line = c
            .install_line(&["python3".to_string(), "python3-pip".to_string()])
            .unwrap();
        assert!(line.ends_with("install -y -qq 'python3' 'python3-pip'"));

        let mut custom = CollaboratorConfig::default();
        custom.ensure_packages = Some("echo {{PACKAGES}}".to_string());
        let c = collaborators(custom, dir.path());
        assert_eq!(c.install_line(&["a".to_string()]).unwrap(), "echo 'a'");
    }

    #[tokio::test]
    async fn failing_migration_is_a_collaborator_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CollaboratorConfig::default();
        config.migrate = Some("echo 'no such table' >&2; exit 1".to_string());
        config.collect_static = Some("touch collected".to_string());
        let c = collaborators(config, dir.path());

        let err = c.run_migrations().await.unwrap_err();
        match err {
            DeployError::Collaborator { operation, reason } => {
                assert_eq!(operation, "run_migrations");
                assert!(reason.contains("no such table"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        c.collect_static_assets().await.unwrap();
        assert!(dir.path().join("collected").exists());
    }

    #[tokio::test]
    async fn unconfigured_expose_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let c = collaborators(CollaboratorConfig::default(), dir.path());
        assert_eq!(c.expose(8000).await.unwrap(), None);
    }

    #[tokio::test]
    async fn tunnel_discovery_prefers_https() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tunnels")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"tunnels":[{"public_url":"http://abc.ngrok.io"},{"public_url":"https://abc.ngrok.io"}]}"#,
            )
            .create_async()
            .await;

        let url = discover_public_url(
            &reqwest::Client::new(),
            &format!("{}/api/tunnels", server.url()),
            RetryPolicy::new(2, Duration::from_millis(10)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(url, "https://abc.ngrok.io");
    }

    #[tokio::test]
    async fn tunnel_discovery_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tunnels")
            .with_status(200)
            .with_body(r#"{"tunnels":[]}"#)
            .expect(3)
            .create_async()
            .await;

        let err = discover_public_url(
            &reqwest::Client::new(),
            &format!("{}/api/tunnels", server.url()),
            RetryPolicy::new(3, Duration::from_millis(10)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.contains("no tunnel reported yet"));
        mock.assert_async().await;
    }
}
