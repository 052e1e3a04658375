// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

// Deployment Configuration Types
//
// Defines the configuration schema for a bringup deployment, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Application and auxiliary receiver launch commands
// - Backup sources, readiness and retry budgets
// - External collaborator commands (packages, migrations, static assets, tunnel)
// - Autostart channel settings

use crate::domain::service::{ProbeKind, ServiceSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "bringup.dev/v1";
pub const KIND: &str = "DeployConfig";
pub const CONFIG_ENV_VAR: &str = "BRINGUP_CONFIG_PATH";

/// Annotated sample written by `bringup config generate`.
pub const SAMPLE_CONFIG: &str = include_str!("../../templates/bringup.yaml");

/// Top-level Kubernetes-style deployment manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfigManifest {
    /// API version (must be "bringup.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "DeployConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: DeploySpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable deployment name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySpec {
    pub app: AppConfig,

    /// Auxiliary network daemon (DICOM receiver). Absent = not deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<ReceiverConfig>,

    #[serde(default)]
    pub container: ContainerConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub ports: PortReclaimConfig,

    /// Well-known host:port pairs probed for internet reachability
    #[serde(default = "default_network_probes")]
    pub network_probes: Vec<String>,

    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    /// Optional external test-suite command run during preflight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_hook: Option<String>,

    #[serde(default)]
    pub autostart: AutostartConfig,

    /// Root for persisted state (profile, handles, backups, reports).
    /// Default: `<working_dir>/.bringup`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Service name, also used for unit and init script names
    pub name: String,

    /// Directory the application is launched from
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Launch command; `{{PORT}}` is replaced with `port`
    #[serde(default = "default_web_command")]
    pub command: String,

    #[serde(default = "default_web_port")]
    pub port: u16,

    /// Address the application listens on (reported as access point)
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// HTTP path used as the readiness probe
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Language runtime binary that native modes require
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// OS packages providing the runtime
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default = "default_receiver_name")]
    pub name: String,

    /// Launch command; `{{PORT}}` is replaced with `port`
    pub command: String,

    #[serde(default = "default_receiver_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Compose file for `container_full`
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,

    /// Compose file for `container_minimal`; falls back to `compose_file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimal_compose_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Dump tool; database backup is skipped when it is not on PATH
    #[serde(default = "default_dump_tool")]
    pub dump_tool: String,

    /// Tool that replays the dump file during restore
    #[serde(default = "default_restore_tool")]
    pub restore_tool: String,

    /// Environment variable holding the database connection string
    #[serde(default = "default_database_url_env")]
    pub database_url_env: String,

    /// Configuration files to capture (relative to working_dir)
    #[serde(default = "default_config_paths")]
    pub config_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(with = "humantime_serde", default = "default_readiness_timeout")]
    pub timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_readiness_interval")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_attempts")]
    pub attempts: u32,

    #[serde(with = "humantime_serde", default = "default_health_backoff")]
    pub backoff: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortReclaimConfig {
    #[serde(default = "default_reclaim_attempts")]
    pub attempts: u32,

    /// Wait after each terminate signal before re-checking
    #[serde(with = "humantime_serde", default = "default_reclaim_grace")]
    pub grace: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Package install command; `{{PACKAGES}}` is replaced with the list.
    /// Default: derived from the detected package manager
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_packages: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_static: Option<String>,

    /// Tunnel command; `{{PORT}}` is replaced with the web port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose: Option<String>,

    /// Local API polled for the tunnel's public URL
    #[serde(default = "default_tunnel_api")]
    pub tunnel_api: String,

    /// Upper bound for any single collaborator command
    #[serde(with = "humantime_serde", default = "default_collaborator_timeout")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutostartConfig {
    /// Unit / init script name. Default: app name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,

    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    #[serde(default = "default_init_dir")]
    pub init_dir: PathBuf,

    /// Delay before the reboot task launches the service
    #[serde(with = "humantime_serde", default = "default_reboot_delay")]
    pub reboot_delay: Duration,

    /// Shell startup files (relative to $HOME) that receive the login hook
    #[serde(default = "default_login_files")]
    pub login_files: Vec<PathBuf>,
}

// Default value functions
fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_web_command() -> String {
    "python3 manage.py runserver 0.0.0.0:{{PORT}}".to_string()
}

fn default_web_port() -> u16 {
    8000
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_path() -> String {
    "/health/".to_string()
}

fn default_runtime() -> String {
    "python3".to_string()
}

fn default_packages() -> Vec<String> {
    vec![
        "python3".to_string(),
        "python3-pip".to_string(),
        "python3-venv".to_string(),
    ]
}

fn default_receiver_name() -> String {
    "dicom-receiver".to_string()
}

fn default_receiver_port() -> u16 {
    11112
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_dump_tool() -> String {
    "pg_dump".to_string()
}

fn default_restore_tool() -> String {
    "psql".to_string()
}

fn default_database_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn default_config_paths() -> Vec<PathBuf> {
    vec![PathBuf::from(".env"), PathBuf::from("db.sqlite3")]
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_readiness_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_health_attempts() -> u32 {
    5
}

fn default_health_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_reclaim_attempts() -> u32 {
    5
}

fn default_reclaim_grace() -> Duration {
    Duration::from_secs(2)
}

fn default_network_probes() -> Vec<String> {
    vec![
        "8.8.8.8:53".to_string(),
        "1.1.1.1:53".to_string(),
        "pypi.org:443".to_string(),
    ]
}

fn default_tunnel_api() -> String {
    "http://127.0.0.1:4040/api/tunnels".to_string()
}

fn default_collaborator_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_init_dir() -> PathBuf {
    PathBuf::from("/etc/init.d")
}

fn default_reboot_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_login_files() -> Vec<PathBuf> {
    vec![PathBuf::from(".bashrc"), PathBuf::from(".profile")]
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            compose_file: default_compose_file(),
            minimal_compose_file: None,
            project_name: None,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dump_tool: default_dump_tool(),
            restore_tool: default_restore_tool(),
            database_url_env: default_database_url_env(),
            config_paths: default_config_paths(),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: default_readiness_timeout(),
            interval: default_readiness_interval(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            attempts: default_health_attempts(),
            backoff: default_health_backoff(),
        }
    }
}

impl Default for PortReclaimConfig {
    fn default() -> Self {
        Self {
            attempts: default_reclaim_attempts(),
            grace: default_reclaim_grace(),
        }
    }
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            ensure_packages: None,
            migrate: Some("python3 manage.py migrate --noinput".to_string()),
            collect_static: Some("python3 manage.py collectstatic --noinput".to_string()),
            expose: None,
            tunnel_api: default_tunnel_api(),
            timeout: default_collaborator_timeout(),
        }
    }
}

impl Default for AutostartConfig {
    fn default() -> Self {
        Self {
            unit_name: None,
            unit_dir: default_unit_dir(),
            init_dir: default_init_dir(),
            reboot_delay: default_reboot_delay(),
            login_files: default_login_files(),
        }
    }
}

impl Default for DeploySpec {
    fn default() -> Self {
        Self {
            app: AppConfig {
                name: "webapp".to_string(),
                working_dir: default_working_dir(),
                command: default_web_command(),
                port: default_web_port(),
                bind_host: default_bind_host(),
                health_path: default_health_path(),
                runtime: default_runtime(),
                packages: default_packages(),
            },
            receiver: Some(ReceiverConfig {
                name: default_receiver_name(),
                command: "python3 dicom_receiver.py --port {{PORT}}".to_string(),
                port: default_receiver_port(),
            }),
            container: ContainerConfig::default(),
            backup: BackupConfig::default(),
            readiness: ReadinessConfig::default(),
            health: HealthConfig::default(),
            ports: PortReclaimConfig::default(),
            network_probes: default_network_probes(),
            collaborators: CollaboratorConfig::default(),
            test_hook: None,
            autostart: AutostartConfig::default(),
            state_dir: None,
        }
    }
}

impl Default for DeployConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "bringup-host".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: DeploySpec::default(),
        }
    }
}

impl DeployConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. BRINGUP_CONFIG_PATH environment variable
    /// 2. ./bringup.yaml (working directory)
    /// 3. ~/.bringup/config.yaml (user home)
    /// 4. /etc/bringup/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./bringup.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".bringup").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/bringup/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            config.absolutize()?;
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            config.absolutize()?;
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            config.absolutize()?;
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env_port("BRINGUP_WEB_PORT") {
            tracing::info!("Environment override: BRINGUP_WEB_PORT={}", port);
            self.spec.app.port = port;
        }

        if let Some(port) = env_port("BRINGUP_RECEIVER_PORT") {
            match self.spec.receiver.as_mut() {
                Some(receiver) => {
                    tracing::info!("Environment override: BRINGUP_RECEIVER_PORT={}", port);
                    receiver.port = port;
                }
                None => tracing::warn!(
                    "BRINGUP_RECEIVER_PORT set but no receiver is configured. Ignoring."
                ),
            }
        }

        if let Ok(dir) = std::env::var("BRINGUP_STATE_DIR") {
            tracing::info!("Environment override: BRINGUP_STATE_DIR={}", dir);
            self.spec.state_dir = Some(PathBuf::from(dir));
        }
    }

    /// Anchor relative working and state directories at the current
    /// directory. Autostart entries and persisted handles outlive this process.
    pub fn absolutize(&mut self) -> anyhow::Result<()> {
        self.spec.app.working_dir = std::path::absolute(&self.spec.app.working_dir)?;
        if let Some(dir) = self.spec.state_dir.as_mut() {
            *dir = std::path::absolute(&*dir)?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let app = &self.spec.app;
        if app.name.is_empty() {
            anyhow::bail!("spec.app.name cannot be empty");
        }
        if app.command.trim().is_empty() {
            anyhow::bail!("spec.app.command cannot be empty");
        }
        if app.port == 0 {
            anyhow::bail!("spec.app.port must be non-zero");
        }
        if !app.health_path.starts_with('/') {
            anyhow::bail!("spec.app.health_path must start with '/': {}", app.health_path);
        }

        if let Some(receiver) = &self.spec.receiver {
            if receiver.command.trim().is_empty() {
                anyhow::bail!("spec.receiver.command cannot be empty");
            }
            if receiver.port == 0 {
                anyhow::bail!("spec.receiver.port must be non-zero");
            }
            if receiver.port == app.port {
                anyhow::bail!(
                    "spec.receiver.port ({}) collides with spec.app.port",
                    receiver.port
                );
            }
        }

        if self.spec.ports.attempts == 0 {
            anyhow::bail!("spec.ports.attempts must be at least 1");
        }
        if self.spec.health.attempts == 0 {
            anyhow::bail!("spec.health.attempts must be at least 1");
        }
        if self.spec.readiness.interval.is_zero() || self.spec.readiness.timeout.is_zero() {
            anyhow::bail!("spec.readiness timeout and interval must be non-zero");
        }

        for probe in &self.spec.network_probes {
            if probe.rsplit_once(':').and_then(|(_, p)| p.parse::<u16>().ok()).is_none() {
                anyhow::bail!("Network probe must be host:port, got '{}'", probe);
            }
        }

        Ok(())
    }

    /// Name used for the unit file, init script and reboot task marker.
    pub fn unit_name(&self) -> String {
        self.spec
            .autostart
            .unit_name
            .clone()
            .unwrap_or_else(|| self.spec.app.name.clone())
    }

    pub fn working_dir(&self) -> &Path {
        &self.spec.app.working_dir
    }

    /// Resolve a path relative to the application working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.spec.app.working_dir.join(path)
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.spec
            .state_dir
            .clone()
            .unwrap_or_else(|| self.spec.app.working_dir.join(".bringup"))
    }

    pub fn web_service(&self) -> ServiceSpec {
        let app = &self.spec.app;
        ServiceSpec {
            name: app.name.clone(),
            command: substitute_port(&app.command, app.port),
            port: app.port,
            probe: ProbeKind::Http {
                path: app.health_path.clone(),
            },
            unit: self.unit_name(),
        }
    }

    pub fn receiver_service(&self) -> Option<ServiceSpec> {
        self.spec.receiver.as_ref().map(|receiver| ServiceSpec {
            name: receiver.name.clone(),
            command: substitute_port(&receiver.command, receiver.port),
            port: receiver.port,
            probe: ProbeKind::Tcp,
            unit: format!("{}-{}", self.unit_name(), receiver.name),
        })
    }
}

fn substitute_port(command: &str, port: u16) -> String {
    command.replace("{{PORT}}", &port.to_string())
}

fn env_port(var: &str) -> Option<u16> {
    let val = std::env::var(var).ok()?;
    match val.parse::<u16>() {
        Ok(port) if port != 0 => Some(port),
        _ => {
            tracing::warn!("Invalid value for {}: '{}'. Expected a port. Ignoring.", var, val);
            None
        }
    }
}
