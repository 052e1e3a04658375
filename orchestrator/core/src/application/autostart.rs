// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Autostart Registrar
//!
//! Registers a launch command with every relaunch channel the host offers:
//! an init-manager unit, a legacy init script, an `@reboot` crontab entry and
//! a guarded block in the login shell files. Channels are independent: one
//! failing is logged and recorded, the others still run. Every channel reads
//! its current entry before writing, so a second registration is a no-op.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Make the deployed services survive a reboot

use crate::domain::autostart::{AutostartChannel, AutostartRegistration, LaunchScript};
use crate::domain::config::AutostartConfig;
use crate::domain::error::{DeployError, DeployResult};
use crate::domain::profile::SystemProfile;
use crate::infrastructure::command::{shell_quote, CommandOutput, CommandRunner};
use crate::infrastructure::process;
use async_trait::async_trait;
use metrics::counter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const UNIT_TEMPLATE: &str = include_str!("../../templates/bringup.service");
const INIT_TEMPLATE: &str = include_str!("../../templates/bringup.init");

/// One external command the registrar needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    /// Needs root; prefixed with `sudo -n` when the caller is not root.
    pub privileged: bool,
}

impl Invocation {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stdin: None,
            privileged: false,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    fn label(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Host commands used by the registrar (`systemctl`, `crontab`, ...).
#[async_trait]
pub trait SystemCommands: Send + Sync {
    async fn run(&self, invocation: Invocation) -> DeployResult<CommandOutput>;

    /// Whether `program` is on `PATH`.
    fn has(&self, program: &str) -> bool;
}

pub struct HostCommands {
    runner: CommandRunner,
    sudo: bool,
}

impl HostCommands {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            sudo: process::effective_uid() != 0,
        }
    }
}

#[async_trait]
impl SystemCommands for HostCommands {
    async fn run(&self, invocation: Invocation) -> DeployResult<CommandOutput> {
        let mut program = invocation.program.as_str();
        let mut args: Vec<&str> = Vec::new();
        if invocation.privileged && self.sudo {
            args.extend(["-n", program]);
            program = "sudo";
        }
        args.extend(invocation.args.iter().map(String::as_str));

        match invocation.stdin {
            Some(input) => self.runner.run_with_stdin(program, &args, input).await,
            None => self.runner.run(program, &args, None).await,
        }
    }

    fn has(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

pub struct AutostartRegistrar {
    config: AutostartConfig,
    commands: Arc<dyn SystemCommands>,
    home: Option<PathBuf>,
}

impl AutostartRegistrar {
    pub fn new(config: AutostartConfig, commands: Arc<dyn SystemCommands>) -> Self {
        Self {
            config,
            commands,
            home: dirs::home_dir(),
        }
    }

    /// Override the home directory that receives login hooks.
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Register every script through every channel.
    pub async fn register_all(
        &self,
        scripts: &[LaunchScript],
        profile: &SystemProfile,
    ) -> Vec<AutostartRegistration> {
        let mut registrations = Vec::new();
        for script in scripts {
            registrations.extend(self.register(script, profile).await);
        }
        registrations
    }

    /// Register one script through every channel. Never fails: a channel
    /// error becomes a registration with `installed: false`.
    pub async fn register(
        &self,
        script: &LaunchScript,
        profile: &SystemProfile,
    ) -> Vec<AutostartRegistration> {
        let mut registrations = Vec::with_capacity(AutostartChannel::ALL.len());

        for channel in AutostartChannel::ALL {
            let outcome = match channel {
                AutostartChannel::InitUnit => self.init_unit(script, profile).await,
                AutostartChannel::LegacyInitScript => self.legacy_init_script(script, profile).await,
                AutostartChannel::RebootTask => self.reboot_task(script).await,
                AutostartChannel::LoginHook => self.login_hook(script),
            };

            let registration = match outcome {
                Ok(Applied::Written(detail)) => {
                    info!(service = %script.name, %channel, "Autostart entry written");
                    registered(script, channel, true, detail)
                }
                Ok(Applied::Unchanged(detail)) => {
                    debug!(service = %script.name, %channel, "Autostart entry already present");
                    registered(script, channel, false, detail)
                }
                Ok(Applied::NotApplicable(reason)) => {
                    debug!(service = %script.name, %channel, "Channel skipped: {}", reason);
                    AutostartRegistration {
                        service: script.name.clone(),
                        channel,
                        installed: false,
                        newly_written: false,
                        detail: Some(reason),
                    }
                }
                Err(e) => {
                    let e = match e {
                        DeployError::Registration { .. } => e,
                        other => DeployError::Registration {
                            channel,
                            reason: other.to_string(),
                        },
                    };
                    warn!(service = %script.name, %channel, "{}", e);
                    AutostartRegistration {
                        service: script.name.clone(),
                        channel,
                        installed: false,
                        newly_written: false,
                        detail: Some(e.to_string()),
                    }
                }
            };

            counter!(
                "bringup_autostart_registrations_total",
                "channel" => channel.to_string(),
                "installed" => registration.installed.to_string()
            )
            .increment(1);
            registrations.push(registration);
        }

        registrations
    }

    async fn init_unit(&self, script: &LaunchScript, profile: &SystemProfile) -> DeployResult<Applied> {
        if !profile.has_init_manager {
            return Ok(Applied::NotApplicable("no init manager".to_string()));
        }
        if !profile.privilege_level.can_write_system() {
            return Ok(Applied::NotApplicable("needs root or sudo".to_string()));
        }

        let unit = unit_file(&script.name);
        let path = self.config.unit_dir.join(&unit);
        let written = self
            .write_system_file(AutostartChannel::InitUnit, &path, &render_unit(script), 0o644)
            .await?;

        if written {
            self.checked(AutostartChannel::InitUnit, Invocation::new("systemctl", &["daemon-reload"]).privileged())
                .await?;
        }
        self.checked(
            AutostartChannel::InitUnit,
            Invocation::new("systemctl", &["enable", unit.as_str()]).privileged(),
        )
        .await?;

        Ok(Applied::from_write(written, path.display().to_string()))
    }

    async fn legacy_init_script(
        &self,
        script: &LaunchScript,
        profile: &SystemProfile,
    ) -> DeployResult<Applied> {
        if !self.config.init_dir.is_dir() {
            return Ok(Applied::NotApplicable(format!(
                "{} does not exist",
                self.config.init_dir.display()
            )));
        }
        if !profile.privilege_level.can_write_system() {
            return Ok(Applied::NotApplicable("needs root or sudo".to_string()));
        }

        let path = self.config.init_dir.join(&script.name);
        let written = self
            .write_system_file(AutostartChannel::LegacyInitScript, &path, &render_init_script(script), 0o755)
            .await?;

        // Runlevel links are idempotent in both tools.
        let detail = if self.commands.has("update-rc.d") {
            self.checked(
                AutostartChannel::LegacyInitScript,
                Invocation::new("update-rc.d", &[script.name.as_str(), "defaults"]).privileged(),
            )
            .await?;
            path.display().to_string()
        } else if self.commands.has("chkconfig") {
            self.checked(
                AutostartChannel::LegacyInitScript,
                Invocation::new("chkconfig", &["--add", script.name.as_str()]).privileged(),
            )
            .await?;
            path.display().to_string()
        } else {
            format!("{} (no runlevel tool to link it)", path.display())
        };

        Ok(Applied::from_write(written, detail))
    }

    async fn reboot_task(&self, script: &LaunchScript) -> DeployResult<Applied> {
        if !self.commands.has("crontab") {
            return Ok(Applied::NotApplicable("crontab not found".to_string()));
        }

        let listing = self.commands.run(Invocation::new("crontab", &["-l"])).await?;
        let current = if listing.success() {
            listing.stdout
        } else if listing.code == Some(1) {
            // `crontab -l` exits 1 when the user has no crontab yet.
            String::new()
        } else {
            return Err(DeployError::Registration {
                channel: AutostartChannel::RebootTask,
                reason: format!("crontab -l failed: {}", listing.tail(3)),
            });
        };

        let entry = reboot_entry(script, self.config.reboot_delay.as_secs());
        let Some(updated) = replace_line(&current, &script.marker(), &entry) else {
            return Ok(Applied::Unchanged(entry));
        };

        self.checked(
            AutostartChannel::RebootTask,
            Invocation::new("crontab", &["-"]).with_stdin(updated),
        )
        .await?;
        Ok(Applied::Written(entry))
    }

    fn login_hook(&self, script: &LaunchScript) -> DeployResult<Applied> {
        let Some(home) = &self.home else {
            return Ok(Applied::NotApplicable("no home directory".to_string()));
        };
        if self.config.login_files.is_empty() {
            return Ok(Applied::NotApplicable("no login files configured".to_string()));
        }

        let block = login_block(script);
        let mut written = false;
        let mut files = Vec::new();

        for relative in &self.config.login_files {
            let path = home.join(relative);
            let current = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(registration_error(AutostartChannel::LoginHook, &path, e)),
            };
            if let Some(updated) = replace_block(&current, &block, &script.marker(), &end_marker(script)) {
                std::fs::write(&path, updated)
                    .map_err(|e| registration_error(AutostartChannel::LoginHook, &path, e))?;
                written = true;
            }
            files.push(path.display().to_string());
        }

        Ok(Applied::from_write(written, files.join(", ")))
    }

    /// Write `content` to a system path unless it already holds exactly that.
    /// Returns whether the file changed.
    async fn write_system_file(
        &self,
        channel: AutostartChannel,
        path: &Path,
        content: &str,
        mode: u32,
    ) -> DeployResult<bool> {
        if std::fs::read_to_string(path).is_ok_and(|existing| existing == content) {
            return Ok(false);
        }

        match std::fs::write(path, content) {
            Ok(()) => {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                    .map_err(|e| registration_error(channel, path, e))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                let target = path.to_string_lossy().into_owned();
                let mode_arg = format!("{:o}", mode);
                self.checked(
                    channel,
                    Invocation::new("tee", &[target.as_str()])
                        .with_stdin(content.as_bytes().to_vec())
                        .privileged(),
                )
                .await?;
                self.checked(
                    channel,
                    Invocation::new("chmod", &[mode_arg.as_str(), target.as_str()]).privileged(),
                )
                .await?;
            }
            Err(e) => return Err(registration_error(channel, path, e)),
        }
        Ok(true)
    }

    async fn checked(&self, channel: AutostartChannel, invocation: Invocation) -> DeployResult<CommandOutput> {
        let label = invocation.label();
        let output = self.commands.run(invocation).await?;
        if !output.success() {
            return Err(DeployError::Registration {
                channel,
                reason: format!("{} exited with {:?}: {}", label, output.code, output.tail(3)),
            });
        }
        Ok(output)
    }
}

/// Start and stop services through the init-manager units the registrar
/// installed, so the init manager and bringup never run competing copies.
pub struct InitUnits {
    commands: Arc<dyn SystemCommands>,
    unit_dir: PathBuf,
}

impl InitUnits {
    pub fn new(commands: Arc<dyn SystemCommands>, unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            commands,
            unit_dir: unit_dir.into(),
        }
    }

    /// Whether `unit` has an installed unit file and `systemctl` can drive it.
    pub fn installed(&self, unit: &str) -> bool {
        self.commands.has("systemctl") && self.unit_dir.join(unit_file(unit)).is_file()
    }

    pub async fn stop(&self, unit: &str) -> DeployResult<()> {
        self.systemctl(&["stop", &unit_file(unit)]).await?;
        info!(unit, "Init unit stopped");
        Ok(())
    }

    /// (Re)start `unit` and return the pid of its main process.
    pub async fn restart(&self, unit: &str) -> DeployResult<u32> {
        self.systemctl(&["restart", &unit_file(unit)]).await?;
        let output = self
            .systemctl(&["show", "-p", "MainPID", "--value", &unit_file(unit)])
            .await?;
        match output.stdout.trim().parse::<u32>() {
            Ok(pid) if pid != 0 => {
                info!(unit, pid, "Init unit started");
                Ok(pid)
            }
            _ => Err(DeployError::command(
                format!("systemctl show {}", unit_file(unit)),
                format!("no main process (MainPID={})", output.stdout.trim()),
            )),
        }
    }

    async fn systemctl(&self, args: &[&str]) -> DeployResult<CommandOutput> {
        let invocation = Invocation::new("systemctl", args).privileged();
        let label = invocation.label();
        let output = self.commands.run(invocation).await?;
        if !output.success() {
            return Err(DeployError::command(
                label,
                format!("exited with {:?}: {}", output.code, output.tail(3)),
            ));
        }
        Ok(output)
    }
}

fn unit_file(unit: &str) -> String {
    format!("{}.service", unit)
}

enum Applied {
    Written(String),
    Unchanged(String),
    NotApplicable(String),
}

impl Applied {
    fn from_write(written: bool, detail: String) -> Self {
        if written {
            Self::Written(detail)
        } else {
            Self::Unchanged(detail)
        }
    }
}

fn registered(
    script: &LaunchScript,
    channel: AutostartChannel,
    newly_written: bool,
    detail: String,
) -> AutostartRegistration {
    AutostartRegistration {
        service: script.name.clone(),
        channel,
        installed: true,
        newly_written,
        detail: Some(detail),
    }
}

fn registration_error(channel: AutostartChannel, path: &Path, e: std::io::Error) -> DeployError {
    DeployError::Registration {
        channel,
        reason: format!("{}: {}", path.display(), e),
    }
}

fn end_marker(script: &LaunchScript) -> String {
    format!("{} (end)", script.marker())
}

/// Render the init-manager unit. `ExecStart` is double-quoted, so quotes,
/// backslashes and unit specifiers are escaped.
pub fn render_unit(script: &LaunchScript) -> String {
    let exec = script
        .shell_line()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('%', "%%");
    let user_line = match std::env::var("SUDO_USER") {
        Ok(user) if !user.is_empty() && user != "root" => format!("User={}", user),
        _ => String::new(),
    };

    UNIT_TEMPLATE
        .replace("{{NAME}}", &script.name)
        .replace("{{DESCRIPTION}}", &format!("{} (bringup)", script.name))
        .replace("{{WORKING_DIR}}", &script.working_dir.display().to_string())
        .replace("{{PORT}}", &script.port.to_string())
        .replace("{{COMMAND}}", &exec)
        .replace("{{USER_LINE}}", &user_line)
}

pub fn render_init_script(script: &LaunchScript) -> String {
    INIT_TEMPLATE
        .replace("{{NAME}}", &script.name)
        .replace("{{DESCRIPTION}}", &format!("{} (bringup)", script.name))
        .replace("{{LOG_FILE}}", &shell_quote(&script.log_path.to_string_lossy()))
        .replace("{{SHELL_LINE}}", &shell_quote(&script.shell_line()))
}

/// `@reboot` line. cron treats `%` as a newline, so it is escaped.
pub fn reboot_entry(script: &LaunchScript, delay_secs: u64) -> String {
    format!(
        "@reboot sleep {} && {} >> {} 2>&1 {}",
        delay_secs,
        script.shell_line().replace('%', "\\%"),
        shell_quote(&script.log_path.to_string_lossy()),
        script.marker()
    )
}

/// Guarded login-shell block: starts the service only if it is not running.
pub fn login_block(script: &LaunchScript) -> String {
    format!(
        "{marker}\nif ! pgrep -f {pattern} >/dev/null 2>&1; then\n    ( {line} >> {log} 2>&1 & )\nfi\n{end}\n",
        marker = script.marker(),
        pattern = shell_quote(&script.command),
        line = script.shell_line(),
        log = shell_quote(&script.log_path.to_string_lossy()),
        end = end_marker(script),
    )
}

/// Make `content` hold exactly one line ending in `marker`, equal to `entry`.
/// Returns `None` when it already does.
fn replace_line(content: &str, marker: &str, entry: &str) -> Option<String> {
    let owned: Vec<&str> = content.lines().filter(|l| l.ends_with(marker)).collect();
    if owned == [entry] {
        return None;
    }

    let mut lines: Vec<&str> = content.lines().filter(|l| !l.ends_with(marker)).collect();
    lines.push(entry);
    let mut updated = lines.join("\n");
    updated.push('\n');
    Some(updated)
}

/// Make `content` hold exactly one `begin`..`end` block, equal to `block`.
/// Returns `None` when it already does.
fn replace_block(content: &str, block: &str, begin: &str, end: &str) -> Option<String> {
    let mut kept: Vec<&str> = Vec::new();
    let mut existing: Vec<String> = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in content.lines() {
        match current.as_mut() {
            Some(lines) => {
                lines.push(line);
                if line == end {
                    let mut text = lines.join("\n");
                    text.push('\n');
                    existing.push(text);
                    current = None;
                }
            }
            None if line == begin => current = Some(vec![line]),
            None => kept.push(line),
        }
    }
    // An unterminated block only loses its begin line; the rest is kept.
    if let Some(lines) = current {
        kept.extend(lines.into_iter().skip(1));
    }

    if existing.len() == 1 && existing[0] == block && kept.len() + block.lines().count() == content.lines().count() {
        return None;
    }

    let mut updated = kept.join("\n");
    if !updated.is_empty() {
        updated.push('\n');
    }
    updated.push_str(block);
    Some(updated)
}
