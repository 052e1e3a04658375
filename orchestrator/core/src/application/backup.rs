// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Backup/Rollback Manager
//!
//! `snapshot` captures a database dump and the configured files into a fresh
//! timestamped directory. Each artifact is independent: one failing is logged
//! and recorded as skipped while the rest are still captured.
//!
//! `rollback` stops the running services first, then restores every artifact
//! listed in the manifest. It succeeds only when all of them were restored.
//! At most one rollback runs at a time.

use crate::domain::backup::{
    ArtifactKind, BackupArtifact, BackupManifest, SkippedArtifact, DATABASE_ARTIFACT,
};
use crate::domain::config::BackupConfig;
use crate::domain::error::{DeployError, DeployResult};
use crate::domain::profile::{DeploymentMode, SystemProfile};
use crate::infrastructure::command::CommandRunner;
use crate::infrastructure::state_store::StateStore;
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const DATABASE_DUMP_FILE: &str = "database.sql";

/// Something that can stop every service launched by the last run.
#[async_trait]
pub trait RunningServices: Send + Sync {
    async fn stop_all(&self) -> DeployResult<()>;
}

pub struct BackupManager {
    store: StateStore,
    config: BackupConfig,
    working_dir: PathBuf,
    runner: CommandRunner,
    rollback_guard: Mutex<()>,
}

impl BackupManager {
    pub fn new(
        store: StateStore,
        config: BackupConfig,
        working_dir: impl Into<PathBuf>,
        runner: CommandRunner,
    ) -> Self {
        Self {
            store,
            config,
            working_dir: working_dir.into(),
            runner,
            rollback_guard: Mutex::new(()),
        }
    }

    pub async fn snapshot(
        &self,
        profile: &SystemProfile,
        mode: DeploymentMode,
    ) -> DeployResult<BackupManifest> {
        let timestamp = Utc::now();
        let directory = self.store.create_backup_dir(timestamp)?;
        info!(dir = ?directory, "Creating backup");

        let mut artifacts = Vec::new();
        let mut skipped = Vec::new();

        match self.dump_database(&directory).await {
            Ok(Some(artifact)) => artifacts.push(artifact),
            Ok(None) => {}
            Err(reason) => {
                warn!(artifact = DATABASE_ARTIFACT, "Backup skipped: {}", reason);
                skipped.push(SkippedArtifact {
                    artifact_name: DATABASE_ARTIFACT.to_string(),
                    reason,
                });
            }
        }

        for (index, path) in self.config.config_paths.iter().enumerate() {
            let name = path.to_string_lossy().into_owned();
            match self.copy_file(index, path, &directory) {
                Ok(artifact) => artifacts.push(artifact),
                Err(reason) => {
                    warn!(artifact = %name, "Backup skipped: {}", reason);
                    skipped.push(SkippedArtifact {
                        artifact_name: name,
                        reason,
                    });
                }
            }
        }

        let manifest = BackupManifest {
            timestamp,
            system_profile_id: profile.id,
            deployment_mode: mode,
            directory,
            artifacts,
            skipped,
        };
        self.store.save_manifest(&manifest)?;

        counter!("bringup_backup_artifacts_total", "outcome" => "captured")
            .increment(manifest.artifacts.len() as u64);
        counter!("bringup_backup_artifacts_total", "outcome" => "skipped")
            .increment(manifest.skipped.len() as u64);
        info!(
            captured = manifest.artifacts.len(),
            skipped = manifest.skipped.len(),
            "Backup complete: {:?}",
            manifest.manifest_path()
        );
        Ok(manifest)
    }

    /// Restore every artifact in `manifest`. Services are stopped first.
    pub async fn rollback(
        &self,
        manifest: &BackupManifest,
        services: &dyn RunningServices,
    ) -> DeployResult<()> {
        let _guard = self
            .rollback_guard
            .try_lock()
            .map_err(|_| DeployError::State("a rollback is already in progress".to_string()))?;

        info!(backup = ?manifest.directory, "Rolling back");
        if let Err(e) = services.stop_all().await {
            // Restoring under a live service is worse than a failed stop; keep going.
            warn!("Failed to stop services before rollback: {}", e);
        }

        let mut failed = Vec::new();
        for artifact in &manifest.artifacts {
            let result = match &artifact.kind {
                ArtifactKind::File { source } => restore_file(&artifact.backup_path, source),
                ArtifactKind::DatabaseDump => self.restore_database(&artifact.backup_path).await,
            };
            match result {
                Ok(()) => info!(artifact = %artifact.artifact_name, "Restored"),
                Err(reason) => {
                    error!(artifact = %artifact.artifact_name, "Restore failed: {}", reason);
                    failed.push(format!("{} ({})", artifact.artifact_name, reason));
                }
            }
        }

        if failed.is_empty() {
            counter!("bringup_rollbacks_total", "outcome" => "restored").increment(1);
            info!(restored = manifest.artifacts.len(), "Rollback complete");
            Ok(())
        } else {
            counter!("bringup_rollbacks_total", "outcome" => "failed").increment(1);
            Err(DeployError::Rollback { failed })
        }
    }

    /// `Ok(None)` when no database is configured; `Err` with a reason when
    /// one is configured but could not be dumped.
    async fn dump_database(&self, directory: &Path) -> Result<Option<BackupArtifact>, String> {
        let Ok(url) = std::env::var(&self.config.database_url_env) else {
            info!(
                env = %self.config.database_url_env,
                "No database connection string set, skipping database backup"
            );
            return Ok(None);
        };
        if which::which(&self.config.dump_tool).is_err() {
            return Err(format!("{} not found", self.config.dump_tool));
        }

        let backup_path = directory.join(DATABASE_DUMP_FILE);
        let target = backup_path.to_string_lossy();
        let output = self
            .runner
            .run(
                &self.config.dump_tool,
                &["--clean", "--if-exists", "-f", &target, &url],
                Some(&self.working_dir),
            )
            .await
            .map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(format!("{} failed: {}", self.config.dump_tool, output.tail(3)));
        }

        Ok(Some(BackupArtifact {
            artifact_name: DATABASE_ARTIFACT.to_string(),
            backup_path,
            kind: ArtifactKind::DatabaseDump,
        }))
    }

    async fn restore_database(&self, dump: &Path) -> Result<(), String> {
        let url = std::env::var(&self.config.database_url_env)
            .map_err(|_| format!("{} is not set", self.config.database_url_env))?;
        let file = dump.to_string_lossy();
        let output = self
            .runner
            .run(
                &self.config.restore_tool,
                &["-q", "-v", "ON_ERROR_STOP=1", "-f", &file, &url],
                Some(&self.working_dir),
            )
            .await
            .map_err(|e| e.to_string())?;
        if output.success() {
            Ok(())
        } else {
            Err(format!("{} failed: {}", self.config.restore_tool, output.tail(3)))
        }
    }

    fn copy_file(&self, index: usize, relative: &Path, directory: &Path) -> Result<BackupArtifact, String> {
        let source = if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.working_dir.join(relative)
        };
        if !source.is_file() {
            return Err("not present at snapshot time".to_string());
        }

        let backup_path = directory.join(stored_name(index, relative));
        std::fs::copy(&source, &backup_path).map_err(|e| e.to_string())?;
        Ok(BackupArtifact {
            artifact_name: relative.to_string_lossy().into_owned(),
            backup_path,
            kind: ArtifactKind::File { source },
        })
    }
}

fn restore_file(backup_path: &Path, destination: &Path) -> Result<(), String> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    std::fs::copy(backup_path, destination)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Backup file name for the `index`-th configured path: `003-settings.py`.
/// The index keeps two sources with the same file name apart.
fn stored_name(index: usize, path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    format!("{:03}-{}", index, file_name)
}
