// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Backup manifest: the record of what was captured before a mutating run.
//!
//! A manifest is written once, read only by rollback, and never deleted by the
//! orchestrator. Artifacts that failed to back up are not listed, so the
//! manifest shows exactly what rollback can restore.

use crate::domain::profile::{DeploymentMode, ProfileId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DATABASE_ARTIFACT: &str = "database";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A copy of a configuration file; restored to `source`.
    File { source: PathBuf },
    /// A database dump; restored through the configured restore tool.
    DatabaseDump,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub artifact_name: String,
    pub backup_path: PathBuf,
    #[serde(flatten)]
    pub kind: ArtifactKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub timestamp: DateTime<Utc>,
    pub system_profile_id: ProfileId,
    pub deployment_mode: DeploymentMode,
    /// Directory holding the manifest and every backed-up artifact.
    pub directory: PathBuf,
    pub artifacts: Vec<BackupArtifact>,
    /// Artifacts that were attempted but could not be captured.
    #[serde(default)]
    pub skipped: Vec<SkippedArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedArtifact {
    pub artifact_name: String,
    pub reason: String,
}

impl BackupManifest {
    pub fn artifact_names(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.artifact_name.as_str()).collect()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(MANIFEST_FILE)
    }
}

/// Timestamp-named directory for one run's backup, e.g. `backup_20250901_225728`.
pub fn backup_dir_name(at: DateTime<Utc>) -> String {
    format!("backup_{}", at.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backup_dir_is_timestamp_named() {
        let at = Utc.with_ymd_and_hms(2025, 9, 1, 22, 57, 28).unwrap();
        assert_eq!(backup_dir_name(at), "backup_20250901_225728");
    }

    #[test]
    fn manifest_serializes_artifact_kind_inline() {
        let manifest = BackupManifest {
            timestamp: Utc::now(),
            system_profile_id: ProfileId::new(),
            deployment_mode: DeploymentMode::NativeSimple,
            directory: PathBuf::from("/var/lib/bringup/backups/backup_1"),
            artifacts: vec![BackupArtifact {
                artifact_name: "settings.py".into(),
                backup_path: PathBuf::from("/var/lib/bringup/backups/backup_1/settings.py"),
                kind: ArtifactKind::File {
                    source: PathBuf::from("/srv/app/settings.py"),
                },
            }],
            skipped: vec![SkippedArtifact {
                artifact_name: DATABASE_ARTIFACT.into(),
                reason: "pg_dump not found".into(),
            }],
        };

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["artifacts"][0]["kind"], "file");
        assert_eq!(json["artifacts"][0]["source"], "/srv/app/settings.py");
        assert_eq!(manifest.artifact_names(), vec!["settings.py"]);
    }
}
