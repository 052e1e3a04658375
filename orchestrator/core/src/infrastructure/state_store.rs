// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Persisted state
//!
//! Layout under the state directory:
//!
//! ```text
//! <state_dir>/
//!   profile.json                  last SystemProfile + chosen mode
//!   handles.json                  ServiceHandles of the last launch
//!   backups/backup_<ts>/          one directory per run, holds manifest.json
//!   reports/deployment-<ts>.md    human-readable report per run
//!   logs/run-<id>.log             phase log per run
//!   logs/<service>.log            stdout/stderr of detached services
//! ```

use crate::domain::backup::{backup_dir_name, BackupManifest, MANIFEST_FILE};
use crate::domain::error::{DeployError, DeployResult};
use crate::domain::profile::{DeploymentMode, SystemProfile};
use crate::domain::service::ServiceHandle;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const PROFILE_FILE: &str = "profile.json";
const HANDLES_FILE: &str = "handles.json";

/// Profile snapshot plus the mode chosen from it; `start` relaunches from this
/// without re-profiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedProfile {
    pub profile: SystemProfile,
    pub mode: DeploymentMode,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory tree. Safe to call on every run.
    pub fn ensure_layout(&self) -> DeployResult<()> {
        for dir in [self.backups_dir(), self.reports_dir(), self.logs_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn run_log_path(&self, run_id: &str) -> PathBuf {
        self.logs_dir().join(format!("run-{}.log", run_id))
    }

    pub fn service_log_path(&self, service: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.log", service))
    }

    pub fn save_profile(&self, record: &PersistedProfile) -> DeployResult<()> {
        self.write_json(&self.root.join(PROFILE_FILE), record)
    }

    pub fn load_profile(&self) -> DeployResult<Option<PersistedProfile>> {
        self.read_json(&self.root.join(PROFILE_FILE))
    }

    pub fn save_handles(&self, handles: &[ServiceHandle]) -> DeployResult<()> {
        self.write_json(&self.root.join(HANDLES_FILE), &handles)
    }

    pub fn load_handles(&self) -> DeployResult<Vec<ServiceHandle>> {
        Ok(self
            .read_json::<Vec<ServiceHandle>>(&self.root.join(HANDLES_FILE))?
            .unwrap_or_default())
    }

    pub fn clear_handles(&self) -> DeployResult<()> {
        match std::fs::remove_file(self.root.join(HANDLES_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fresh, timestamp-named backup directory. A second run within the same
    /// second gets a numeric suffix rather than reusing the first one.
    pub fn create_backup_dir(&self, at: DateTime<Utc>) -> DeployResult<PathBuf> {
        let base = backup_dir_name(at);
        let mut candidate = self.backups_dir().join(&base);
        let mut suffix = 1;
        while candidate.exists() {
            candidate = self.backups_dir().join(format!("{}_{}", base, suffix));
            suffix += 1;
        }
        std::fs::create_dir_all(&candidate)?;
        Ok(candidate)
    }

    pub fn save_manifest(&self, manifest: &BackupManifest) -> DeployResult<()> {
        self.write_json(&manifest.manifest_path(), manifest)
    }

    pub fn load_manifest(&self, dir: &Path) -> DeployResult<BackupManifest> {
        self.read_json(&dir.join(MANIFEST_FILE))?.ok_or_else(|| {
            DeployError::State(format!("no backup manifest in {}", dir.display()))
        })
    }

    /// Most recent backup by manifest timestamp. Directories without a
    /// readable manifest are ignored.
    pub fn latest_manifest(&self) -> DeployResult<Option<BackupManifest>> {
        let dir = match std::fs::read_dir(self.backups_dir()) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let latest = dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join(MANIFEST_FILE).is_file())
            .filter_map(|path| match self.load_manifest(&path) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    tracing::warn!("Ignoring backup {:?}: {}", path, e);
                    None
                }
            })
            .max_by_key(|manifest| manifest.timestamp);
        Ok(latest)
    }

    /// Write a run report. Like backup directories, a second report within
    /// the same second gets a numeric suffix.
    pub fn write_report(&self, at: DateTime<Utc>, content: &str) -> DeployResult<PathBuf> {
        std::fs::create_dir_all(self.reports_dir())?;
        let base = format!("deployment-{}", at.format("%Y%m%d_%H%M%S"));
        let mut suffix = 0;
        loop {
            let name = match suffix {
                0 => format!("{}.md", base),
                n => format!("{}_{}.md", base, n),
            };
            let path = self.reports_dir().join(name);
            match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> DeployResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> DeployResult<Option<T>> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                DeployError::State(format!("{} is unreadable: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Append one timestamped line to a run's phase log. Logging must never fail
/// a phase, so errors are only traced.
pub fn append_log_line(path: &Path, line: &str) {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{} {}", Utc::now().to_rfc3339(), line)
    })();
    if let Err(e) = result {
        tracing::debug!("Could not append to phase log {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::{test_profile, ProfileId};
    use crate::domain::service::{ProbeKind, ReadinessState, ServiceTarget};
    use chrono::TimeZone;

    #[test]
    fn profile_and_handles_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load_profile().unwrap().is_none());
        assert!(store.load_handles().unwrap().is_empty());

        let record = PersistedProfile {
            profile: test_profile(),
            mode: DeploymentMode::NativeSimple,
            recorded_at: Utc::now(),
        };
        store.save_profile(&record).unwrap();
        let loaded = store.load_profile().unwrap().unwrap();
        assert_eq!(loaded.profile, record.profile);
        assert_eq!(loaded.mode, DeploymentMode::NativeSimple);

        let handle = ServiceHandle {
            name: "web".into(),
            target: ServiceTarget::Process(4242),
            bound_port: 8000,
            readiness_state: ReadinessState::Ready,
            probe: ProbeKind::Tcp,
            log_path: None,
            started_at: Some(1_760_000_000),
            unit: Some("web".into()),
        };
        store.save_handles(std::slice::from_ref(&handle)).unwrap();
        assert_eq!(store.load_handles().unwrap(), vec![handle]);

        store.clear_handles().unwrap();
        store.clear_handles().unwrap();
        assert!(store.load_handles().unwrap().is_empty());
    }

    #[test]
    fn corrupt_state_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROFILE_FILE), b"{not json").unwrap();
        let store = StateStore::new(dir.path());
        assert!(matches!(store.load_profile(), Err(DeployError::State(_))));
    }

    #[test]
    fn latest_manifest_picks_newest_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_layout().unwrap();
        assert!(store.latest_manifest().unwrap().is_none());

        let mut last_dir = PathBuf::new();
        for (sec, mode) in [(1, DeploymentMode::NativeSimple), (2, DeploymentMode::ContainerFull)] {
            let at = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, sec).unwrap();
            let backup_dir = store.create_backup_dir(at).unwrap();
            let manifest = BackupManifest {
                timestamp: at,
                system_profile_id: ProfileId::new(),
                deployment_mode: mode,
                directory: backup_dir.clone(),
                artifacts: vec![],
                skipped: vec![],
            };
            store.save_manifest(&manifest).unwrap();
            last_dir = backup_dir;
        }
        // A directory without a manifest is ignored.
        std::fs::create_dir_all(store.backups_dir().join("backup_20991231_000000")).unwrap();

        let latest = store.latest_manifest().unwrap().unwrap();
        assert_eq!(latest.directory, last_dir);
        assert_eq!(latest.deployment_mode, DeploymentMode::ContainerFull);
    }

    #[test]
    fn latest_manifest_orders_by_timestamp_not_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let at = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();

        // Same second: directories become backup_<ts>, _1 .. _10, and "_10"
        // sorts before "_2" as a string.
        let mut last_dir = PathBuf::new();
        for i in 0..11 {
            let backup_dir = store.create_backup_dir(at).unwrap();
            store
                .save_manifest(&BackupManifest {
                    timestamp: at + chrono::Duration::milliseconds(i),
                    system_profile_id: ProfileId::new(),
                    deployment_mode: DeploymentMode::NativeSimple,
                    directory: backup_dir.clone(),
                    artifacts: vec![],
                    skipped: vec![],
                })
                .unwrap();
            last_dir = backup_dir;
        }
        assert!(last_dir.to_string_lossy().ends_with("_10"));

        let latest = store.latest_manifest().unwrap().unwrap();
        assert_eq!(latest.directory, last_dir);
    }

    #[test]
    fn reports_in_the_same_second_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let at = Utc::now();

        let first = store.write_report(at, "first").unwrap();
        let second = store.write_report(at, "second").unwrap();
        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(first).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(second).unwrap(), "second");
    }

    #[test]
    fn backup_dirs_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let at = Utc::now();
        let first = store.create_backup_dir(at).unwrap();
        let second = store.create_backup_dir(at).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn log_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run-1.log");
        append_log_line(&path, "PROFILE started");
        append_log_line(&path, "PROFILE succeeded");
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
