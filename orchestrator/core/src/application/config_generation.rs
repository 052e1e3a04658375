// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Config generation
//!
//! Writes the application's `.env` and its runtime directories. Both are
//! create-if-absent: an existing secret key and any operator-edited keys
//! survive re-runs, only the port keys follow the current configuration.

use crate::domain::error::DeployResult;
use rand::distr::{Alphanumeric, SampleString};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tracing::{debug, info};

pub const ENV_FILE: &str = ".env";
pub const SECRET_KEY_LENGTH: usize = 50;
pub const RUNTIME_DIRS: [&str; 3] = ["media", "staticfiles", "logs"];

/// Values the generated `.env` must carry.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub web_port: u16,
    pub receiver_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedConfig {
    pub env_path: PathBuf,
    /// The file did not exist before this run.
    pub created: bool,
    /// Keys added or changed by this run.
    pub updated_keys: Vec<String>,
    pub created_dirs: Vec<PathBuf>,
}

pub struct ConfigGenerator {
    working_dir: PathBuf,
}

impl ConfigGenerator {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn generate(&self, settings: &EnvSettings) -> DeployResult<GeneratedConfig> {
        let env_path = self.working_dir.join(ENV_FILE);
        let existing = match std::fs::read_to_string(&env_path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let created = existing.is_none();

        let mut env = EnvFile::parse(existing.as_deref().unwrap_or("# Generated by bringup\n"));
        let mut updated_keys = Vec::new();

        // Defaults: only written when the key is missing.
        let defaults = [
            ("DEBUG", "False".to_string()),
            ("SECRET_KEY", secret_token(SECRET_KEY_LENGTH)),
            ("ALLOWED_HOSTS", "*".to_string()),
            ("STATIC_URL", "/static/".to_string()),
            ("MEDIA_URL", "/media/".to_string()),
        ];
        for (key, value) in defaults {
            if env.get(key).is_none() {
                env.set(key, &value);
                updated_keys.push(key.to_string());
            }
        }

        // Tracked: always follow the configuration.
        let mut tracked = vec![("WEB_PORT", settings.web_port.to_string())];
        if let Some(port) = settings.receiver_port {
            tracked.push(("DICOM_PORT", port.to_string()));
        }
        for (key, value) in tracked {
            if env.get(key) != Some(value.as_str()) {
                env.set(key, &value);
                updated_keys.push(key.to_string());
            }
        }

        if !updated_keys.is_empty() {
            std::fs::write(&env_path, env.render())?;
            info!(path = %env_path.display(), keys = ?updated_keys, "Environment file written");
        } else {
            debug!(path = %env_path.display(), "Environment file already up to date");
        }
        std::fs::set_permissions(&env_path, std::fs::Permissions::from_mode(0o600))?;

        let created_dirs = self.ensure_dirs()?;

        Ok(GeneratedConfig {
            env_path,
            created,
            updated_keys,
            created_dirs,
        })
    }

    fn ensure_dirs(&self) -> DeployResult<Vec<PathBuf>> {
        let mut created = Vec::new();
        for name in RUNTIME_DIRS {
            let dir = self.working_dir.join(name);
            if !dir.is_dir() {
                std::fs::create_dir_all(&dir)?;
                created.push(dir);
            }
        }
        Ok(created)
    }
}

/// Random alphanumeric token.
pub fn secret_token(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), len)
}

/// Line-preserving `.env` editor. Comments, blank lines and key order survive.
struct EnvFile {
    lines: Vec<String>,
}

impl EnvFile {
    fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(String::from).collect(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.lines.iter().position(|line| entry_key(line) == Some(key))
    }

    fn get(&self, key: &str) -> Option<&str> {
        let line = &self.lines[self.position(key)?];
        line.split_once('=').map(|(_, v)| v.trim())
    }

    fn set(&mut self, key: &str, value: &str) {
        let line = format!("{}={}", key, value);
        match self.position(key) {
            Some(i) => self.lines[i] = line,
            None => self.lines.push(line),
        }
    }

    fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn entry_key(line: &str) -> Option<&str> {
    let line = line.trim_start();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    line.split_once('=').map(|(k, _)| k.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn settings() -> EnvSettings {
        EnvSettings {
            web_port: 8000,
            receiver_port: Some(11112),
        }
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn fresh_directory_gets_env_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let generated = ConfigGenerator::new(dir.path()).generate(&settings()).unwrap();

        assert!(generated.created);
        assert_eq!(generated.created_dirs.len(), 3);
        let env = read(&generated.env_path);
        assert!(env.contains("WEB_PORT=8000\n"));
        assert!(env.contains("DICOM_PORT=11112\n"));
        let secret = env
            .lines()
            .find_map(|l| l.strip_prefix("SECRET_KEY="))
            .unwrap();
        assert_eq!(secret.len(), SECRET_KEY_LENGTH);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));

        let mode = std::fs::metadata(&generated.env_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn rerun_is_a_noop_and_keeps_the_secret() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ConfigGenerator::new(dir.path());
        let first = generator.generate(&settings()).unwrap();
        let before = read(&first.env_path);

        let second = generator.generate(&settings()).unwrap();
        assert!(!second.created);
        assert!(second.updated_keys.is_empty());
        assert!(second.created_dirs.is_empty());
        assert_eq!(read(&second.env_path), before);
    }

    #[test]
    fn operator_edits_survive_and_ports_follow_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ENV_FILE),
            "# site settings\nSECRET_KEY=keep-me\nALLOWED_HOSTS=pacs.example.org\nWEB_PORT=8000\n",
        )
        .unwrap();

        let generated = ConfigGenerator::new(dir.path())
            .generate(&EnvSettings {
                web_port: 9000,
                receiver_port: None,
            })
            .unwrap();

        let env = read(&generated.env_path);
        assert!(env.starts_with("# site settings\nSECRET_KEY=keep-me\nALLOWED_HOSTS=pacs.example.org\nWEB_PORT=9000\n"));
        assert!(!env.contains("DICOM_PORT"));
        assert!(generated.updated_keys.contains(&"WEB_PORT".to_string()));
        assert!(!generated.updated_keys.contains(&"SECRET_KEY".to_string()));
    }

    #[test]
    fn exported_keys_are_recognised() {
        assert_eq!(entry_key("export SECRET_KEY=abc"), Some("SECRET_KEY"));
        assert_eq!(entry_key("# SECRET_KEY=abc"), None);
    }
}
