use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::store::ConfigSource;

pub const BACKUPS_DIR_NAME: &str = "commander-backups";
pub const HISTORY_FILE_NAME: &str = "commander-jobs.jsonl";

/// Resolves every [`ConfigSource`] to its file on disk.
///
/// The mapping is fixed once the two roots are known: sources owned by
/// external tools live under the home directory, ours under the config dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    home_dir: PathBuf,
    config_dir: PathBuf,
}

impl ConfigPaths {
    pub fn new(home_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            config_dir: config_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.home_dir, &config.config_dir)
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn resolve(&self, source: ConfigSource) -> PathBuf {
        let dir = match source {
            ConfigSource::Commander => self.config_dir.clone(),
            ConfigSource::ClaudeSettings => self.home_dir.join(".claude"),
            ConfigSource::ClaudeState => self.home_dir.clone(),
            ConfigSource::CodexAuth => self.home_dir.join(".codex"),
            ConfigSource::CursorMcp => self.home_dir.join(".cursor"),
        };
        dir.join(source.file_name())
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.config_dir.join(BACKUPS_DIR_NAME)
    }

    pub fn history_file(&self) -> PathBuf {
        self.config_dir.join(HISTORY_FILE_NAME)
    }
}

/// `<path>.tmp`, the sibling every atomic replace writes first.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_else(OsString::new);
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn ensure_parent_dir(path: &Path) -> ConfigResult<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    std::fs::create_dir_all(parent)
        .map_err(|e| ConfigError::io(format!("failed to create {}", parent.display()), e))
}
