use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::store::ConfigSource;

pub type CommanderResult<T> = Result<T, CommanderError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A payload rejected by a command's validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid payload: {}", .reasons.join(" | "))]
pub struct ValidationError {
    pub reasons: Vec<String>,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reasons: vec![reason.into()],
        }
    }

    pub fn from_reasons(reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            return Self::new("payload rejected");
        }
        Self { reasons }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommanderError {
    #[error("command already registered: {0}")]
    DuplicateCommand(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("command {command} has an unusable input schema: {reason}")]
    InvalidSchema { command: String, reason: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid setting {name}: {reason}")]
    Settings { name: String, reason: String },
}

impl CommanderError {
    pub fn settings(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Settings {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by the caller's request rather than by the system.
    pub const fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::UnknownCommand(_) | Self::Validation(_) | Self::Settings { .. }
        )
    }
}

/// Failure of one external helper invocation. Cloneable so a warmup's
/// outcome can be handed to every caller that waited on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HelperError {
    #[error("failed to spawn {helper}: {reason}")]
    Spawn { helper: String, reason: String },
    #[error("{helper} timed out after {timeout_ms}ms")]
    Timeout { helper: String, timeout_ms: u64 },
    #[error("{helper} exited with {}: {stderr}", exit_label(.code))]
    Failed {
        helper: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{helper} printed no JSON line: {stdout}")]
    NoJsonOutput { helper: String, stdout: String },
    #[error("cannot prepare working directory for {helper}: {reason}")]
    Workspace { helper: String, reason: String },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| format!("code {c}"))
        .unwrap_or_else(|| "a signal".to_string())
}

/// Coarse classification of a [`ConfigError`], stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigErrorKind {
    NotFound,
    Invalid,
    Io,
}

impl ConfigErrorKind {
    /// HTTP-like status code a transport can map this onto.
    pub const fn status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Invalid => 422,
            Self::Io => 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{} not found", .path.display())]
    NotFound { path: PathBuf },
    #[error("invalid content in {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },
    #[error("no backup found for {config}")]
    NoBackup { config: ConfigSource },
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Encode {
        context: String,
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn encode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Encode {
            context: context.into(),
            source,
        }
    }

    pub fn invalid(path: &Path, reason: impl fmt::Display) -> Self {
        Self::Invalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub const fn kind(&self) -> ConfigErrorKind {
        match self {
            Self::NotFound { .. } | Self::NoBackup { .. } => ConfigErrorKind::NotFound,
            Self::Invalid { .. } => ConfigErrorKind::Invalid,
            Self::Io { .. } | Self::Encode { .. } => ConfigErrorKind::Io,
        }
    }

    pub const fn status(&self) -> u16 {
        self.kind().status()
    }
}
