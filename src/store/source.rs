use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the well-known JSON files this tool reads and rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigSource {
    /// Our own account registry.
    Commander,
    ClaudeSettings,
    ClaudeState,
    CodexAuth,
    CursorMcp,
}

impl ConfigSource {
    pub const ALL: [Self; 5] = [
        Self::Commander,
        Self::ClaudeSettings,
        Self::ClaudeState,
        Self::CodexAuth,
        Self::CursorMcp,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            Self::Commander => "commander",
            Self::ClaudeSettings => "claude-settings",
            Self::ClaudeState => "claude-state",
            Self::CodexAuth => "codex-auth",
            Self::CursorMcp => "cursor-mcp",
        }
    }

    /// File name on disk; also the name its backups are stored under.
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Commander => "commander.json",
            Self::ClaudeSettings => "settings.json",
            Self::ClaudeState => ".claude.json",
            Self::CodexAuth => "auth.json",
            Self::CursorMcp => "mcp.json",
        }
    }

    pub fn keys() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.key()).collect()
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ConfigSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|src| src.key() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown config source '{s}' (expected one of: {})",
                    Self::keys().join(", ")
                )
            })
    }
}
