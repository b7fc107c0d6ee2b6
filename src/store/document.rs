use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ConfigSource;

/// `commander.json`: the accounts this tool switches between.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommanderConfig {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_account: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommanderConfig {
    pub fn account(&self, name: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.name == name)
    }

    pub fn active(&self) -> Option<&Account> {
        self.active_account.as_deref().and_then(|n| self.account(n))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    /// Per-account config directory handed to helpers (e.g. `CLAUDE_CONFIG_DIR`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `~/.claude/settings.json`. Only the fields we touch are typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaudeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `~/.codex/auth.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodexAuth {
    #[serde(
        rename = "OPENAI_API_KEY",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `~/.cursor/mcp.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, McpServer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The parsed content of one source, typed as narrowly as its owner documents.
///
/// `~/.claude.json` has no stable public schema and stays an untyped map.
/// Unknown fields of the typed variants are kept in `extra`, so a
/// read-modify-write never drops data the owning tool put there.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigDocument {
    Commander(CommanderConfig),
    ClaudeSettings(ClaudeSettings),
    ClaudeState(Map<String, Value>),
    CodexAuth(CodexAuth),
    CursorMcp(McpConfig),
}

impl ConfigDocument {
    pub fn from_value(source: ConfigSource, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match source {
            ConfigSource::Commander => Self::Commander(serde_json::from_value(value)?),
            ConfigSource::ClaudeSettings => Self::ClaudeSettings(serde_json::from_value(value)?),
            ConfigSource::ClaudeState => Self::ClaudeState(serde_json::from_value(value)?),
            ConfigSource::CodexAuth => Self::CodexAuth(serde_json::from_value(value)?),
            ConfigSource::CursorMcp => Self::CursorMcp(serde_json::from_value(value)?),
        })
    }

    pub const fn source(&self) -> ConfigSource {
        match self {
            Self::Commander(_) => ConfigSource::Commander,
            Self::ClaudeSettings(_) => ConfigSource::ClaudeSettings,
            Self::ClaudeState(_) => ConfigSource::ClaudeState,
            Self::CodexAuth(_) => ConfigSource::CodexAuth,
            Self::CursorMcp(_) => ConfigSource::CursorMcp,
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Commander(doc) => serde_json::to_value(doc),
            Self::ClaudeSettings(doc) => serde_json::to_value(doc),
            Self::ClaudeState(map) => Ok(Value::Object(map.clone())),
            Self::CodexAuth(doc) => serde_json::to_value(doc),
            Self::CursorMcp(doc) => serde_json::to_value(doc),
        }
    }
}
