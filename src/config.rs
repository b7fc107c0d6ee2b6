use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CommanderError, CommanderResult};

/// Canonical application identity (used by the CLI surfaces).
pub const APP_NAME: &str = "commander";
pub const APP_DESC: &str = "Local control plane for AI tool configuration";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Canonical runtime defaults.
pub const DEFAULT_CACHE_TTL_MS: u64 = 3_000;
pub const DEFAULT_HELPER_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_HELPER_RUNNER: &str = "npx -y";
pub const CONFIG_DIR_NAME: &str = ".commander";

/// Process-level configuration snapshot.
///
/// Built once at start-up and handed to [`crate::Commander`]; nothing in the
/// core reads the environment after that.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub home_dir: PathBuf,
    pub config_dir: PathBuf,
    pub cache_ttl: Duration,
    pub helper_timeout: Duration,
    pub helper_runner: Vec<String>,
    pub history_enabled: bool,
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .and_then(|v| match v.as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Splits a runner command line such as `npx -y` or `pnpm dlx` into argv.
pub fn parse_runner(raw: &str) -> CommanderResult<Vec<String>> {
    let words = shell_words::split(raw)
        .map_err(|e| CommanderError::settings("COMMANDER_HELPER_RUNNER", e))?;
    if words.is_empty() {
        return Err(CommanderError::settings(
            "COMMANDER_HELPER_RUNNER",
            "runner command cannot be empty",
        ));
    }
    Ok(words)
}

impl AppConfig {
    pub fn from_env() -> CommanderResult<Self> {
        let home_dir = env_path("COMMANDER_HOME")
            .or_else(dirs::home_dir)
            .ok_or_else(|| {
                CommanderError::settings("COMMANDER_HOME", "unable to resolve home directory")
            })?;
        let config_dir =
            env_path("COMMANDER_CONFIG_DIR").unwrap_or_else(|| home_dir.join(CONFIG_DIR_NAME));
        let cache_ttl = if env_bool("COMMANDER_NO_CACHE", false) {
            Duration::ZERO
        } else {
            Duration::from_millis(env_u64("COMMANDER_CACHE_TTL_MS", DEFAULT_CACHE_TTL_MS))
        };
        let runner_raw = env::var("COMMANDER_HELPER_RUNNER")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HELPER_RUNNER.to_string());
        Ok(Self {
            home_dir,
            config_dir,
            cache_ttl,
            helper_timeout: Duration::from_secs(
                env_u64("COMMANDER_HELPER_TIMEOUT_SECS", DEFAULT_HELPER_TIMEOUT_SECS).max(1),
            ),
            helper_runner: parse_runner(&runner_raw)?,
            history_enabled: env_bool("COMMANDER_HISTORY", true),
        })
    }

    /// Defaults rooted at explicit directories; history is off.
    pub fn for_dirs(home_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            config_dir: config_dir.into(),
            cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            helper_timeout: Duration::from_secs(DEFAULT_HELPER_TIMEOUT_SECS),
            helper_runner: vec!["npx".to_string(), "-y".to_string()],
            history_enabled: false,
        }
    }
}
