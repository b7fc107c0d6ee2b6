#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use commander::AppConfig;
use serde_json::Value;

/// Scratch home + config dir + mock bin dir, removed on drop.
pub struct TempHome {
    pub home: PathBuf,
    pub config_dir: PathBuf,
    pub mock_bin: PathBuf,
    original_path: String,
}

impl TempHome {
    pub fn new(prefix: &str) -> Self {
        let base = std::env::temp_dir();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let home = base.join(format!("{prefix}-home-{}-{ts}", std::process::id()));
        let mock_bin = base.join(format!("{prefix}-mockbin-{}-{ts}", std::process::id()));
        let config_dir = home.join(".commander");

        fs::create_dir_all(&home).expect("create temp home dir");
        fs::create_dir_all(&mock_bin).expect("create mock bin dir");

        Self {
            home,
            config_dir,
            mock_bin,
            original_path: std::env::var("PATH").unwrap_or_default(),
        }
    }

    /// Config rooted in this home; helpers run as `sh <script>`.
    pub fn app_config(&self) -> AppConfig {
        let mut cfg = AppConfig::for_dirs(&self.home, &self.config_dir);
        cfg.helper_runner = vec!["sh".to_string()];
        cfg.helper_timeout = Duration::from_secs(10);
        cfg
    }

    pub fn write_mock(&self, name: &str, body: &str) -> PathBuf {
        let p = self.mock_bin.join(name);
        fs::write(&p, body).expect("write mock");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&p).expect("mock metadata").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&p, perms).expect("set mock executable");
        }
        p
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.run_with_env(args, &[])
    }

    pub fn run_with_env(&self, args: &[&str], envs: &[(&str, &str)]) -> Output {
        let path = format!("{}:{}", self.mock_bin.display(), self.original_path);
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_commander"));
        cmd.args(args)
            .current_dir(&self.home)
            .env("HOME", &self.home)
            .env("COMMANDER_HOME", &self.home)
            .env("COMMANDER_CONFIG_DIR", &self.config_dir)
            .env("COMMANDER_HISTORY", "1")
            .env("COMMANDER_NO_CACHE", "1")
            .env("PATH", path)
            .env_remove("COMMANDER_LOG")
            .env_remove("RUST_LOG");
        for (k, v) in envs {
            cmd.env(k, v);
        }
        cmd.output().expect("run commander")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.home.join(".claude").join("settings.json")
    }

    pub fn commander_file(&self) -> PathBuf {
        self.config_dir.join("commander.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.config_dir.join("commander-backups")
    }

    pub fn history_file(&self) -> PathBuf {
        self.config_dir.join("commander-jobs.jsonl")
    }
}

impl Drop for TempHome {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.home);
        let _ = fs::remove_dir_all(&self.mock_bin);
    }
}

pub fn stdout_str(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

pub fn stderr_str(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

pub fn stdout_json(out: &Output) -> Value {
    serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): stdout={} stderr={}",
            stdout_str(out),
            stderr_str(out)
        )
    })
}

pub fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path).expect("read json");
    serde_json::from_str::<Value>(&text).expect("parse json")
}

pub fn parse_jsonl(path: &Path) -> Vec<Value> {
    let text = fs::read_to_string(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| serde_json::from_str::<Value>(line).expect("valid json line"))
        .collect()
}
