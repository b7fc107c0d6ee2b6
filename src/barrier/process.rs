use std::collections::BTreeMap;
use std::ffi::OsString;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::output::last_json_line;
use crate::error::HelperError;
use crate::util::preview;

const PREVIEW_CHARS: usize = 400;

/// A fully resolved command line for one helper run.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub helper: String,
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: BTreeMap<String, String>,
}

/// Spawns helpers: fresh temp working directory, piped output, hard timeout.
#[derive(Debug, Clone)]
pub(crate) struct Launcher {
    timeout: Duration,
    launches: Arc<AtomicUsize>,
}

impl Launcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub async fn run(&self, inv: Invocation) -> Result<Value, HelperError> {
        let helper = inv.helper;
        let workdir = tempfile::Builder::new()
            .prefix("commander-helper-")
            .tempdir()
            .map_err(|e| HelperError::Workspace {
                helper: helper.clone(),
                reason: e.to_string(),
            })?;

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .envs(&inv.env)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        self.launches.fetch_add(1, Ordering::SeqCst);
        debug!(
            helper = %helper,
            program = %inv.program.to_string_lossy(),
            workdir = %workdir.path().display(),
            "launching helper"
        );
        let child = cmd.spawn().map_err(|e| HelperError::Spawn {
            helper: helper.clone(),
            reason: e.to_string(),
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| HelperError::Timeout {
                helper: helper.clone(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| HelperError::Spawn {
                helper: helper.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(HelperError::Failed {
                helper,
                code: output.status.code(),
                stderr: preview(&String::from_utf8_lossy(&output.stderr), PREVIEW_CHARS),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        last_json_line(&stdout).ok_or_else(|| HelperError::NoJsonOutput {
            helper,
            stdout: preview(&stdout, PREVIEW_CHARS),
        })
    }
}
