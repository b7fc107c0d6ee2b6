use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::jobs::CommandJob;
use crate::paths::ensure_parent_dir;

/// Append-only JSONL record of settled jobs, shared by every process that
/// points at the same config dir.
#[derive(Debug, Clone)]
pub struct JobHistory {
    path: PathBuf,
}

impl JobHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best effort: failures are logged and never reach the job.
    pub fn record(&self, job: &CommandJob) {
        let value = match serde_json::to_value(job) {
            Ok(v) => v,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "cannot encode job for history");
                return;
            }
        };
        if let Err(e) = append_jsonl(&self.path, &value) {
            warn!(job_id = %job.id, error = %e, "cannot append job history");
        }
    }

    /// The last `limit` jobs, oldest first. Corrupt lines are skipped.
    pub fn read_recent(&self, limit: usize) -> ConfigResult<Vec<CommandJob>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ConfigError::io(
                    format!("cannot open {}", self.path.display()),
                    e,
                ));
            }
        };
        let mut out = VecDeque::with_capacity(limit.min(256));
        for line in BufReader::new(file).lines() {
            let line =
                line.map_err(|e| ConfigError::io(format!("cannot read {}", self.path.display()), e))?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(job) = serde_json::from_str::<CommandJob>(&line) else {
                continue;
            };
            if out.len() == limit {
                out.pop_front();
            }
            if limit > 0 {
                out.push_back(job);
            }
        }
        Ok(out.into())
    }
}

fn append_jsonl(path: &Path, value: &Value) -> ConfigResult<()> {
    ensure_parent_dir(path)?;
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ConfigError::io(format!("failed opening {}", path.display()), e))?;
    f.lock_exclusive()
        .map_err(|e| ConfigError::io(format!("failed locking {}", path.display()), e))?;
    let mut line = serde_json::to_string(value)
        .map_err(|e| ConfigError::encode("history json serialize", e))?;
    line.push('\n');
    let write_res = f
        .write_all(line.as_bytes())
        .map_err(|e| ConfigError::io(format!("failed writing {}", path.display()), e));
    let _ = FileExt::unlock(&f);
    write_res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn records_and_reads_back_most_recent() {
        let tmp = tempdir().expect("tempdir");
        let history = JobHistory::new(tmp.path().join("nested").join("jobs.jsonl"));
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let mut job = CommandJob::queued(name);
            job.status = JobStatus::Success;
            ids.push(job.id);
            history.record(&job);
        }
        let recent = history.read_recent(2).expect("read");
        assert_eq!(recent.iter().map(|j| j.id).collect::<Vec<_>>(), ids[1..]);
    }

    #[test]
    fn corrupt_lines_are_skipped_and_missing_file_is_empty() {
        let tmp = tempdir().expect("tempdir");
        let history = JobHistory::new(tmp.path().join("jobs.jsonl"));
        assert!(history.read_recent(10).expect("read").is_empty());
        fs::write(history.path(), "{broken\n\n").expect("write");
        history.record(&CommandJob::queued("ok"));
        let recent = history.read_recent(10).expect("read");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].command_id, "ok");
    }
}
