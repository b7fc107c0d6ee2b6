//! Atomic, backed-up access to the well-known JSON configuration files.
//!
//! Every write snapshots the current file into
//! `<config-dir>/commander-backups/<stamp>/` before replacing it through a
//! `<path>.tmp` + rename, so readers only ever see the old or the new file.

mod backup;
mod cache;
mod document;
mod source;

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::paths::{ConfigPaths, ensure_parent_dir, temp_path};
use crate::util::sha256_hex;

pub use backup::{
    ABSENT_SUFFIX, BackupClock, BackupEntry, BackupKind, BackupLock, Backups, Clock, STAMP_FORMAT,
    Stamp, SystemClock,
};
pub use cache::{Generation, ReadCache};
pub use document::{
    Account, ClaudeSettings, CodexAuth, CommanderConfig, ConfigDocument, McpConfig, McpServer,
};
pub use source::ConfigSource;

/// Point-in-time view of one source, as reported by
/// [`ConfigStore::describe_sources`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub source: ConfigSource,
    pub path: PathBuf,
    pub exists: bool,
    pub parse_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Held for the duration of a write or rollback. Serializes writers in this
/// process (mutex) and across processes (lock file).
struct WriterGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _file: BackupLock,
}

#[derive(Debug)]
pub struct ConfigStore {
    paths: ConfigPaths,
    cache: ReadCache,
    backups: Backups,
    writers: Mutex<()>,
}

impl ConfigStore {
    pub fn new(paths: ConfigPaths, cache_ttl: Duration) -> Self {
        Self::with_clock(paths, cache_ttl, Arc::new(SystemClock))
    }

    /// Like [`ConfigStore::new`] with an injected clock for backup stamps.
    pub fn with_clock(paths: ConfigPaths, cache_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let backups = Backups::new(paths.backups_dir(), clock);
        Self {
            paths,
            cache: ReadCache::new(cache_ttl),
            backups,
            writers: Mutex::new(()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(ConfigPaths::from_config(config), config.cache_ttl)
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn path_of(&self, source: ConfigSource) -> PathBuf {
        self.paths.resolve(source)
    }

    pub fn read(&self, source: ConfigSource) -> ConfigResult<Value> {
        let path = self.paths.resolve(source);
        if let Some(value) = self.cache.get(&path) {
            debug!(source = %source, "config cache hit");
            return Ok(value);
        }
        let seen = self.cache.generation(&path);
        let value = read_json(&path)?;
        self.cache.insert(&path, &value, seen);
        Ok(value)
    }

    /// Reads and decodes into the source's typed document. A file that is
    /// valid JSON but does not match the schema is [`ConfigError::Invalid`].
    pub fn read_document(&self, source: ConfigSource) -> ConfigResult<ConfigDocument> {
        let value = self.read(source)?;
        ConfigDocument::from_value(source, value)
            .map_err(|e| ConfigError::invalid(&self.paths.resolve(source), e))
    }

    /// Backs up the current file, then atomically replaces it with `value`.
    /// Returns the path of the backup (a copy, or an absence marker).
    pub fn write(&self, source: ConfigSource, value: &Value) -> ConfigResult<PathBuf> {
        let path = self.paths.resolve(source);
        let mut serialized = serde_json::to_string_pretty(value)
            .map_err(|e| ConfigError::encode(format!("failed to serialize {source}"), e))?;
        serialized.push('\n');

        let _guard = self.lock_writers()?;
        let backup = self.backups.snapshot(&path, source.file_name())?;
        let replaced = replace_file(&path, |f| f.write_all(serialized.as_bytes()));
        self.cache.invalidate(&path);
        replaced?;
        info!(source = %source, backup = %backup.display(), "config written");
        Ok(backup)
    }

    pub fn write_document(&self, doc: &ConfigDocument) -> ConfigResult<PathBuf> {
        let source = doc.source();
        let value = doc
            .to_value()
            .map_err(|e| ConfigError::encode(format!("failed to encode {source}"), e))?;
        self.write(source, &value)
    }

    /// Restores the newest content backup of `source`. Does not back up the
    /// state it overwrites. Returns the backup that was restored.
    pub fn rollback(&self, source: ConfigSource) -> ConfigResult<PathBuf> {
        let path = self.paths.resolve(source);
        let _guard = self.lock_writers()?;
        let entry = self
            .backups
            .latest_content(source.file_name())?
            .ok_or(ConfigError::NoBackup { config: source })?;
        let bytes = fs::read(&entry.path)
            .map_err(|e| ConfigError::io(format!("failed to read {}", entry.path.display()), e))?;
        let replaced = replace_file(&path, |f| f.write_all(&bytes));
        self.cache.invalidate(&path);
        replaced?;
        info!(source = %source, backup = %entry.path.display(), "config rolled back");
        Ok(entry.path)
    }

    pub fn list_backups(&self, source: ConfigSource) -> ConfigResult<Vec<BackupEntry>> {
        self.backups.list(source.file_name())
    }

    pub fn prune_backups(&self, source: ConfigSource, keep: usize) -> ConfigResult<usize> {
        let _guard = self.lock_writers()?;
        let removed = self.backups.prune(source.file_name(), keep)?;
        if removed > 0 {
            info!(source = %source, removed, keep, "pruned backups");
        }
        Ok(removed)
    }

    /// Metadata for every source. Never fails: a broken file is reported as
    /// `exists = true, parse_ok = false` with the reason in `error`.
    pub fn describe_sources(&self) -> Vec<SourceStatus> {
        ConfigSource::ALL
            .iter()
            .map(|source| describe(*source, self.paths.resolve(*source)))
            .collect()
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    fn lock_writers(&self) -> ConfigResult<WriterGuard<'_>> {
        let local = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        let file = self.backups.lock()?;
        Ok(WriterGuard {
            _local: local,
            _file: file,
        })
    }
}

fn read_json(path: &Path) -> ConfigResult<Value> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(ConfigError::io(
                format!("cannot read {}", path.display()),
                e,
            ));
        }
    };
    serde_json::from_str(&raw).map_err(|e| ConfigError::invalid(path, e))
}

/// Writes `<path>.tmp` through `fill`, syncs it, and renames it over `path`.
/// The temp file is removed if any step fails.
fn replace_file(
    path: &Path,
    fill: impl FnOnce(&mut File) -> std::io::Result<()>,
) -> ConfigResult<()> {
    ensure_parent_dir(path)?;
    let tmp = temp_path(path);
    let written = File::create(&tmp).and_then(|mut f| {
        fill(&mut f)?;
        f.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(ConfigError::io(format!("failed to write {}", tmp.display()), e));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(ConfigError::io(
            format!("failed to move {} -> {}", tmp.display(), path.display()),
            e,
        ));
    }
    Ok(())
}

fn describe(source: ConfigSource, path: PathBuf) -> SourceStatus {
    let mut status = SourceStatus {
        source,
        path,
        exists: false,
        parse_ok: false,
        size: None,
        modified: None,
        sha256: None,
        error: None,
    };
    let meta = match fs::metadata(&status.path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return status,
        Err(e) => {
            warn!(source = %source, error = %e, "cannot stat config source");
            status.exists = true;
            status.error = Some(e.to_string());
            return status;
        }
    };
    status.exists = true;
    status.size = Some(meta.len());
    status.modified = meta.modified().ok().map(DateTime::<Utc>::from);
    match fs::read(&status.path) {
        Ok(bytes) => {
            status.sha256 = Some(sha256_hex(&bytes));
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(_) => status.parse_ok = true,
                Err(e) => status.error = Some(e.to_string()),
            }
        }
        Err(e) => status.error = Some(e.to_string()),
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn store(ttl: Duration) -> (TempDir, ConfigStore) {
        let tmp = tempdir().expect("tempdir");
        let paths = ConfigPaths::new(tmp.path().join("home"), tmp.path().join("cfg"));
        (tmp, ConfigStore::new(paths, ttl))
    }

    #[test]
    fn missing_and_corrupt_files_are_distinguishable() {
        let (_tmp, store) = store(Duration::ZERO);
        let missing = store.read(ConfigSource::CursorMcp).unwrap_err();
        assert_eq!(missing.kind(), ConfigErrorKind::NotFound);

        let path = store.path_of(ConfigSource::CursorMcp);
        ensure_parent_dir(&path).expect("parent");
        fs::write(&path, "{ not json").expect("write");
        let corrupt = store.read(ConfigSource::CursorMcp).unwrap_err();
        assert_eq!(corrupt.kind(), ConfigErrorKind::Invalid);
        assert_eq!(corrupt.status(), 422);
    }

    #[test]
    fn write_is_pretty_with_trailing_newline_and_leaves_no_temp() {
        let (_tmp, store) = store(Duration::ZERO);
        let value = json!({"model": "opus"});
        store.write(ConfigSource::ClaudeSettings, &value).expect("write");
        let path = store.path_of(ConfigSource::ClaudeSettings);
        let raw = fs::read_to_string(&path).expect("read");
        assert_eq!(raw, "{\n  \"model\": \"opus\"\n}\n");
        assert!(!temp_path(&path).exists());
        assert_eq!(store.read(ConfigSource::ClaudeSettings).expect("read"), value);
    }

    #[test]
    fn every_write_adds_exactly_one_backup() {
        let (_tmp, store) = store(Duration::ZERO);
        for i in 0..3 {
            store
                .write(ConfigSource::CodexAuth, &json!({"n": i}))
                .expect("write");
            let n = store.list_backups(ConfigSource::CodexAuth).expect("list").len();
            assert_eq!(n, i + 1);
        }
    }

    #[test]
    fn first_write_records_absence() {
        let (_tmp, store) = store(Duration::ZERO);
        let backup = store
            .write(ConfigSource::Commander, &json!({"accounts": []}))
            .expect("write");
        assert!(backup.to_string_lossy().ends_with("commander.json.absent"));
        let err = store.rollback(ConfigSource::Commander).unwrap_err();
        assert!(matches!(err, ConfigError::NoBackup { .. }));
        // Rollback failure leaves the live file alone.
        assert_eq!(
            store.read(ConfigSource::Commander).expect("read"),
            json!({"accounts": []})
        );
    }

    #[test]
    fn write_a_write_b_rollback_restores_a() {
        let (_tmp, store) = store(Duration::from_secs(60));
        let a = json!({"model": "a"});
        let b = json!({"model": "b"});
        store.write(ConfigSource::ClaudeSettings, &a).expect("write a");
        store.write(ConfigSource::ClaudeSettings, &b).expect("write b");
        assert_eq!(store.read(ConfigSource::ClaudeSettings).expect("read"), b);
        store.rollback(ConfigSource::ClaudeSettings).expect("rollback");
        assert_eq!(store.read(ConfigSource::ClaudeSettings).expect("read"), a);
    }

    #[test]
    fn cached_reads_do_not_see_external_edits_until_invalidated() {
        let (_tmp, store) = store(Duration::from_secs(60));
        store
            .write(ConfigSource::ClaudeState, &json!({"v": 1}))
            .expect("write");
        assert_eq!(store.read(ConfigSource::ClaudeState).expect("read"), json!({"v": 1}));
        fs::write(store.path_of(ConfigSource::ClaudeState), "{\"v\": 2}").expect("edit");
        assert_eq!(store.read(ConfigSource::ClaudeState).expect("read"), json!({"v": 1}));
        store.invalidate_all();
        assert_eq!(store.read(ConfigSource::ClaudeState).expect("read"), json!({"v": 2}));
    }

    #[test]
    fn read_document_rejects_schema_mismatch() {
        let (_tmp, store) = store(Duration::ZERO);
        store
            .write(ConfigSource::Commander, &json!({"accounts": "nope"}))
            .expect("write");
        let err = store.read_document(ConfigSource::Commander).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::Invalid);
    }

    #[test]
    fn describe_reports_broken_files_without_failing() {
        let (_tmp, store) = store(Duration::ZERO);
        store
            .write(ConfigSource::ClaudeSettings, &json!({}))
            .expect("write");
        let broken = store.path_of(ConfigSource::CodexAuth);
        ensure_parent_dir(&broken).expect("parent");
        fs::write(&broken, "nope").expect("write");

        let statuses = store.describe_sources();
        assert_eq!(statuses.len(), ConfigSource::ALL.len());
        let by = |s: ConfigSource| {
            statuses
                .iter()
                .find(|st| st.source == s)
                .cloned()
                .expect("status present")
        };
        let settings = by(ConfigSource::ClaudeSettings);
        assert!(settings.exists && settings.parse_ok);
        assert_eq!(settings.sha256.as_deref(), Some(sha256_hex("{}\n").as_str()));
        let auth = by(ConfigSource::CodexAuth);
        assert!(auth.exists && !auth.parse_ok);
        assert!(auth.error.is_some());
        let mcp = by(ConfigSource::CursorMcp);
        assert!(!mcp.exists && !mcp.parse_ok);
    }

    #[test]
    fn prune_then_rollback_uses_survivor() {
        let (_tmp, store) = store(Duration::ZERO);
        for i in 0..4 {
            store
                .write(ConfigSource::CursorMcp, &json!({"mcpServers": {}, "n": i}))
                .expect("write");
        }
        assert_eq!(store.prune_backups(ConfigSource::CursorMcp, 1).expect("prune"), 3);
        store.rollback(ConfigSource::CursorMcp).expect("rollback");
        assert_eq!(
            store.read(ConfigSource::CursorMcp).expect("read"),
            json!({"mcpServers": {}, "n": 2})
        );
    }
}
