use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeDelta, Utc};
use fs2::FileExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};

/// ISO-8601 with `:` and `.` replaced by `-`, always 24 characters.
pub const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";
/// Suffix of the marker written when there was no file to copy.
pub const ABSENT_SUFFIX: &str = ".absent";
pub const LOCK_FILE_NAME: &str = ".lock";

const STAMP_LEN: usize = 24;
const SEQ_WIDTH: usize = 6;
const MAX_SEQ: u32 = 999_999;
const CREATE_ATTEMPTS: usize = 64;

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Name of one backup directory: a millisecond timestamp plus an optional
/// sequence number for stamps that would otherwise not sort after their
/// predecessor.
///
/// Ordering on `(at, seq)` agrees with byte ordering of [`Stamp::name`]:
/// the base is fixed width and a bare base is a prefix of its suffixed forms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    at: DateTime<Utc>,
    seq: u32,
}

impl Stamp {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            at: at.trunc_subsecs(3),
            seq: 0,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn name(&self) -> String {
        let base = self.at.format(STAMP_FORMAT).to_string();
        if self.seq == 0 {
            base
        } else {
            format!("{base}-{:0width$}", self.seq, width = SEQ_WIDTH)
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let base = name.get(..STAMP_LEN)?;
        let at = NaiveDateTime::parse_from_str(base, STAMP_FORMAT)
            .ok()?
            .and_utc();
        let seq = match &name[STAMP_LEN..] {
            "" => 0,
            rest => {
                let digits = rest.strip_prefix('-')?;
                if digits.len() != SEQ_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok()?
            }
        };
        Some(Self { at, seq })
    }

    fn successor(&self) -> Self {
        if self.seq < MAX_SEQ {
            Self {
                at: self.at,
                seq: self.seq + 1,
            }
        } else {
            Self {
                at: self.at + TimeDelta::milliseconds(1),
                seq: 0,
            }
        }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for Stamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

/// Hands out strictly increasing stamps, even when the wall clock stalls or
/// steps backwards.
#[derive(Debug)]
pub struct BackupClock {
    clock: Arc<dyn Clock>,
    last: Mutex<Option<Stamp>>,
}

impl BackupClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    /// Raises the floor so the next stamp sorts after `stamp`.
    pub fn observe(&self, stamp: &Stamp) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref().is_none_or(|prev| stamp > prev) {
            *last = Some(stamp.clone());
        }
    }

    pub fn next_stamp(&self) -> Stamp {
        let now = Stamp::new(self.clock.now());
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match last.as_ref() {
            Some(prev) if now <= *prev => prev.successor(),
            _ => now,
        };
        *last = Some(next.clone());
        next
    }
}

impl Default for BackupClock {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Content,
    /// The source did not exist when it was overwritten.
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub stamp: Stamp,
    pub path: PathBuf,
    pub kind: BackupKind,
}

/// Exclusive advisory lock on `<backups>/.lock`, released on drop.
#[derive(Debug)]
pub struct BackupLock {
    file: File,
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// The `commander-backups` directory: timestamp subdirectories holding one
/// file (or absence marker) per backed-up source.
#[derive(Debug)]
pub struct Backups {
    root: PathBuf,
    clock: BackupClock,
    seeded: Mutex<bool>,
}

impl Backups {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock: BackupClock::new(clock),
            seeded: Mutex::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock(&self) -> ConfigResult<BackupLock> {
        fs::create_dir_all(&self.root)
            .map_err(|e| ConfigError::io(format!("failed to create {}", self.root.display()), e))?;
        let path = self.root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| ConfigError::io(format!("failed opening {}", path.display()), e))?;
        file.lock_exclusive()
            .map_err(|e| ConfigError::io(format!("failed locking {}", path.display()), e))?;
        Ok(BackupLock { file })
    }

    /// Copies `current` (or records its absence) into a fresh stamp directory.
    /// Returns the path of the file written.
    pub fn snapshot(&self, current: &Path, file_name: &str) -> ConfigResult<PathBuf> {
        let dir = self.create_stamp_dir()?;
        let target = dir.join(file_name);
        match fs::copy(current, &target) {
            Ok(_) => Ok(target),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let marker = dir.join(format!("{file_name}{ABSENT_SUFFIX}"));
                File::create(&marker).map_err(|e| {
                    ConfigError::io(format!("failed writing {}", marker.display()), e)
                })?;
                Ok(marker)
            }
            Err(e) => {
                let _ = fs::remove_dir(&dir);
                Err(ConfigError::io(
                    format!("failed to back up {}", current.display()),
                    e,
                ))
            }
        }
    }

    fn seed_clock(&self) -> ConfigResult<()> {
        let mut seeded = self.seeded.lock().unwrap_or_else(PoisonError::into_inner);
        if *seeded {
            return Ok(());
        }
        if let Some(newest) = self.stamp_dirs()?.into_iter().map(|(s, _)| s).max() {
            debug!(stamp = %newest, "seeded backup clock");
            self.clock.observe(&newest);
        }
        *seeded = true;
        Ok(())
    }

    fn create_stamp_dir(&self) -> ConfigResult<PathBuf> {
        fs::create_dir_all(&self.root)
            .map_err(|e| ConfigError::io(format!("failed to create {}", self.root.display()), e))?;
        self.seed_clock()?;
        for _ in 0..CREATE_ATTEMPTS {
            let stamp = self.clock.next_stamp();
            let dir = self.root.join(stamp.name());
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!(stamp = %stamp, "backup directory already exists; bumping sequence");
                }
                Err(e) => {
                    return Err(ConfigError::io(
                        format!("failed to create {}", dir.display()),
                        e,
                    ));
                }
            }
        }
        Err(ConfigError::io(
            format!("failed to allocate a backup directory in {}", self.root.display()),
            std::io::Error::from(ErrorKind::AlreadyExists),
        ))
    }

    fn stamp_dirs(&self) -> ConfigResult<Vec<(Stamp, PathBuf)>> {
        let rd = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ConfigError::io(
                    format!("failed to list {}", self.root.display()),
                    e,
                ));
            }
        };
        let mut out = Vec::new();
        for entry in rd {
            let entry = entry
                .map_err(|e| ConfigError::io(format!("failed to list {}", self.root.display()), e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(stamp) = entry.file_name().to_str().and_then(Stamp::parse) {
                out.push((stamp, path));
            }
        }
        Ok(out)
    }

    /// Every backup of `file_name`, newest first.
    pub fn list(&self, file_name: &str) -> ConfigResult<Vec<BackupEntry>> {
        let mut dirs = self.stamp_dirs()?;
        dirs.sort_by(|a, b| b.0.cmp(&a.0));
        let marker = format!("{file_name}{ABSENT_SUFFIX}");
        let mut out = Vec::new();
        for (stamp, dir) in dirs {
            let content = dir.join(file_name);
            if content.is_file() {
                out.push(BackupEntry {
                    stamp,
                    path: content,
                    kind: BackupKind::Content,
                });
                continue;
            }
            let absent = dir.join(&marker);
            if absent.is_file() {
                out.push(BackupEntry {
                    stamp,
                    path: absent,
                    kind: BackupKind::Absent,
                });
            }
        }
        Ok(out)
    }

    pub fn latest_content(&self, file_name: &str) -> ConfigResult<Option<BackupEntry>> {
        Ok(self
            .list(file_name)?
            .into_iter()
            .find(|entry| entry.kind == BackupKind::Content))
    }

    /// Deletes all but the newest `keep` backups of `file_name`, then removes
    /// stamp directories left empty. Returns the number of backups removed.
    pub fn prune(&self, file_name: &str, keep: usize) -> ConfigResult<usize> {
        let mut removed = 0;
        for entry in self.list(file_name)?.into_iter().skip(keep) {
            fs::remove_file(&entry.path).map_err(|e| {
                ConfigError::io(format!("failed to remove {}", entry.path.display()), e)
            })?;
            removed += 1;
            if let Some(dir) = entry.path.parent()
                && dir_is_empty(dir)
            {
                let _ = fs::remove_dir(dir);
            }
        }
        Ok(removed)
    }
}

fn dir_is_empty(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut rd| rd.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[derive(Debug)]
    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn at(t: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(t)))
        }

        fn set(&self, t: DateTime<Utc>) {
            *self.0.lock().expect("clock lock") = t;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().expect("clock lock")
        }
    }

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .expect("valid timestamp")
            + TimeDelta::milliseconds(i64::from(ms))
    }

    #[test]
    fn stamp_name_is_fixed_width_and_parses_back() {
        let stamp = Stamp::new(ts(2026, 3, 9, 7, 5, 4, 21));
        assert_eq!(stamp.name(), "2026-03-09T07-05-04-021Z");
        assert_eq!(Stamp::parse(&stamp.name()), Some(stamp.clone()));
        let bumped = stamp.successor();
        assert_eq!(bumped.name(), "2026-03-09T07-05-04-021Z-000001");
        assert_eq!(Stamp::parse(&bumped.name()), Some(bumped));
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert!(Stamp::parse(".lock").is_none());
        assert!(Stamp::parse("2026-03-09T07:05:04.021Z").is_none());
        assert!(Stamp::parse("2026-03-09T07-05-04-021Z-1").is_none());
        assert!(Stamp::parse("2026-03-09T07-05-04-021Zjunk").is_none());
    }

    #[test]
    fn thousand_stamps_in_one_millisecond_across_midnight_sort_in_creation_order() {
        let clock = FixedClock::at(ts(2025, 12, 31, 23, 59, 59, 999));
        let stamps = BackupClock::new(clock.clone());
        let mut names = Vec::new();
        for i in 0..1000 {
            if i == 500 {
                clock.set(ts(2026, 1, 1, 0, 0, 0, 0));
            }
            names.push(stamps.next_stamp().name());
        }
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, names);
        sorted.dedup();
        assert_eq!(sorted.len(), 1000);
        assert!(names[500].starts_with("2026-01-01T00-00-00-000Z"));
    }

    #[test]
    fn clock_stepping_backwards_still_yields_increasing_names() {
        let clock = FixedClock::at(ts(2026, 1, 1, 12, 0, 0, 500));
        let stamps = BackupClock::new(clock.clone());
        let first = stamps.next_stamp().name();
        clock.set(ts(2026, 1, 1, 11, 59, 0, 0));
        let second = stamps.next_stamp().name();
        assert!(second > first, "{second} <= {first}");
    }

    #[test]
    fn snapshot_writes_content_or_absence_marker() {
        let tmp = tempdir().expect("tempdir");
        let backups = Backups::new(tmp.path().join("b"), Arc::new(SystemClock));
        let live = tmp.path().join("settings.json");

        let marker = backups.snapshot(&live, "settings.json").expect("snapshot");
        assert!(marker.ends_with("settings.json.absent"));

        fs::write(&live, "{}\n").expect("write live");
        let copy = backups.snapshot(&live, "settings.json").expect("snapshot");
        assert_eq!(fs::read_to_string(&copy).expect("read copy"), "{}\n");

        let listed = backups.list("settings.json").expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].kind, BackupKind::Content);
        assert_eq!(listed[1].kind, BackupKind::Absent);
        assert_eq!(
            backups.latest_content("settings.json").expect("latest").map(|e| e.path),
            Some(copy)
        );
    }

    #[test]
    fn new_instance_continues_after_existing_directories() {
        let tmp = tempdir().expect("tempdir");
        let future = ts(2090, 1, 1, 0, 0, 0, 0);
        fs::create_dir_all(tmp.path().join(Stamp::new(future).name())).expect("mkdir");
        let backups = Backups::new(tmp.path(), FixedClock::at(ts(2026, 1, 1, 0, 0, 0, 0)));
        let live = tmp.path().join("x.json");
        let path = backups.snapshot(&live, "x.json").expect("snapshot");
        let dir_name = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .expect("dir name")
            .to_string();
        assert_eq!(dir_name, "2090-01-01T00-00-00-000Z-000001");
    }

    #[test]
    fn prune_keeps_newest_and_drops_empty_dirs() {
        let tmp = tempdir().expect("tempdir");
        let backups = Backups::new(tmp.path().join("b"), Arc::new(SystemClock));
        let live = tmp.path().join("a.json");
        fs::write(&live, "1").expect("write");
        for _ in 0..4 {
            backups.snapshot(&live, "a.json").expect("snapshot");
        }
        assert_eq!(backups.prune("a.json", 1).expect("prune"), 3);
        assert_eq!(backups.list("a.json").expect("list").len(), 1);
        let dirs = fs::read_dir(backups.root())
            .expect("read_dir")
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .count();
        assert_eq!(dirs, 1);
    }
}
