//! Snapshot naming, `latest` discovery, hardlink base selection and retention.
//!
//! Remote layout under a job's destination root:
//!
//! ```text
//! <remotePath>/2024-05-01_10-00-00/...
//! <remotePath>/2024-05-02_10-00-00/...
//! <remotePath>/latest -> <remotePath>/2024-05-02_10-00-00
//! ```
//!
//! Everything here is pure; the executor sends the built commands.

use crate::remote::shell_quote;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fmt;

/// Sortable timestamp used as the snapshot directory name.
pub const SNAPSHOT_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Symbolic link at the destination root naming the newest published snapshot.
pub const LATEST_LINK: &str = "latest";

const SECONDS_PER_DAY: i64 = 86_400;

pub fn snapshot_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    at.format(SNAPSHOT_NAME_FORMAT).to_string()
}

pub fn is_snapshot_name(name: &str) -> bool {
    NaiveDateTime::parse_from_str(name, SNAPSHOT_NAME_FORMAT).is_ok()
}

/// Last path component, ignoring trailing slashes.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Paths and remote commands for one destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    root: String,
}

impl SnapshotLayout {
    pub fn new(remote_path: &str) -> Self {
        let trimmed = remote_path.trim_end_matches('/');
        let root = if trimmed.is_empty() { "/" } else { trimmed };
        Self {
            root: root.to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn join(&self, name: &str) -> String {
        if self.root == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.root)
        }
    }

    pub fn latest_link(&self) -> String {
        self.join(LATEST_LINK)
    }

    pub fn snapshot_path(&self, name: &str) -> String {
        self.join(name)
    }

    pub fn mkdir_command(&self, name: &str) -> String {
        format!("mkdir -p {}", shell_quote(&self.snapshot_path(name)))
    }

    /// Exits non-zero when the link does not exist yet.
    pub fn readlink_command(&self) -> String {
        format!("readlink {}", shell_quote(&self.latest_link()))
    }

    /// Stamp the snapshot root with the publish time, then point `latest` at
    /// it, in one remote round trip. rsync `-a` leaves the source directory's
    /// mtime on the root, and retention ages snapshots by that mtime.
    pub fn publish_command(&self, name: &str) -> String {
        let link = shell_quote(&self.latest_link());
        let snap = shell_quote(&self.snapshot_path(name));
        format!("touch -c {snap} && rm -f {link} && ln -s {snap} {link}")
    }

    /// Top-level directories as `<mtime> <path>` lines. `find` does not
    /// follow symlinks, so `latest` itself is never listed.
    pub fn list_snapshots_command(&self) -> String {
        format!(
            "find {} -mindepth 1 -maxdepth 1 -type d -exec stat -c '%Y %n' {{}} +",
            shell_quote(&self.root)
        )
    }

    pub fn remove_command(&self, names: &[String]) -> String {
        let paths: Vec<String> = names
            .iter()
            .map(|name| shell_quote(&self.snapshot_path(name)))
            .collect();
        format!("rm -rf -- {}", paths.join(" "))
    }
}

/// Target of `latest` from `readlink` output; blank output means none.
pub fn parse_previous(readlink_stdout: &str) -> Option<String> {
    let target = readlink_stdout.trim();
    (!target.is_empty()).then(|| target.to_string())
}

/// Hardlink base for a new snapshot. No base on a first run, nor when the
/// previous snapshot is the very directory being written (same-second rerun).
pub fn link_base(previous: Option<&str>, new_snapshot: &str) -> Option<String> {
    previous
        .filter(|prev| basename(prev) != new_snapshot)
        .map(str::to_string)
}

/// A top-level directory at the destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    /// Modification time, seconds since the Unix epoch
    pub modified: i64,
}

/// Parse `list_snapshots_command` output, skipping malformed lines.
pub fn parse_listing(stdout: &str) -> Vec<SnapshotEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let (mtime, path) = line.trim().split_once(' ')?;
            let modified = mtime.parse().ok()?;
            Some(SnapshotEntry {
                name: basename(path).to_string(),
                modified,
            })
        })
        .collect()
}

/// Directories modified before this instant are past the retention window.
pub fn retention_cutoff(now: DateTime<Utc>, keep_days: u32) -> i64 {
    now.timestamp() - i64::from(keep_days) * SECONDS_PER_DAY
}

/// Snapshot directories older than `cutoff`, minus `protected` names, sorted.
///
/// Only timestamp-named directories are candidates. Publishing re-stamps each
/// snapshot root; the snapshot just published is still protected by name.
pub fn select_expired(entries: &[SnapshotEntry], cutoff: i64, protected: &[&str]) -> Vec<String> {
    let mut expired: Vec<String> = entries
        .iter()
        .filter(|e| e.modified < cutoff)
        .filter(|e| is_snapshot_name(&e.name))
        .filter(|e| !protected.contains(&e.name.as_str()))
        .map(|e| e.name.clone())
        .collect();
    expired.sort();
    expired.dedup();
    expired
}
