//! Encrypted at-rest store of backup job configurations.
//!
//! The vault is a single file holding an encrypted JSON object that maps job
//! name to [`BackupJobConfig`]. Every mutation loads the full mapping, applies
//! the change and writes the full mapping back through a uniquely named temp
//! file + rename,
//! so the file on disk is always either the old or the new mapping.
//!
//! Two processes modifying the same vault are not serialized: last writer wins.

pub mod crypto;
pub mod model;

pub use crypto::VaultKey;
pub use model::{BackupJobConfig, Password};

use crate::utils::VaultError;
use crypto::Envelope;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Job name → configuration.
pub type JobMap = HashMap<String, BackupJobConfig>;

pub struct Vault {
    path: PathBuf,
    key: VaultKey,
}

impl Vault {
    pub fn new(path: impl Into<PathBuf>, key: VaultKey) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decrypt the whole mapping. A missing file is an empty vault.
    pub fn load(&self) -> Result<JobMap, VaultError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No vault file yet, starting empty");
                return Ok(JobMap::new());
            }
            Err(e) => return Err(VaultError::Io(e)),
        };

        let envelope: Envelope = serde_json::from_slice(&raw)
            .map_err(|e| VaultError::Corrupt(format!("malformed vault envelope: {e}")))?;
        let plaintext = crypto::decrypt(&self.key, &envelope)?;
        let jobs: JobMap = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Corrupt(format!("malformed vault payload: {e}")))?;

        debug!(path = %self.path.display(), jobs = jobs.len(), "Vault loaded");
        Ok(jobs)
    }

    /// Encrypt and replace the whole mapping.
    pub fn save(&self, jobs: &JobMap) -> Result<(), VaultError> {
        let write_failed = |reason: String| VaultError::WriteFailed {
            path: self.path.clone(),
            reason,
        };

        let plaintext = serde_json::to_vec(jobs).map_err(|e| write_failed(e.to_string()))?;
        let envelope = crypto::encrypt(&self.key, &plaintext);
        let bytes = serde_json::to_vec(&envelope).map_err(|e| write_failed(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| write_failed(e.to_string()))?;
        }
        write_atomic(&self.path, &bytes).map_err(|e| write_failed(e.to_string()))?;

        debug!(path = %self.path.display(), jobs = jobs.len(), "Vault saved");
        Ok(())
    }

    /// Insert a new job. A blank name defaults to the remote host.
    pub fn create(&self, job: BackupJobConfig) -> Result<BackupJobConfig, VaultError> {
        let job = job.with_default_name();
        job.validate()?;

        let mut jobs = self.load()?;
        if jobs.contains_key(&job.name) {
            return Err(VaultError::DuplicateName(job.name));
        }
        jobs.insert(job.name.clone(), job.clone());
        self.save(&jobs)?;

        info!(job = %job.name, "Backup job created");
        Ok(job)
    }

    pub fn delete(&self, name: &str) -> Result<BackupJobConfig, VaultError> {
        let mut jobs = self.load()?;
        let removed = jobs
            .remove(name)
            .ok_or_else(|| VaultError::NotFound(name.to_string()))?;
        self.save(&jobs)?;

        info!(job = %name, "Backup job deleted");
        Ok(removed)
    }

    pub fn exists(&self, name: &str) -> Result<bool, VaultError> {
        Ok(self.load()?.contains_key(name))
    }

    pub fn get(&self, name: &str) -> Result<Option<BackupJobConfig>, VaultError> {
        Ok(self.load()?.remove(name))
    }

    /// All jobs sorted by name.
    pub fn list(&self) -> Result<Vec<BackupJobConfig>, VaultError> {
        let mut jobs: Vec<_> = self.load()?.into_values().collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    /// Replace `name` with `updated`, which may carry a new name.
    ///
    /// The old entry is removed and the new one inserted in a single save.
    pub fn modify(&self, name: &str, updated: BackupJobConfig) -> Result<BackupJobConfig, VaultError> {
        let updated = updated.with_default_name();
        updated.validate()?;

        let mut jobs = self.load()?;
        if jobs.remove(name).is_none() {
            return Err(VaultError::NotFound(name.to_string()));
        }
        if jobs.contains_key(&updated.name) {
            return Err(VaultError::DuplicateName(updated.name));
        }
        jobs.insert(updated.name.clone(), updated.clone());
        self.save(&jobs)?;

        if updated.name != name {
            info!(old = %name, new = %updated.name, "Backup job renamed");
        } else {
            info!(job = %name, "Backup job modified");
        }
        Ok(updated)
    }

    pub fn set_active(&self, name: &str, active: bool) -> Result<BackupJobConfig, VaultError> {
        let mut job = self
            .get(name)?
            .ok_or_else(|| VaultError::NotFound(name.to_string()))?;
        job.active = active;
        self.modify(name, job)
    }
}

/// Replace `path` with `contents` all-or-nothing: write a uniquely named
/// sibling temp file, fsync it, then rename it over the target.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    write_atomic_with(path, |file| file.write_all(contents))
}

/// Concurrent writers each get their own temp file, so the target always ends
/// up as one complete payload. The temp file is removed if anything fails.
fn write_atomic_with(
    path: &Path,
    write: impl FnOnce(&mut File) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut prefix = std::ffi::OsString::from(".");
    prefix.push(path.file_name().unwrap_or_default());
    prefix.push(".");

    // created with mode 0600 on unix
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    if let Ok(dir) = File::open(dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}
