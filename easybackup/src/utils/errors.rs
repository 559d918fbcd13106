//! Custom error types for easybackup.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the encrypted job vault.
#[derive(Error, Debug)]
pub enum VaultError {
    /// The vault file exists but does not decrypt or deserialize under the
    /// configured key. Callers must treat this as "no usable configuration".
    #[error("Vault is corrupt or was written with a different key: {0}")]
    Corrupt(String),

    /// The vault could not be saved. The previous file is left untouched.
    #[error("Failed to write vault {}: {reason}", path.display())]
    WriteFailed { path: PathBuf, reason: String },

    #[error("A backup job named '{0}' already exists")]
    DuplicateName(String),

    #[error("Backup job '{0}' not found")]
    NotFound(String),

    #[error("Invalid backup job: {0}")]
    InvalidJob(String),

    #[error("Encryption key error: {0}")]
    Key(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a backup run stopped before reaching `Done`.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Precheck failed. No remote changes were made.
    #[error("Remote host unreachable or authentication failed: {0}")]
    AuthOrUnreachable(String),

    /// The copy tool exited non-zero. A partial, unpublished snapshot may remain.
    #[error("Transfer failed: {0}")]
    TransferError(String),

    #[error("Remote command failed during {step}: {detail}")]
    Remote { step: &'static str, detail: String },

    #[error("Backup cancelled")]
    Cancelled,
}

/// Errors surfaced by the job-management layer.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("Backup job '{0}' is already running")]
    AlreadyRunning(String),
}
