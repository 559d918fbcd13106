//! Utility modules for easybackup.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, JobError, VaultError};
