//! Easy Backup Library
//!
//! Incremental, hardlink-deduplicated rsync-over-SSH snapshots driven by an
//! encrypted vault of job configurations.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod jobs;
pub mod remote;
pub mod transfer;
pub mod utils;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupExecutor, ExecutorOptions, RunReport};
pub use jobs::JobManager;
pub use remote::SshTransport;
pub use utils::errors::{BackupError, JobError, VaultError};
pub use vault::{BackupJobConfig, Vault, VaultKey};
