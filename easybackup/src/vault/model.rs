//! Backup job records stored in the vault.

use crate::utils::VaultError;
use serde::{Deserialize, Serialize};
use std::fmt;

const REDACTED: &str = "********";

/// A secret that never prints in clear.
///
/// Serializes transparently so the encrypted payload carries the real value.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The clear-text value. Only hand this to the ssh/rsync process environment.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace every occurrence of the secret in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.0, REDACTED)
        }
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password({REDACTED})")
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// One named backup job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJobConfig {
    /// Unique key in the vault. Empty at creation means "use `remote_host`".
    #[serde(default)]
    pub name: String,
    pub local_path: String,
    pub remote_path: String,
    pub ssh_user: String,
    pub ssh_password: Password,
    pub remote_host: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Retention window in days; `None` keeps every snapshot.
    #[serde(default)]
    pub keep_days: Option<u32>,
    #[serde(default = "default_active")]
    pub active: bool,
}

pub const DEFAULT_SSH_PORT: u16 = 22;

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_active() -> bool {
    true
}

impl BackupJobConfig {
    /// Name defaulting: a blank name takes the remote host.
    pub fn with_default_name(mut self) -> Self {
        if self.name.trim().is_empty() {
            self.name = self.remote_host.trim().to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), VaultError> {
        let required = [
            ("name", &self.name),
            ("localPath", &self.local_path),
            ("remotePath", &self.remote_path),
            ("sshUser", &self.ssh_user),
            ("remoteHost", &self.remote_host),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(VaultError::InvalidJob(format!("{field} must not be empty")));
        }
        if self.ssh_port == 0 {
            return Err(VaultError::InvalidJob("sshPort must be between 1 and 65535".into()));
        }
        if self.keep_days == Some(0) {
            return Err(VaultError::InvalidJob("keepDays must be a positive number of days".into()));
        }
        Ok(())
    }

    /// Field listing with the password masked, one `key: value` per line.
    pub fn describe(&self) -> String {
        let keep_days = self
            .keep_days
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unlimited".to_string());
        format!(
            "  name: {}\n  localPath: {}\n  remotePath: {}\n  sshUser: {}\n  sshPassword: {}\n  remoteHost: {}\n  sshPort: {}\n  keepDays: {}\n  active: {}",
            self.name,
            self.local_path,
            self.remote_path,
            self.ssh_user,
            self.ssh_password,
            self.remote_host,
            self.ssh_port,
            keep_days,
            self.active,
        )
    }
}
