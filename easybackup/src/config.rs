//! Configuration management for easybackup.
//!
//! Loads configuration from a TOML file with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `vault.path`.
pub const ENV_VAULT_PATH: &str = "EASYBACKUP_VAULT";
/// Environment variable carrying a base64 vault key; wins over `vault.key_file`.
pub const ENV_VAULT_KEY: &str = "EASYBACKUP_VAULT_KEY";
/// Environment variable overriding `log.level`.
pub const ENV_LOG_LEVEL: &str = "EASYBACKUP_LOG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Encrypted job vault
    #[serde(default = "default_vault_path")]
    pub path: PathBuf,

    /// File holding the base64 vault key (created on first use, mode 0600)
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Upper bound for the connectivity precheck
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound for bookkeeping commands (mkdir, readlink, symlink swap, pruning)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Value passed as `-o StrictHostKeyChecking=`
    #[serde(default = "default_strict_host_key_checking")]
    pub strict_host_key_checking: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_rsync")]
    pub rsync: String,

    #[serde(default = "default_ssh")]
    pub ssh: String,

    #[serde(default = "default_sshpass")]
    pub sshpass: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_vault_path() -> PathBuf {
    home_dir().join(".easybackup_configs.enc")
}

fn default_key_file() -> PathBuf {
    home_dir().join(".easybackup").join("vault.key")
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_command_timeout_secs() -> u64 {
    60
}

fn default_strict_host_key_checking() -> String {
    "accept-new".to_string()
}

fn default_rsync() -> String {
    "rsync".to_string()
}

fn default_ssh() -> String {
    "ssh".to_string()
}

fn default_sshpass() -> String {
    "sshpass".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: default_vault_path(),
            key_file: default_key_file(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            strict_host_key_checking: default_strict_host_key_checking(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            rsync: default_rsync(),
            ssh: default_ssh(),
            sshpass: default_sshpass(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vault: VaultConfig::default(),
            ssh: SshConfig::default(),
            tools: ToolsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise defaults, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_VAULT_PATH).filter(|v| !v.is_empty()) {
            self.vault.path = PathBuf::from(path);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.log.level = level;
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh.command_timeout_secs)
    }
}
