//! Remote collaborators: the secure remote shell and the synchronizing copy tool.
//!
//! The backup executor only talks to the remote host through
//! [`RemoteTransport`], so tests can substitute a scripted fake.

pub mod precheck;
pub mod ssh;

#[cfg(test)]
pub(crate) mod fake;

pub use precheck::{check, PrecheckOutcome, PrecheckResult};
pub use ssh::SshTransport;

use crate::vault::{BackupJobConfig, Password};
use std::future::Future;
use std::io;
use tokio::sync::mpsc;

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Password,
}

impl SshTarget {
    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl From<&BackupJobConfig> for SshTarget {
    fn from(job: &BackupJobConfig) -> Self {
        Self {
            host: job.remote_host.clone(),
            port: job.ssh_port,
            user: job.ssh_user.clone(),
            password: job.ssh_password.clone(),
        }
    }
}

/// Result of one finished external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Exit code of the ssh client itself failing (connection, auth).
    pub fn is_transport_failure(&self) -> bool {
        self.status == Some(SSH_TRANSPORT_FAILURE)
    }

    /// Trimmed stderr, or a description of the exit status when stderr is empty.
    pub fn error_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.status {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// ssh exits with 255 when the failure is its own rather than the remote command's.
pub const SSH_TRANSPORT_FAILURE: i32 = 255;

/// One mirror transfer into a fresh snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Local source tree, passed through verbatim (a trailing `/` copies the contents).
    pub source: String,
    /// Remote snapshot directory receiving the copy.
    pub destination: String,
    /// Previous snapshot to hardlink unchanged files against.
    pub link_dest: Option<String>,
}

pub trait RemoteTransport: Send + Sync {
    /// Run one shell command on the remote host and collect its output.
    fn run_remote_command(
        &self,
        target: &SshTarget,
        command: &str,
    ) -> impl Future<Output = io::Result<CommandOutput>> + Send;

    /// Run the sync tool to completion, forwarding each output line to `lines`
    /// as soon as it is read. The returned output carries the exit status and
    /// stderr; `stdout` is empty because it was streamed.
    fn run_sync_transfer(
        &self,
        target: &SshTarget,
        request: &SyncRequest,
        lines: mpsc::UnboundedSender<String>,
    ) -> impl Future<Output = io::Result<CommandOutput>> + Send;
}

/// Quote `value` as a single word for a POSIX remote shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
