//! Connectivity and authentication precheck.
//!
//! Runs a no-op command on the remote host before any remote mutation and
//! sorts the outcome into success, authentication failure or other failure.
//! Never returns an error: the caller decides whether to abort.

use super::{RemoteTransport, SshTarget};
use std::time::Duration;

/// stderr markers that identify a rejected login.
pub const AUTH_FAILURE_MARKERS: &[&str] = &["Permission denied", "Authentication failed"];

const NOOP_COMMAND: &str = "exit 0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecheckOutcome {
    Reachable,
    AuthFailed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecheckResult {
    pub reachable: bool,
    pub outcome: PrecheckOutcome,
    pub detail: String,
}

impl PrecheckResult {
    fn new(outcome: PrecheckOutcome, detail: impl Into<String>) -> Self {
        Self {
            reachable: outcome == PrecheckOutcome::Reachable,
            outcome,
            detail: detail.into(),
        }
    }
}

/// Verify `target` is reachable and its credentials authenticate, within `timeout`.
pub async fn check<T: RemoteTransport>(
    transport: &T,
    target: &SshTarget,
    timeout: Duration,
) -> PrecheckResult {
    if target.password.is_empty() {
        return PrecheckResult::new(
            PrecheckOutcome::Failed,
            "A password is required for password authentication.",
        );
    }

    let run = transport.run_remote_command(target, NOOP_COMMAND);
    let output = match tokio::time::timeout(timeout, run).await {
        Err(_) => {
            return PrecheckResult::new(
                PrecheckOutcome::Failed,
                format!("SSH connection timed out after {}s.", timeout.as_secs_f32()),
            )
        }
        Ok(Err(e)) => {
            return PrecheckResult::new(
                PrecheckOutcome::Failed,
                format!("Unable to run ssh: {e}"),
            )
        }
        Ok(Ok(output)) => output,
    };

    if output.success() {
        return PrecheckResult::new(PrecheckOutcome::Reachable, "SSH connection successful.");
    }

    if AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| output.stderr.contains(marker))
    {
        PrecheckResult::new(
            PrecheckOutcome::AuthFailed,
            "Authentication failed: incorrect username or password.",
        )
    } else {
        PrecheckResult::new(
            PrecheckOutcome::Failed,
            format!(
                "SSH connection failed: {}",
                target.password.redact(&output.error_detail())
            ),
        )
    }
}
