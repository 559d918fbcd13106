//! Backup run executor - drives one job through precheck, transfer and rotation.
//!
//! ```text
//! Precheck -> Discovering -> Transferring -> Rotating -> [Pruning] -> Done
//!     \            \              \             \
//!      +------------+--------------+-------------+----> Failed
//! ```
//!
//! `latest` is only repointed after the transfer succeeded, and pruning only
//! ever runs after that, so a failed run never removes or replaces anything
//! that was already published.

pub mod snapshot;

use crate::config::Config;
use crate::remote::{self, CommandOutput, RemoteTransport, SshTarget, SyncRequest};
use crate::transfer::progress::{self, ProgressCallback, ProgressEvent, TransferProgress};
use crate::utils::BackupError;
use crate::vault::BackupJobConfig;
use chrono::{DateTime, Local, Utc};
use snapshot::SnapshotLayout;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Source of "now" for snapshot names.
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Precheck,
    Discovering,
    Transferring,
    Rotating,
    Pruning,
    Done,
    Failed,
}

/// Timeouts applied to remote operations.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Bound on the connectivity precheck
    pub connect_timeout: Duration,
    /// Bound on each non-transfer remote command
    pub command_timeout: Duration,
}

impl ExecutorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Outcome of a run that reached `Done`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job: String,
    /// Name of the snapshot published as `latest`
    pub snapshot: String,
    pub snapshot_path: String,
    /// Previous `latest` target, used as the hardlink base
    pub previous: Option<String>,
    pub last_progress: Option<TransferProgress>,
    /// Current-file lines seen during the transfer
    pub files_seen: usize,
    /// Snapshots removed by retention
    pub pruned: Vec<String>,
    /// Retention failure; the run itself still succeeded
    pub prune_error: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct TransferStats {
    files_seen: usize,
    last_progress: Option<TransferProgress>,
}

/// Main backup executor
pub struct BackupExecutor<T> {
    transport: T,
    options: ExecutorOptions,
    cancel_token: CancellationToken,
    progress: Option<ProgressCallback>,
    clock: Clock,
}

impl<T: RemoteTransport> BackupExecutor<T> {
    /// Create a new backup executor (no cancellation support)
    pub fn new(transport: T, options: ExecutorOptions) -> Self {
        Self::with_cancel(transport, options, CancellationToken::new())
    }

    /// Create a new backup executor with cancellation support
    pub fn with_cancel(transport: T, options: ExecutorOptions, cancel_token: CancellationToken) -> Self {
        Self {
            transport,
            options,
            cancel_token,
            progress: None,
            clock: Arc::new(Local::now),
        }
    }

    /// Receive current-file and progress events while transferring.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Execute one backup run for `job`.
    pub async fn run(&self, job: &BackupJobConfig) -> Result<RunReport, BackupError> {
        let start_time = Instant::now();
        info!(
            "Starting backup for job '{}': {} -> {}@{}:{}",
            job.name, job.local_path, job.ssh_user, job.remote_host, job.remote_path
        );

        let mut state = RunState::Precheck;
        let result = self.execute(job, &mut state, start_time).await;
        match &result {
            Ok(report) => info!(
                "Backup for job '{}' complete: snapshot {} in {:.1}s",
                job.name,
                report.snapshot,
                report.duration.as_secs_f64()
            ),
            Err(e) => error!(
                "Backup for job '{}' failed during {:?} -> {:?}: {}",
                job.name,
                state,
                RunState::Failed,
                e
            ),
        }
        result
    }

    async fn execute(
        &self,
        job: &BackupJobConfig,
        state: &mut RunState,
        start_time: Instant,
    ) -> Result<RunReport, BackupError> {
        let target = SshTarget::from(job);
        let layout = SnapshotLayout::new(&job.remote_path);

        let precheck = remote::check(&self.transport, &target, self.options.connect_timeout).await;
        if !precheck.reachable {
            return Err(BackupError::AuthOrUnreachable(precheck.detail));
        }
        info!("{}", precheck.detail);
        self.ensure_not_cancelled()?;

        self.enter(state, RunState::Discovering);
        let previous = self.discover_previous(&target, &layout).await?;
        self.ensure_not_cancelled()?;

        self.enter(state, RunState::Transferring);
        let snapshot = snapshot::snapshot_name(&(self.clock)());
        let snapshot_path = layout.snapshot_path(&snapshot);
        self.remote_ok(&target, "mkdir", &layout.mkdir_command(&snapshot))
            .await?;

        let request = SyncRequest {
            source: job.local_path.clone(),
            destination: snapshot_path.clone(),
            link_dest: snapshot::link_base(previous.as_deref(), &snapshot),
        };
        match &request.link_dest {
            Some(base) => info!("Incremental transfer into {} (hardlinking against {})", snapshot_path, base),
            None => info!("Full transfer into {}", snapshot_path),
        }
        let stats = self.transfer(&target, &request).await?;
        self.ensure_not_cancelled()?;

        self.enter(state, RunState::Rotating);
        self.remote_ok(&target, "rotate", &layout.publish_command(&snapshot))
            .await?;
        info!("Published {} as {}", snapshot_path, layout.latest_link());

        let (pruned, prune_error) = match job.keep_days {
            Some(keep_days) => {
                self.enter(state, RunState::Pruning);
                match self.prune(&target, &layout, keep_days, &snapshot).await {
                    Ok(pruned) => (pruned, None),
                    Err(e) => {
                        warn!("Retention for job '{}' failed, run still succeeded: {}", job.name, e);
                        (Vec::new(), Some(e.to_string()))
                    }
                }
            }
            None => (Vec::new(), None),
        };

        self.enter(state, RunState::Done);
        Ok(RunReport {
            job: job.name.clone(),
            snapshot,
            snapshot_path,
            previous,
            last_progress: stats.last_progress,
            files_seen: stats.files_seen,
            pruned,
            prune_error,
            duration: start_time.elapsed(),
        })
    }

    fn enter(&self, state: &mut RunState, next: RunState) {
        debug!("Run state {:?} -> {:?}", state, next);
        *state = next;
    }

    fn ensure_not_cancelled(&self) -> Result<(), BackupError> {
        if self.cancel_token.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        Ok(())
    }

    /// Read the `latest` link. A missing link is a first run; an ssh-level
    /// failure is not.
    async fn discover_previous(
        &self,
        target: &SshTarget,
        layout: &SnapshotLayout,
    ) -> Result<Option<String>, BackupError> {
        let output = self
            .remote(target, "discover", &layout.readlink_command())
            .await?;

        if output.success() {
            let previous = snapshot::parse_previous(&output.stdout);
            match &previous {
                Some(prev) => info!("Previous snapshot: {}", prev),
                None => info!("No previous snapshot found, running a full transfer"),
            }
            Ok(previous)
        } else if output.is_transport_failure() {
            Err(BackupError::Remote {
                step: "discover",
                detail: target.password.redact(&output.error_detail()),
            })
        } else {
            info!("No previous snapshot found, running a full transfer");
            Ok(None)
        }
    }

    /// Stream the transfer. Each line is classified as it arrives; output
    /// that matches neither parser is ignored.
    async fn transfer(&self, target: &SshTarget, request: &SyncRequest) -> Result<TransferStats, BackupError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut stats = TransferStats::default();

        let streamed = async {
            let consume = async {
                while let Some(line) = rx.recv().await {
                    self.observe(&line, &mut stats);
                }
            };
            let (output, ()) = tokio::join!(self.transport.run_sync_transfer(target, request, tx), consume);
            output
        };

        let output = tokio::select! {
            output = streamed => output,
            _ = self.cancel_token.cancelled() => {
                warn!("Transfer into {} cancelled, snapshot left unpublished", request.destination);
                return Err(BackupError::Cancelled);
            }
        };

        let output = output
            .map_err(|e| BackupError::TransferError(format!("failed to run rsync: {}", e)))?;
        if !output.success() {
            return Err(BackupError::TransferError(describe_exit("rsync", &output, target)));
        }
        Ok(stats)
    }

    fn observe(&self, line: &str, stats: &mut TransferStats) {
        let Some(event) = progress::classify(line) else {
            return;
        };
        match &event {
            ProgressEvent::CurrentFile { name } => {
                stats.files_seen += 1;
                debug!("Transferring {}", name);
            }
            ProgressEvent::Progress(p) => {
                debug!(
                    "Progress: {} ({}%) at {}, elapsed {}, xfr#{}, {}/{} checked",
                    progress::format_bytes(p.bytes_transferred),
                    p.percent,
                    p.speed,
                    p.elapsed_time,
                    p.transfer_index,
                    p.items_scanned,
                    p.items_total
                );
                stats.last_progress = Some(p.clone());
            }
        }
        if let Some(callback) = &self.progress {
            callback(&event);
        }
    }

    /// Remove expired snapshots. The just-published snapshot is never a candidate.
    async fn prune(
        &self,
        target: &SshTarget,
        layout: &SnapshotLayout,
        keep_days: u32,
        published: &str,
    ) -> Result<Vec<String>, BackupError> {
        let listing = self
            .remote_ok(target, "prune", &layout.list_snapshots_command())
            .await?;
        let entries = snapshot::parse_listing(&listing.stdout);
        let cutoff = snapshot::retention_cutoff(Utc::now(), keep_days);
        let expired = snapshot::select_expired(&entries, cutoff, &[published]);

        if expired.is_empty() {
            debug!("No snapshots older than {} days", keep_days);
            return Ok(expired);
        }

        self.remote_ok(target, "prune", &layout.remove_command(&expired))
            .await?;
        for name in &expired {
            info!("Pruned snapshot {} (older than {} days)", layout.snapshot_path(name), keep_days);
        }
        Ok(expired)
    }

    /// Run a remote command under the command timeout. Not cancellable: a
    /// command that already reached the remote shell runs to completion.
    async fn remote(
        &self,
        target: &SshTarget,
        step: &'static str,
        command: &str,
    ) -> Result<CommandOutput, BackupError> {
        let run = self.transport.run_remote_command(target, command);
        match tokio::time::timeout(self.options.command_timeout, run).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(BackupError::Remote {
                step,
                detail: format!("unable to run ssh: {}", e),
            }),
            Err(_) => Err(BackupError::Remote {
                step,
                detail: format!(
                    "timed out after {}s",
                    self.options.command_timeout.as_secs_f32()
                ),
            }),
        }
    }

    async fn remote_ok(
        &self,
        target: &SshTarget,
        step: &'static str,
        command: &str,
    ) -> Result<CommandOutput, BackupError> {
        let output = self.remote(target, step, command).await?;
        if !output.success() {
            return Err(BackupError::Remote {
                step,
                detail: target.password.redact(&output.error_detail()),
            });
        }
        Ok(output)
    }
}

fn describe_exit(tool: &str, output: &CommandOutput, target: &SshTarget) -> String {
    let status = match output.status {
        Some(code) => format!("exited with status {}", code),
        None => "was terminated by a signal".to_string(),
    };
    let stderr = output.stderr.trim();
    let detail = if stderr.is_empty() {
        format!("{} {}", tool, status)
    } else {
        format!("{} {}: {}", tool, status, stderr)
    };
    target.password.redact(&detail)
}
