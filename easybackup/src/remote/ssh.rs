//! OpenSSH/rsync backed transport.
//!
//! Password authentication goes through `sshpass -e`, which reads the secret
//! from the `SSHPASS` environment variable, so the password is never part of
//! any argv that `ps` or a log line could show.

use super::{CommandOutput, RemoteTransport, SshTarget, SyncRequest};
use crate::config::Config;
use bytes::Bytes;
use futures_util::StreamExt;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, info};

const SSHPASS_ENV: &str = "SSHPASS";

/// Mirror the tree, delete files gone from the source, report overall progress.
const RSYNC_BASE_ARGS: &[&str] = &["-a", "--delete", "--info=progress2", "--progress"];

#[derive(Debug, Clone)]
pub struct SshTransport {
    rsync: String,
    ssh: String,
    sshpass: String,
    connect_timeout: Duration,
    strict_host_key_checking: String,
}

impl SshTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            rsync: config.tools.rsync.clone(),
            ssh: config.tools.ssh.clone(),
            sshpass: config.tools.sshpass.clone(),
            connect_timeout: config.connect_timeout(),
            strict_host_key_checking: config.ssh.strict_host_key_checking.clone(),
        }
    }

    /// `sshpass -e ssh -p <port> -o ...` as separate words.
    fn remote_shell_words(&self, target: &SshTarget) -> Vec<String> {
        vec![
            self.sshpass.clone(),
            "-e".to_string(),
            self.ssh.clone(),
            "-p".to_string(),
            target.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.strict_host_key_checking),
            "-o".to_string(),
            "NumberOfPasswordPrompts=1".to_string(),
        ]
    }

    fn rsync_args(&self, target: &SshTarget, request: &SyncRequest) -> Vec<String> {
        let mut args: Vec<String> = RSYNC_BASE_ARGS.iter().map(|a| a.to_string()).collect();
        if let Some(link_dest) = &request.link_dest {
            args.push(format!("--link-dest={link_dest}"));
        }
        // `-e` takes the whole remote shell as a single word.
        args.push("-e".to_string());
        args.push(self.remote_shell_words(target).join(" "));
        args.push(request.source.clone());
        args.push(format!("{}:{}", target.destination(), request.destination));
        args
    }

    /// Human-readable transfer command for diagnostics, password masked.
    pub fn render_transfer_command(&self, target: &SshTarget, request: &SyncRequest) -> String {
        let words: Vec<String> = self
            .rsync_args(target, request)
            .into_iter()
            .map(|a| if a.contains(' ') { format!("'{a}'") } else { a })
            .collect();
        let rendered = format!("{SSHPASS_ENV}={} {} {}", target.password, self.rsync, words.join(" "));
        target.password.redact(&rendered)
    }
}

fn frame_to_line(frame: &Bytes) -> Option<String> {
    if frame.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(frame).into_owned())
}

impl RemoteTransport for SshTransport {
    async fn run_remote_command(&self, target: &SshTarget, command: &str) -> io::Result<CommandOutput> {
        let words = self.remote_shell_words(target);
        let mut cmd = Command::new(&words[0]);
        cmd.args(&words[1..])
            .arg(target.destination())
            .arg("--")
            .arg(command)
            .env(SSHPASS_ENV, target.password.expose())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(host = %target.host, command = %command, "Running remote command");
        let mut output = CommandOutput::from(cmd.output().await?);
        output.stderr = target.password.redact(&output.stderr);
        Ok(output)
    }

    async fn run_sync_transfer(
        &self,
        target: &SshTarget,
        request: &SyncRequest,
        lines: mpsc::UnboundedSender<String>,
    ) -> io::Result<CommandOutput> {
        let mut cmd = Command::new(&self.rsync);
        cmd.args(self.rsync_args(target, request))
            .env(SSHPASS_ENV, target.password.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(command = %self.render_transfer_command(target, request), "Starting transfer");
        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("rsync stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("rsync stderr was not captured"))?;

        // rsync redraws its progress line with `\r`, so split on both.
        let read_stdout = async move {
            let mut frames = FramedRead::new(stdout, AnyDelimiterCodec::new(b"\r\n".to_vec(), b"\n".to_vec()));
            while let Some(frame) = frames.next().await {
                let frame = frame.map_err(io::Error::other)?;
                if let Some(line) = frame_to_line(&frame) {
                    // A dropped receiver only loses observability; keep draining.
                    let _ = lines.send(line);
                }
            }
            Ok::<_, io::Error>(())
        };
        let read_stderr = async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await?;
            Ok::<_, io::Error>(String::from_utf8_lossy(&buf).into_owned())
        };

        let (stdout_result, stderr_result) = tokio::join!(read_stdout, read_stderr);
        let status = child.wait().await?;
        stdout_result?;

        Ok(CommandOutput {
            status: status.code(),
            stdout: String::new(),
            stderr: target.password.redact(&stderr_result?),
        })
    }
}
