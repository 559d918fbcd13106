//! In-memory remote host understanding the commands the executor sends.

use super::{CommandOutput, RemoteTransport, SshTarget, SyncRequest};
use crate::executor::snapshot::{basename, SnapshotLayout};
use chrono::Utc;
use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub(crate) struct RemoteFs {
    /// Top-level directory name to mtime (Unix seconds)
    pub dirs: BTreeMap<String, i64>,
    /// Full target path of `latest`
    pub latest: Option<String>,
    pub commands: Vec<String>,
    pub transfers: Vec<SyncRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transfer {
    Succeed,
    Exit(i32),
    Hang,
}

pub(crate) struct FakeRemote {
    layout: SnapshotLayout,
    pub fs: Mutex<RemoteFs>,
    pub auth_ok: bool,
    pub transfer: Transfer,
    pub transfer_lines: Vec<String>,
    /// ssh exit status for `readlink`, overriding the link state
    pub readlink_status: Option<i32>,
    pub list_status: i32,
    /// Source directory mtime, copied onto the destination root by a
    /// successful transfer the way `rsync -a` does
    pub source_dir_mtime: Option<i64>,
}

impl FakeRemote {
    pub fn new(remote_path: &str) -> Self {
        Self {
            layout: SnapshotLayout::new(remote_path),
            fs: Mutex::new(RemoteFs::default()),
            auth_ok: true,
            transfer: Transfer::Succeed,
            transfer_lines: Vec::new(),
            readlink_status: None,
            list_status: 0,
            source_dir_mtime: None,
        }
    }

    /// Seed an existing snapshot, optionally pointing `latest` at it.
    pub fn with_snapshot(self, name: &str, age_days: i64, latest: bool) -> Self {
        {
            let mut fs = self.fs.lock().unwrap();
            fs.dirs
                .insert(name.to_string(), Utc::now().timestamp() - age_days * 86_400);
            if latest {
                fs.latest = Some(self.layout.snapshot_path(name));
            }
        }
        self
    }

    pub fn latest(&self) -> Option<String> {
        self.fs.lock().unwrap().latest.clone()
    }

    pub fn dirs(&self) -> Vec<String> {
        self.fs.lock().unwrap().dirs.keys().cloned().collect()
    }

    pub fn commands(&self) -> Vec<String> {
        self.fs.lock().unwrap().commands.clone()
    }

    pub fn mtime(&self, name: &str) -> Option<i64> {
        self.fs.lock().unwrap().dirs.get(name).copied()
    }

    pub fn transfers(&self) -> Vec<SyncRequest> {
        self.fs.lock().unwrap().transfers.clone()
    }

    fn exit(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> CommandOutput {
        CommandOutput {
            status: Some(status),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    fn execute(&self, command: &str) -> CommandOutput {
        let mut fs = self.fs.lock().unwrap();
        fs.commands.push(command.to_string());

        if command == "exit 0" {
            return if self.auth_ok {
                Self::exit(0, "", "")
            } else {
                Self::exit(255, "", "alice@nas1: Permission denied (password).")
            };
        }

        if command == self.layout.readlink_command() {
            if let Some(status) = self.readlink_status {
                return Self::exit(status, "", "ssh: connection reset");
            }
            return match &fs.latest {
                Some(target) => Self::exit(0, format!("{target}\n"), ""),
                None => Self::exit(1, "", ""),
            };
        }

        if command == self.layout.list_snapshots_command() {
            if self.list_status != 0 {
                return Self::exit(self.list_status, "", "find: permission denied");
            }
            let listing: String = fs
                .dirs
                .iter()
                .map(|(name, mtime)| format!("{mtime} {}\n", self.layout.snapshot_path(name)))
                .collect();
            return Self::exit(0, listing, "");
        }

        let paths = quoted_words(command);
        if command.starts_with("mkdir -p ") {
            let now = Utc::now().timestamp();
            for path in &paths {
                fs.dirs.entry(basename(path).to_string()).or_insert(now);
            }
            return Self::exit(0, "", "");
        }
        if command.starts_with("touch -c ") && command.contains("&& ln -s ") {
            // words: snapshot, link, snapshot, link
            if let Some(mtime) = paths.first().and_then(|snap| fs.dirs.get_mut(basename(snap))) {
                *mtime = Utc::now().timestamp();
            }
            fs.latest = paths.get(2).cloned();
            return Self::exit(0, "", "");
        }
        if command.starts_with("rm -rf -- ") {
            for path in &paths {
                fs.dirs.remove(basename(path));
            }
            return Self::exit(0, "", "");
        }

        Self::exit(127, "", format!("unexpected command: {command}"))
    }
}

/// Contents of each single-quoted word (no embedded quotes).
fn quoted_words(command: &str) -> Vec<String> {
    command
        .split('\'')
        .skip(1)
        .step_by(2)
        .map(str::to_string)
        .collect()
}

impl RemoteTransport for FakeRemote {
    async fn run_remote_command(&self, _target: &SshTarget, command: &str) -> io::Result<CommandOutput> {
        Ok(self.execute(command))
    }

    async fn run_sync_transfer(
        &self,
        _target: &SshTarget,
        request: &SyncRequest,
        lines: mpsc::UnboundedSender<String>,
    ) -> io::Result<CommandOutput> {
        {
            let mut fs = self.fs.lock().unwrap();
            fs.transfers.push(request.clone());
            if let (Transfer::Succeed, Some(mtime)) = (self.transfer, self.source_dir_mtime) {
                fs.dirs.insert(basename(&request.destination).to_string(), mtime);
            }
        }

        for line in &self.transfer_lines {
            let _ = lines.send(line.clone());
        }

        match self.transfer {
            Transfer::Succeed => Ok(Self::exit(0, "", "")),
            Transfer::Exit(code) => Ok(Self::exit(code, "", "rsync: some files could not be transferred")),
            Transfer::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
