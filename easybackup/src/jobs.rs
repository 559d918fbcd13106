//! Job management - runs vault-stored jobs through the executor.
//!
//! The vault is read before a run starts and never touched while one is in
//! progress. Runs of the same job within this process are serialized by name;
//! two separate processes running the same job are not.

use crate::executor::{BackupExecutor, RunReport};
use crate::remote::RemoteTransport;
use crate::utils::{JobError, VaultError};
use crate::vault::{BackupJobConfig, Vault};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub struct JobManager<T> {
    vault: Vault,
    executor: BackupExecutor<T>,
    running_jobs: Mutex<HashSet<String>>,
}

impl<T: RemoteTransport> JobManager<T> {
    pub fn new(vault: Vault, executor: BackupExecutor<T>) -> Self {
        Self {
            vault,
            executor,
            running_jobs: Mutex::new(HashSet::new()),
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn executor(&self) -> &BackupExecutor<T> {
        &self.executor
    }

    /// Run the named job, whether or not it is active.
    pub async fn run(&self, name: &str) -> Result<RunReport, JobError> {
        let job = self
            .vault
            .get(name)?
            .ok_or_else(|| VaultError::NotFound(name.to_string()))?;
        self.run_job(&job).await
    }

    /// Run every active job in name order. One job failing does not stop the
    /// rest; cancellation does.
    pub async fn run_all_active(&self) -> Result<Vec<(String, Result<RunReport, JobError>)>, JobError> {
        let jobs = self.vault.list()?;
        let mut outcomes = Vec::new();

        for job in jobs {
            if !job.active {
                debug!("Skipping inactive job '{}'", job.name);
                continue;
            }
            if self.executor.cancel_token().is_cancelled() {
                warn!("Cancelled, not starting job '{}'", job.name);
                break;
            }
            let outcome = self.run_job(&job).await;
            outcomes.push((job.name, outcome));
        }

        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        info!("Ran {} active job(s), {} failed", outcomes.len(), failed);
        Ok(outcomes)
    }

    async fn run_job(&self, job: &BackupJobConfig) -> Result<RunReport, JobError> {
        let _running = RunningGuard::claim(&self.running_jobs, &job.name)?;
        Ok(self.executor.run(job).await?)
    }
}

/// Holds a job name in the running set until dropped, including when the run
/// future is dropped mid-flight.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> RunningGuard<'a> {
    fn claim(running: &'a Mutex<HashSet<String>>, name: &str) -> Result<Self, JobError> {
        let mut set = running.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(name.to_string()) {
            return Err(JobError::AlreadyRunning(name.to_string()));
        }
        Ok(Self {
            running,
            name: name.to_string(),
        })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorOptions;
    use crate::remote::fake::{FakeRemote, Transfer};
    use crate::utils::BackupError;
    use crate::vault::{Password, VaultKey};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn job(name: &str, active: bool) -> BackupJobConfig {
        BackupJobConfig {
            name: name.into(),
            local_path: "/data/".into(),
            remote_path: "/backups".into(),
            ssh_user: "alice".into(),
            ssh_password: Password::new("pw"),
            remote_host: "nas1".into(),
            ssh_port: 22,
            keep_days: None,
            active,
        }
    }

    fn manager(dir: &TempDir, remote: FakeRemote) -> JobManager<FakeRemote> {
        let vault = Vault::new(dir.path().join("vault.json"), VaultKey::generate());
        JobManager::new(vault, BackupExecutor::new(remote, ExecutorOptions::default()))
    }

    #[tokio::test]
    async fn test_run_named_job() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, FakeRemote::new("/backups"));
        manager.vault().create(job("alpha", false)).unwrap();

        let report = manager.run("alpha").await.unwrap();
        assert_eq!(report.job, "alpha");
        assert_eq!(manager.executor().transport().latest(), Some(report.snapshot_path));
    }

    #[tokio::test]
    async fn test_run_unknown_job() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, FakeRemote::new("/backups"));

        let err = manager.run("ghost").await.unwrap_err();
        assert!(matches!(err, JobError::Vault(VaultError::NotFound(_))));
        assert!(manager.executor().transport().commands().is_empty());
    }

    #[tokio::test]
    async fn test_run_all_active_skips_inactive_and_continues_past_failures() {
        let dir = TempDir::new().unwrap();
        let mut remote = FakeRemote::new("/backups");
        remote.transfer = Transfer::Exit(12);
        let manager = manager(&dir, remote);
        manager.vault().create(job("alpha", true)).unwrap();
        manager.vault().create(job("beta", false)).unwrap();
        manager.vault().create(job("gamma", true)).unwrap();

        let outcomes = manager.run_all_active().await.unwrap();
        let names: Vec<&str> = outcomes.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "gamma"]);
        assert!(outcomes.iter().all(|(_, r)| matches!(
            r,
            Err(JobError::Backup(BackupError::TransferError(_)))
        )));
        assert_eq!(manager.executor().transport().transfers().len(), 2);
    }

    #[tokio::test]
    async fn test_same_job_cannot_run_twice_at_once() {
        let dir = TempDir::new().unwrap();
        let mut remote = FakeRemote::new("/backups");
        remote.transfer = Transfer::Hang;
        let manager = Arc::new(manager(&dir, remote));
        manager.vault().create(job("alpha", true)).unwrap();

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run("alpha").await })
        };
        while manager.executor().transport().transfers().is_empty() {
            tokio::task::yield_now().await;
        }

        let err = manager.run("alpha").await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyRunning(name) if name == "alpha"));

        manager.executor().cancel_token().cancel();
        let cancelled = first.await.unwrap().unwrap_err();
        assert!(matches!(cancelled, JobError::Backup(BackupError::Cancelled)));

        // guard released once the run ends
        assert!(manager.running_jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_run_releases_the_job() {
        let dir = TempDir::new().unwrap();
        let mut remote = FakeRemote::new("/backups");
        remote.transfer = Transfer::Hang;
        let manager = manager(&dir, remote);
        manager.vault().create(job("alpha", true)).unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(50), manager.run("alpha")).await;
        assert!(abandoned.is_err());
        assert_eq!(manager.executor().transport().transfers().len(), 1);
        assert!(manager.running_jobs.lock().unwrap().is_empty());

        // the same job can start again
        let again = tokio::time::timeout(Duration::from_millis(50), manager.run("alpha")).await;
        assert!(again.is_err());
        assert_eq!(manager.executor().transport().transfers().len(), 2);
    }
}
