//! Easy Backup - Main entry point
//!
//! Manage encrypted backup jobs and run incremental snapshots over SSH.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use easybackup::config::{Config, ENV_VAULT_KEY};
use easybackup::daemon::shutdown::ShutdownCoordinator;
use easybackup::transfer::ProgressEvent;
use easybackup::vault::Password;
use easybackup::{
    utils, BackupExecutor, BackupJobConfig, ExecutorOptions, JobManager, RunReport, SshTransport,
    Vault, VaultKey,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

const ENV_SSH_PASSWORD: &str = "EASYBACKUP_SSH_PASSWORD";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "EASYBACKUP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a new backup job in the vault
    Create(CreateArgs),

    /// List stored jobs with passwords masked
    List,

    /// Remove a job from the vault
    Delete { name: String },

    /// Change fields of a stored job
    Modify(ModifyArgs),

    /// Include a job in run-all
    Enable { name: String },

    /// Exclude a job from run-all
    Disable { name: String },

    /// Run one job now, active or not
    Run {
        name: String,

        /// Print per-file progress to stderr
        #[arg(long)]
        progress: bool,
    },

    /// Run every active job in name order
    RunAll,
}

#[derive(clap::Args, Debug)]
struct PasswordSource {
    /// Read the SSH password from the first line of stdin instead of $EASYBACKUP_SSH_PASSWORD
    #[arg(long)]
    password_stdin: bool,
}

#[derive(clap::Args, Debug)]
struct CreateArgs {
    /// Job name; defaults to the remote host
    #[arg(long, default_value = "")]
    name: String,

    #[arg(long)]
    local_path: String,

    #[arg(long)]
    remote_path: String,

    #[arg(long)]
    user: String,

    #[arg(long)]
    host: String,

    #[arg(long, default_value_t = 22)]
    port: u16,

    /// Prune snapshots older than this many days (unlimited when omitted)
    #[arg(long)]
    keep_days: Option<u32>,

    /// Store the job as inactive
    #[arg(long)]
    inactive: bool,

    #[command(flatten)]
    password: PasswordSource,
}

#[derive(clap::Args, Debug)]
struct ModifyArgs {
    name: String,

    #[arg(long)]
    rename: Option<String>,

    #[arg(long)]
    local_path: Option<String>,

    #[arg(long)]
    remote_path: Option<String>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long, conflicts_with = "keep_forever")]
    keep_days: Option<u32>,

    /// Disable retention
    #[arg(long)]
    keep_forever: bool,

    #[arg(long)]
    active: Option<bool>,

    /// Replace the stored password
    #[arg(long)]
    new_password: bool,

    #[command(flatten)]
    password: PasswordSource,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("Starting easybackup v{}", env!("CARGO_PKG_VERSION"));

    let vault = open_vault(&config)?;

    match args.command {
        Command::Create(create) => {
            let job = BackupJobConfig {
                name: create.name,
                local_path: create.local_path,
                remote_path: create.remote_path,
                ssh_user: create.user,
                ssh_password: read_password(&create.password)?,
                remote_host: create.host,
                ssh_port: create.port,
                keep_days: create.keep_days,
                active: !create.inactive,
            };
            let job = vault.create(job)?;
            println!("Created job '{}'", job.name);
        }
        Command::List => {
            let jobs = vault.list()?;
            if jobs.is_empty() {
                println!("No backup jobs configured.");
            }
            for job in jobs {
                println!("{}:\n{}", job.name, job.describe());
            }
        }
        Command::Delete { name } => {
            vault.delete(&name)?;
            println!("Deleted job '{}'", name);
        }
        Command::Modify(modify) => {
            let existing = vault
                .get(&modify.name)?
                .with_context(|| format!("Backup job '{}' not found", modify.name))?;
            let updated = apply_modify(existing, &modify)?;
            let job = vault.modify(&modify.name, updated)?;
            println!("Updated job '{}'", job.name);
        }
        Command::Enable { name } => {
            vault.set_active(&name, true)?;
            println!("Enabled job '{}'", name);
        }
        Command::Disable { name } => {
            vault.set_active(&name, false)?;
            println!("Disabled job '{}'", name);
        }
        Command::Run { name, progress } => {
            let manager = job_manager(&config, vault, progress);
            let report = manager.run(&name).await?;
            print_report(&report);
        }
        Command::RunAll => {
            let manager = job_manager(&config, vault, false);
            let outcomes = manager.run_all_active().await?;
            let mut failed = 0;
            for (name, outcome) in &outcomes {
                match outcome {
                    Ok(report) => print_report(report),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", name, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} job(s) failed", failed, outcomes.len());
            }
        }
    }

    Ok(())
}

/// `EASYBACKUP_VAULT_KEY` wins over the key file.
fn open_vault(config: &Config) -> Result<Vault> {
    let key = match std::env::var(ENV_VAULT_KEY).ok().filter(|v| !v.is_empty()) {
        Some(encoded) => VaultKey::from_base64(&encoded)?,
        None => VaultKey::load_or_create(&config.vault.key_file)
            .with_context(|| format!("Failed to load vault key {}", config.vault.key_file.display()))?,
    };
    Ok(Vault::new(config.vault.path.clone(), key))
}

fn read_password(source: &PasswordSource) -> Result<Password> {
    if source.password_stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read password from stdin")?;
        return Ok(Password::new(line.trim_end_matches(['\r', '\n'])));
    }
    match std::env::var(ENV_SSH_PASSWORD) {
        Ok(password) if !password.is_empty() => Ok(Password::new(password)),
        _ => bail!(
            "No SSH password given: set {} or pass --password-stdin",
            ENV_SSH_PASSWORD
        ),
    }
}

fn apply_modify(mut job: BackupJobConfig, modify: &ModifyArgs) -> Result<BackupJobConfig> {
    if let Some(name) = &modify.rename {
        job.name = name.clone();
    }
    if let Some(local_path) = &modify.local_path {
        job.local_path = local_path.clone();
    }
    if let Some(remote_path) = &modify.remote_path {
        job.remote_path = remote_path.clone();
    }
    if let Some(user) = &modify.user {
        job.ssh_user = user.clone();
    }
    if let Some(host) = &modify.host {
        job.remote_host = host.clone();
    }
    if let Some(port) = modify.port {
        job.ssh_port = port;
    }
    if modify.keep_forever {
        job.keep_days = None;
    } else if let Some(days) = modify.keep_days {
        job.keep_days = Some(days);
    }
    if let Some(active) = modify.active {
        job.active = active;
    }
    if modify.new_password || modify.password.password_stdin {
        job.ssh_password = read_password(&modify.password)?;
    }
    Ok(job)
}

fn job_manager(config: &Config, vault: Vault, show_progress: bool) -> JobManager<SshTransport> {
    // Create shutdown coordinator; a signal cancels the run in progress
    let shutdown_coordinator = ShutdownCoordinator::new();
    let token = shutdown_coordinator.token();
    tokio::spawn(async move {
        shutdown_coordinator.wait_for_signal().await;
    });

    let mut executor = BackupExecutor::with_cancel(
        SshTransport::new(config),
        ExecutorOptions::from_config(config),
        token,
    );
    if show_progress {
        executor = executor.with_progress(Arc::new(|event: &ProgressEvent| match event {
            ProgressEvent::CurrentFile { name } => eprintln!("  {}", name),
            ProgressEvent::Progress(p) => eprintln!(
                "  {:>3}% {} {} ({} files)",
                p.percent, p.speed, p.elapsed_time, p.transfer_index
            ),
        }));
    }
    JobManager::new(vault, executor)
}

fn print_report(report: &RunReport) {
    println!(
        "{}: snapshot {} published in {:.1}s",
        report.job,
        report.snapshot_path,
        report.duration.as_secs_f64()
    );
    if !report.pruned.is_empty() {
        println!("  pruned: {}", report.pruned.join(", "));
    }
    if let Some(e) = &report.prune_error {
        println!("  retention failed: {}", e);
    }
}
