use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod auth;
mod config;
mod drive_api;
mod organize;
mod sync;
mod util;

use drive_api::{DriveClient, RetryPolicy};
use sync::cleanup::CleanupWorker;
use sync::retry_queue::RetryQueue;
use sync::state::SyncStateStore;
use sync::uploader::{UploadCoordinator, UploaderOptions};
use sync::RemoteStore;

#[derive(Parser)]
#[command(
    name = "drivesyncd",
    version,
    about = "Mirror a watched media tree into a Google Drive folder"
)]
struct Cli {
    /// Path to config file [default: ~/.config/drivesyncd/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify Drive credentials (optionally importing a token file first)
    Auth {
        /// Token JSON obtained out of band; copied to the configured location
        #[arg(long)]
        import: Option<PathBuf>,
    },
    /// Start the sync daemon (foreground, for systemd)
    Start,
    /// Upload everything pending in the watched tree, then exit
    SyncNow,
    /// Show sync state summary (no network calls)
    Status,
    /// Classify and file downloaded media into the watched tree
    Organize {
        /// Directory to organize [default: organize.source_path from config]
        #[arg(long)]
        source: Option<PathBuf>,
    },
}

fn init_tracing(verbosity: u8, config_level: &str) {
    let default_filter = match verbosity {
        0 => format!("drivesyncd={config_level}"),
        1 => "drivesyncd=debug".into(),
        2 => "drivesyncd=trace".into(),
        _ => "trace".into(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_filter)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(cli.config.as_deref())?;
    init_tracing(cli.verbose, &cfg.general.log_level);

    match cli.command {
        Command::Auth { import } => {
            let token_mgr = Arc::new(auth::TokenManager::new(&cfg)?);
            if let Some(path) = import {
                let tokens = auth::load_tokens(&path)?;
                token_mgr.import_tokens(tokens).await?;
                tracing::info!(path = %path.display(), "token file imported");
            }
            let client = DriveClient::new(token_mgr, RetryPolicy::from_config(&cfg.retry));
            let account = client
                .about()
                .await
                .context("Drive authentication failed")?;
            println!("Authenticated as {account}");
        }
        Command::Start => run_daemon(&cfg).await?,
        Command::SyncNow => {
            let pipeline = build_pipeline(&cfg).await?;
            let submitted = pipeline.coordinator.clone().scan_existing().await?;
            pipeline.state.flush()?;
            println!("sync complete: {submitted} file(s) submitted");
            if !pipeline.retry_queue.is_empty() {
                println!(
                    "{} file(s) queued for retry — run the daemon to drain them",
                    pipeline.retry_queue.len()
                );
            }
        }
        Command::Status => print_status(&cfg)?,
        Command::Organize { source } => {
            let classifier_cmd = cfg
                .organize
                .classifier_cmd
                .as_deref()
                .context("organize.classifier_cmd is not configured")?;
            let source = source
                .or_else(|| cfg.organize.source_path.clone())
                .context("No source directory: pass --source or set organize.source_path")?;

            let classifier = organize::CommandClassifier::new(classifier_cmd);
            let moved = organize::organize_tree(&source, &cfg.sync.local_path, &classifier)?;
            println!("organized {moved} media file(s) into {}", cfg.sync.local_path.display());
        }
    }

    Ok(())
}

/// The shared upload pipeline: authenticated client (the credential check
/// is fatal), state store, retry queue, coordinator.
struct Pipeline {
    coordinator: Arc<UploadCoordinator>,
    state: Arc<SyncStateStore>,
    retry_queue: Arc<RetryQueue>,
    store: Arc<dyn RemoteStore>,
}

async fn build_pipeline(cfg: &config::Config) -> Result<Pipeline> {
    let state = Arc::new(SyncStateStore::load(&cfg.sync.state_path()?)?);
    let retry_queue = Arc::new(RetryQueue::load(
        &cfg.sync.queue_path()?,
        cfg.retry.max_retries,
    )?);

    let token_mgr = Arc::new(auth::TokenManager::new(cfg)?);
    let client = Arc::new(DriveClient::new(
        token_mgr,
        RetryPolicy::from_config(&cfg.retry),
    ));

    let account = client
        .about()
        .await
        .context("Drive authentication failed")?;
    tracing::info!(account = %account, "authenticated with Google Drive");

    tokio::fs::create_dir_all(&cfg.sync.local_path)
        .await
        .with_context(|| format!("Failed to create sync root: {}", cfg.sync.local_path.display()))?;

    let store: Arc<dyn RemoteStore> = client;
    let coordinator = Arc::new(UploadCoordinator::new(
        store.clone(),
        state.clone(),
        retry_queue.clone(),
        cfg.sync.local_path.clone(),
        cfg.sync.drive_folder_id.clone(),
        UploaderOptions {
            max_concurrent: cfg.general.max_concurrent_uploads,
            idle_poll: Duration::from_secs(cfg.retry.idle_poll_secs),
            pause: Duration::from_secs(cfg.retry.pause_secs),
        },
    ));

    Ok(Pipeline {
        coordinator,
        state,
        retry_queue,
        store,
    })
}

async fn run_daemon(cfg: &config::Config) -> Result<()> {
    let Pipeline {
        coordinator,
        state,
        retry_queue: _,
        store,
    } = build_pipeline(cfg).await?;

    // Catch up on files that arrived while the daemon was down.
    tracing::info!(root = %cfg.sync.local_path.display(), "running initial scan");
    match coordinator.clone().scan_existing().await {
        Ok(submitted) => tracing::info!(submitted, "initial scan complete"),
        Err(e) => tracing::error!(error = %format!("{e:#}"), "initial scan failed"),
    }

    let (mut events, _watcher_handle) = sync::local_watcher::start_watcher(
        &cfg.sync.local_path,
        Duration::from_millis(cfg.general.debounce_ms),
    )?;

    let retry_runner = coordinator.clone();
    tokio::spawn(async move { retry_runner.run_retry_loop().await });

    let cleanup = CleanupWorker::new(
        store,
        state.clone(),
        cfg.cleanup.stale_after_days,
        cfg.cleanup.sweep_interval_hours,
    );
    tokio::spawn(cleanup.run());

    // SIGTERM handling (for systemd graceful stop)
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let mut flush_timer =
        tokio::time::interval(Duration::from_secs(cfg.general.flush_interval_secs.max(1)));
    flush_timer.tick().await; // consume the initial instant tick

    tracing::info!("drivesyncd daemon ready");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }

            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }

            Some(event) = events.recv() => {
                tracing::debug!(path = %event.path.display(), kind = ?event.kind, "local change detected");
                coordinator.clone().spawn_upload(event.path);
            }

            _ = flush_timer.tick() => {
                if let Err(e) = state.flush() {
                    tracing::error!(error = %e, "periodic state flush failed");
                }
            }
        }
    }

    // Watcher intake stops here; in-flight uploads run to completion on
    // their own tasks. Persist what we know and exit.
    state.flush()?;
    tracing::info!("drivesyncd stopped");
    Ok(())
}

/// Print a sync state summary from the persisted documents.
fn print_status(cfg: &config::Config) -> Result<()> {
    let state_path = cfg.sync.state_path()?;
    let queue_path = cfg.sync.queue_path()?;

    let state = SyncStateStore::load(&state_path)?;
    let queue = RetryQueue::load(&queue_path, cfg.retry.max_retries)?;

    println!("drivesyncd status");
    println!("=================");
    println!(
        "Watched root:   {} -> drive:{}",
        cfg.sync.local_path.display(),
        cfg.sync.drive_folder_id
    );
    println!("Uploaded files: {}", state.file_count());
    println!("Remote folders: {}", state.folder_count());
    println!("Retry queue:    {}", queue.len());
    if !state_path.exists() {
        println!();
        println!("(no state file yet — daemon has not synced anything)");
    }

    Ok(())
}
