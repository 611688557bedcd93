//! tally-worker: runs every bundled reduction job until SIGINT/SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use tally_core::config::load_dotenv;
use tally_core::Config;
use tally_worker::WorkerResources;

// ── CLI ─────────────────────────────────────────────────────────────

/// Windowed reduction worker.
#[derive(Parser, Debug)]
#[command(name = "tally-worker", version, about)]
struct Cli {
    /// Config profile; keys are looked up as `{PROFILE}_{KEY}` first.
    #[arg(long, env = "TALLY_PROFILE", default_value = "")]
    profile: String,

    /// Directory holding checkpoint files (overrides STATE_DIR).
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Aggregation worker threads (overrides WORKER_THREADS).
    #[arg(long)]
    worker_threads: Option<usize>,

    /// Log filter, e.g. `info,tally_job=debug`. Falls back to RUST_LOG, then `info`.
    #[arg(long)]
    log: Option<String>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();

    let filter = match cli.log {
        Some(ref directives) => tracing_subscriber::EnvFilter::new(directives),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::for_profile(&cli.profile);
    if let Some(dir) = cli.state_dir {
        config.state.dir = dir;
    }
    if let Some(threads) = cli.worker_threads {
        config.execution.worker_threads = threads;
    }
    config.log_summary();

    let resources = WorkerResources::from_config(config)?;
    let mut registry = tally_worker::registry(&resources);
    let built = registry.build_all();
    if built == 0 {
        warn!("no runnable jobs, exiting");
        return Ok(());
    }

    let failed = registry.start_all().await;
    info!(jobs = built, failed, "tally-worker running");

    shutdown_signal().await;
    info!("shutdown requested, stopping jobs");

    registry.stop_all().await;
    info!("tally-worker exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler, waiting for ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
