use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use time::UtcOffset;

use logkeep::config::{DaemonConfig, DEFAULT_CONFIG_PATH};
use logkeep::daemon::{build_store, Daemon};
use logkeep::{Shutdown, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "logkeeper")]
#[command(about = "Rotate, compress, ship and expire application logs")]
struct Cli {
    /// YAML settings file (missing or invalid files fall back to defaults)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Root log directory, overrides the config file and LOG_PATH
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Enable uploads to the configured remote store
    #[arg(long)]
    remote: bool,

    /// Run rotation, upload and cleanup once, then exit
    #[arg(long)]
    once: bool,

    /// Debug logging for this crate
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli) {
        log::error!("Failed to start log lifecycle daemon: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_module("logkeep", log::LevelFilter::Debug);
    }
    builder.init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = DaemonConfig::from_file_or_default(&cli.config);
    config.apply_env();
    if let Some(log_path) = cli.log_path {
        config.log_path = log_path;
    }
    if cli.remote {
        config.remote.enabled = true;
    }

    // must be resolved before any other thread exists
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|_| {
        warn!("Local UTC offset unavailable; scheduling daily cleanup in UTC");
        UtcOffset::UTC
    });

    let store = if config.remote.enabled {
        Some(build_store(&config).context("failed to initialise remote store")?)
    } else {
        None
    };

    let mut daemon = Daemon::new(&config, store, Arc::new(SystemClock), offset)
        .context("failed to initialise daemon")?;

    if cli.once {
        let report = daemon.run_once();
        info!("Rotation: {}", report.cycle.summary());
        if let Some(upload) = &report.upload {
            info!("Upload: {}", upload.summary());
        }
        info!("Cleanup: {}", report.sweep.summary());
        return Ok(());
    }

    let shutdown = Shutdown::new();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to start signal runtime")?;
    let signal_shutdown = shutdown.clone();
    runtime.spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.request();
    });

    info!("Log lifecycle daemon started");
    daemon.run(&shutdown);
    info!("Log lifecycle daemon stopped");
    Ok(())
}

/// Wait for SIGTERM/SIGINT on Unix, Ctrl+C elsewhere.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(err), _) | (_, Err(err)) => {
                warn!("Failed to install signal handlers: {err}");
                return std::future::pending().await;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, stopping after current task"),
            _ = sigint.recv() => info!("Received SIGINT, stopping after current task"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {err}");
            return std::future::pending().await;
        }
        info!("Received Ctrl+C, stopping after current task");
    }
}
