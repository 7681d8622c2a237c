use std::path::PathBuf;

use clap::Parser;
use tracing::Instrument;

use switchyard::config::Config;
use switchyard::logging;
use switchyard::server::{self, listener, supervisor::WORKER_ENV, ProcessLauncher, ProcessSupervisor};

/// Host-routed round-robin reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Number of worker processes (overrides config, 0 = in-process)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn log_level(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load(),
    };
    if let Some(listen) = &args.listen {
        cfg.server.listen_addr = listen.clone();
    }
    if let Some(workers) = args.workers {
        cfg.server.workers = workers;
    }

    logging::init(args.log_level().unwrap_or(cfg.logging.level.as_str()));

    match std::env::var(WORKER_ENV) {
        Ok(id) => {
            let span = tracing::info_span!("worker", id = %id);
            serve(&cfg).instrument(span).await
        }
        Err(_) if cfg.server.workers > 0 => {
            tracing::info!(
                workers = cfg.server.workers,
                version = env!("CARGO_PKG_VERSION"),
                "Starting coordinator"
            );
            listener::ensure_addresses_free_or_exit(&cfg).await?;
            ProcessSupervisor::new(ProcessLauncher::current_exe()?, cfg.server.workers)
                .with_policy(cfg.server.restart_backoff.clone().into())
                .run()
                .await
        }
        Err(_) => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting switchyard");
            serve(&cfg).await
        }
    }
}

async fn serve(cfg: &Config) -> anyhow::Result<()> {
    tokio::select! {
        res = server::run_worker(cfg) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
