//! Incoming queue daemon.
//!
//! Repeats a full incoming-directory scan on a fixed interval, processing
//! one upload at a time. The repository tool is not safe for concurrent
//! invocation against one base path, so admission is serialized by this
//! loop rather than by a lock. The registry is reloaded between passes so
//! distribution edits are picked up without a restart; only the startup
//! load is fatal.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use inq_common::config::{self, Config};
use inq_common::controller::Controller;
use inq_common::mailer::SmtpMailer;
use inq_common::registry::Registry;
use inq_common::repotool::Reprepro;
use inq_common::scan;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "inqd")]
#[command(author, version, about = "Incoming queue daemon - upload admission")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "INQ_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single scan pass and exit
    #[arg(long)]
    once: bool,

    /// Accepted for service-file compatibility; the daemon always runs in
    /// the foreground under its supervisor
    #[arg(short, long)]
    foreground: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("starting incoming queue daemon");
    if cli.foreground {
        info!("foreground requested; the daemon never detaches, continuing");
    }

    let config_path = config::resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    scan::ensure_queue_dirs(&config.repository)?;

    let mut registry = Registry::load(&config.repository.base_path, &config.policy)?;
    info!(
        repository = registry.name(),
        distributions = registry.distributions().count(),
        incoming = %config.repository.incoming_dir().display(),
        "watching incoming queue"
    );
    let mailer = SmtpMailer::new(&config.mail)?;
    let interval = config.daemon.scan_interval;

    loop {
        // Queue-directory loss is the one per-pass error worth dying for.
        let summary = {
            let tool = Reprepro::new(&config);
            let mut controller = Controller::new(&config, &registry, tool, mailer.clone());
            controller.run_batch().await?
        };
        if summary.total() > 0 {
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                "scan pass complete"
            );
        }

        if cli.once {
            break;
        }
        tokio::time::sleep(interval).await;

        // Pick up distribution edits between passes; a broken registry
        // skips passes until it parses again.
        loop {
            match Registry::load(&config.repository.base_path, &config.policy) {
                Ok(reloaded) => {
                    registry = reloaded;
                    break;
                }
                Err(e) => {
                    error!(error = %e,
                           retry_in = %humantime::format_duration(interval),
                           "failed to reload registry, skipping pass");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
    Ok(())
}
