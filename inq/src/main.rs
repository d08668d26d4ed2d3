//! Incoming queue CLI.
//!
//! One-shot admission of a single artifact or a whole directory, plus
//! inspection commands that never touch the repository: parse an artifact,
//! dry-run the policy chain, dump the loaded registry.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inq_common::config::{self, Config};
use inq_common::controller::Controller;
use inq_common::mailer::SmtpMailer;
use inq_common::policy;
use inq_common::registry::Registry;
use inq_common::repotool::Reprepro;
use inq_common::scan;
use inq_common::upload::{Upload, parse_changes, parse_package};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "inq")]
#[command(author, version, about = "Incoming queue - package upload admission")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "INQ_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admit one artifact, or every artifact in a directory
    Process {
        /// A `.changes` bundle, a `.deb`, or a directory of either
        path: PathBuf,

        /// Leave files in place instead of archiving them
        #[arg(long)]
        no_move: bool,

        /// Do not send notification mail
        #[arg(long)]
        no_mail: bool,

        /// Uploader identity for binary packages (build context)
        #[arg(long)]
        uploader: Option<String>,
    },

    /// Parse an artifact and dry-run the policy chain
    Check {
        artifact: PathBuf,
    },

    /// Print the parsed upload descriptor
    Show {
        artifact: PathBuf,

        /// Emit JSON instead of the plain summary
        #[arg(long)]
        json: bool,
    },

    /// Print the loaded distribution registry
    Dump,
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
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = config::resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command {
        Commands::Process {
            path,
            no_move,
            no_mail,
            uploader,
        } => process(&config, &path, no_move, no_mail, uploader).await,
        Commands::Check { artifact } => check(&config, &artifact),
        Commands::Show { artifact, json } => show(&config, &artifact, json),
        Commands::Dump => dump(&config),
    }
}

async fn process(
    config: &Config,
    path: &Path,
    no_move: bool,
    no_mail: bool,
    uploader: Option<String>,
) -> Result<()> {
    scan::ensure_queue_dirs(&config.repository)?;
    let registry = Registry::load(&config.repository.base_path, &config.policy)?;
    let tool = Reprepro::new(config);
    let mailer = SmtpMailer::new(&config.mail)?;

    let mut controller = Controller::new(config, &registry, tool, mailer)
        .with_binary_uploader(uploader);
    if no_move {
        controller = controller.without_moves();
    }
    if no_mail {
        controller = controller.without_mail();
    }

    if path.is_dir() {
        let summary = controller.run_batch_in(path).await?;
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch complete"
        );
        if summary.failed > 0 {
            std::process::exit(1);
        }
    } else {
        let report = controller.admit_artifact(path).await;
        if !report.succeeded {
            std::process::exit(1);
        }
    }
    Ok(())
}

fn parse_artifact(config: &Config, artifact: &Path) -> Result<Upload> {
    let defaults = config.upload_defaults();
    let upload = if artifact.extension().and_then(|e| e.to_str()) == Some("changes") {
        parse_changes(artifact, &defaults)?
    } else {
        parse_package(artifact, &defaults, None)?
    };
    Ok(upload)
}

fn check(config: &Config, artifact: &Path) -> Result<()> {
    let registry = Registry::load(&config.repository.base_path, &config.policy)?;
    let upload = parse_artifact(config, artifact)?;
    match policy::check(&upload, &registry, &config.policy) {
        Ok(()) => {
            println!(
                "{} {} would be accepted into {}/{}",
                upload.package_name,
                upload.version,
                registry.name(),
                upload.distribution
            );
            Ok(())
        }
        Err(violation) => {
            println!("rejected: {}", violation.message());
            std::process::exit(1);
        }
    }
}

fn show(config: &Config, artifact: &Path, json: bool) -> Result<()> {
    let upload = parse_artifact(config, artifact)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&upload)?);
    } else {
        println!("{upload}");
    }
    Ok(())
}

fn dump(config: &Config) -> Result<()> {
    let registry = Registry::load(&config.repository.base_path, &config.policy)?;
    println!("{}", registry.name());
    for distribution in registry.distributions() {
        let codename = &distribution.codename;
        let mut flags = Vec::new();
        if registry.is_locked(codename) {
            flags.push("locked");
        }
        if registry.is_testing(codename) {
            flags.push("testing");
        }
        if registry.is_qa(codename) {
            flags.push("qa");
        }
        if registry.is_developer(codename) {
            flags.push("developer");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", flags.join(", "))
        };
        println!();
        println!("# {codename}{flags}");
        print!("{}", distribution.to_paragraph());
    }
    Ok(())
}
