//! Test automation controller.
//!
//! Runs the tests listed in a manifest on local worker sessions, classifies
//! their log output and reports a verdict per test.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};

use anyhow::{Context, Result};
use automation::exit_codes;
use automation::io::config::{ControllerConfig, load_config, write_config};
use automation::io::manifest::Manifest;
use automation::io::report_sink::write_report;
use automation::io::transport::ProcessTransport;
use automation::logging;
use automation::run::run_tests;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "automation",
    version,
    about = "Dispatch automated tests to workers and classify their logs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default controller config.
    Init {
        #[arg(long, default_value = "automation.toml")]
        config: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Check the config and manifest without running anything.
    Validate {
        #[arg(long, default_value = "automation.toml")]
        config: PathBuf,
        #[arg(long, default_value = "tests.toml")]
        manifest: PathBuf,
    },
    /// Run every test in the manifest and print a summary.
    Run {
        #[arg(long, default_value = "automation.toml")]
        config: PathBuf,
        #[arg(long, default_value = "tests.toml")]
        manifest: PathBuf,
        /// Also write the full JSON report here.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Override `workers.count` from the config.
        #[arg(long)]
        workers: Option<u32>,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Validate { config, manifest } => cmd_validate(&config, &manifest),
        Command::Run {
            config,
            manifest,
            report,
            workers,
        } => cmd_run(&config, &manifest, report.as_deref(), workers),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        println!("{} already exists (use --force to overwrite)", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &ControllerConfig::default())
        .with_context(|| format!("write {}", config_path.display()))?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(config_path: &Path, manifest_path: &Path) -> Result<i32> {
    load_config(config_path)?;
    let manifest = Manifest::load(manifest_path)?;
    println!("ok: {} tests", manifest.tests.len());
    Ok(exit_codes::OK)
}

fn cmd_run(
    config_path: &Path,
    manifest_path: &Path,
    report_path: Option<&Path>,
    workers: Option<u32>,
) -> Result<i32> {
    logging::init();

    let mut config = load_config(config_path)?;
    if let Some(count) = workers {
        config.workers.count = count;
        config.validate().context("validate --workers override")?;
    }
    let manifest = Manifest::load(manifest_path)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .context("install interrupt handler")?;

    let (outbox, inbox) = mpsc::channel();
    let transport = ProcessTransport::new(outbox, config.workers.heartbeat_interval());
    let report = run_tests(manifest.tests, &config, &transport, &inbox, &cancel)?;

    print!("{}", report.render_summary());
    if let Some(path) = report_path {
        write_report(path, &report)?;
        info!(path = %path.display(), "report written");
    }
    Ok(report.exit_code())
}
