//! Coupler CLI - runs a coupled model configuration.
//!
//! # Usage
//!
//! ```text
//! coupler run.toml                          # every component in this process
//! coupler --distributed --rank 1 run.toml   # one process of a distributed run
//! ```
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Every component succeeded |
//! | 1 | A component failed, a deadlock was detected, or peers could not be reached |
//! | 2 | The configuration is invalid; nothing ran |
//!
//! # Environment Variables
//!
//! - `COUPLER_MODE`, `COUPLER_CLOBBER`, `COUPLER_DEADLOCK_TIMEOUT_MS`:
//!   global settings, below command-line flags in priority
//! - `COUPLER_RANK`: default for `--rank`
//! - `RUST_LOG`: terminal log filter when neither `-v` nor `-d` is given

mod tracing_writer;

use anyhow::{Context, Result};
use clap::Parser;
use coupler_runtime::config::{ConfigError, ConfigLoader, Mode, RunConfig};
use coupler_runtime::{DispatchError, Dispatcher, RunReport, Transport};
use coupler_types::Rank;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Runs simulation components that exchange named data products.
#[derive(Parser, Debug)]
#[command(name = "coupler")]
#[command(version, about, long_about = None)]
struct Args {
    /// Run configuration (TOML)
    config: PathBuf,

    /// Run as one process of a distributed run (peers from the global section)
    #[arg(long)]
    distributed: bool,

    /// This process's rank in a distributed run
    #[arg(long, env = "COUPLER_RANK", default_value_t = 0)]
    rank: usize,

    /// Enable info logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Also append debug logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Stall interval before blocked components are declared deadlocked
    #[arg(long, value_name = "MS")]
    deadlock_timeout_ms: Option<u64>,

    /// Reuse existing outputs of components whose inputs did not change
    #[arg(long)]
    no_clobber: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    match run(&args) {
        Ok(report) => {
            for line in summary(&report) {
                println!("{line}");
            }
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            error!(error = %e, "Run aborted");
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(args: &Args) -> Result<RunReport> {
    let config = load_config(args)?;
    info!(
        path = %args.config.display(),
        components = config.components.len(),
        mode = %config.global.mode,
        "Configuration loaded"
    );

    let dispatcher = Dispatcher::new(config);
    let report = match dispatcher.config().global.mode {
        Mode::Local => dispatcher.run()?,
        Mode::Distributed => {
            let rank = Rank(args.rank);
            let addr = dispatcher
                .config()
                .global
                .peers
                .get(rank.index())
                .ok_or_else(|| {
                    DispatchError::Config(ConfigError::invalid_global(
                        "peers",
                        format!("no address for {rank}"),
                    ))
                })?;
            let transport = Transport::bind(rank, addr)
                .map_err(DispatchError::Transport)
                .context("starting transport")?;
            dispatcher.run_distributed(transport)?
        }
    };
    Ok(report)
}

fn load_config(args: &Args) -> Result<RunConfig, DispatchError> {
    let mut loader = ConfigLoader::from_path(&args.config);
    if args.distributed {
        loader = loader.with_override("mode", Mode::Distributed.to_string());
    }
    if let Some(ms) = args.deadlock_timeout_ms {
        loader = loader.with_override("deadlock_timeout_ms", ms.to_string());
    }
    if args.no_clobber {
        loader = loader.with_override("clobber", "false");
    }
    Ok(loader.load()?)
}

/// Lines printed after a completed run.
fn summary(report: &RunReport) -> Vec<String> {
    let total = report.results.len();
    let skipped = report.skipped().count();
    let mut lines = report.summary_lines();

    if !report.deadlock.is_empty() {
        let edges: Vec<String> = report.deadlock.iter().map(ToString::to_string).collect();
        lines.push(format!("deadlock detected: {}", edges.join(", ")));
    }

    let failed = report.failures().count();
    if failed == 0 && report.deadlock.is_empty() {
        lines.push(format!(
            "{total} components succeeded ({skipped} reused cached output)"
        ));
    } else {
        lines.push(format!("{failed} of {total} components failed"));
    }
    lines
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<DispatchError>() {
        Some(e) if e.is_config() => 2,
        _ => 1,
    }
}

/// Terminal filter: `--debug` > `--verbose` > `RUST_LOG` > `warn`.
/// The log file always records debug.
fn init_tracing(args: &Args) {
    let terminal_filter = if args.debug {
        EnvFilter::new("debug")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let terminal_layer = fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr);

    let log_file = args.log_file.as_ref().and_then(|path| {
        tracing_writer::open_log_file(path)
            .map_err(|e| eprintln!("Warning: cannot open log file {}: {e}", path.display()))
            .ok()
    });

    if let Some(file) = log_file {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(tracing_writer::FileMakeWriter::new(file));
        tracing_subscriber::registry()
            .with(terminal_layer.with_filter(terminal_filter))
            .with(file_layer.with_filter(EnvFilter::new("debug")))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(terminal_layer.with_filter(terminal_filter))
            .init();
    }
}
