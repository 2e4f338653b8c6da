// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk — operator and support CLI for the raw print dispatch engine.
//
// Every command prints its result as pretty JSON on stdout; logs go to stderr
// (filter with RUST_LOG).

mod data_dir;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use spoolwerk_core::error::SpoolwerkError;
use spoolwerk_core::human_errors::{dispatch_failure_message, humanize_error};
use spoolwerk_core::types::{DispatchMode, PrintOptions, PrintRequest, RecoveryTier, SpoolerState};
use spoolwerk_print::{PrintEngine, support_summary};

#[derive(Parser, Debug)]
#[command(name = "spoolwerk", version, about = "Raw print dispatch for receipt and label printers")]
struct Cli {
    /// Engine config file (JSON). Defaults to the data directory's config.json.
    #[arg(long, global = true, env = "SPOOLWERK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed printers.
    List,
    /// Show the default printer.
    Default,
    /// Diagnose one printer.
    Diagnose {
        printer: String,
        /// Print a support summary instead of JSON.
        #[arg(long)]
        summary: bool,
    },
    /// Classify a driver and port without touching the system.
    Classify {
        #[arg(long)]
        driver: String,
        #[arg(long, default_value = "")]
        port: String,
    },
    /// Send a file or text to a printer.
    Print {
        printer: String,
        /// Raw payload file (ESC/POS, ZPL, ...).
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,
        /// Plain text payload.
        #[arg(long)]
        text: Option<String>,
        #[arg(long, value_enum, default_value_t = Mode::Standard)]
        mode: Mode,
        #[arg(long, default_value_t = 1)]
        copies: u32,
        /// Per-strategy timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print a short test page.
    TestPage {
        printer: String,
        #[arg(long, value_enum, default_value_t = Mode::Standard)]
        mode: Mode,
    },
    /// Recover a stuck print spooler.
    ResetSpooler {
        /// Restart the Spooler service directly (needs administrator rights).
        #[arg(long)]
        force: bool,
    },
    /// Show the effective config, optionally writing it to the data directory.
    Config {
        #[arg(long)]
        write: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Standard,
    Bypass,
    Auto,
}

impl From<Mode> for DispatchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Standard => DispatchMode::Standard,
            Mode::Bypass => DispatchMode::Bypass,
            Mode::Auto => DispatchMode::Auto,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let human = humanize_error(&e);
            eprintln!("{}\n{}", human.message, human.suggestion);
            tracing::debug!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, SpoolwerkError> {
    let config = data_dir::load_config(cli.config.as_deref())?;

    if let Command::Config { write } = &cli.command {
        config.validate()?;
        if *write {
            let path = data_dir::config_path();
            data_dir::persist_config(&path, &config)?;
            tracing::info!(path = %path.display(), "config written");
        }
        emit(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let engine = PrintEngine::new(config)?;

    match cli.command {
        Command::List => emit(&engine.list_printers().await?)?,
        Command::Default => emit(&engine.default_printer().await?)?,
        Command::Diagnose { printer, summary } => {
            let result = engine.diagnose(&printer).await;
            if summary {
                println!("{}", support_summary(&result, None));
            } else {
                emit(&result)?;
            }
            if !result.is_accessible {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Classify { driver, port } => emit(&engine.classify(&driver, &port))?,
        Command::Print {
            printer,
            file,
            text,
            mode,
            copies,
            timeout,
        } => {
            let request = build_request(printer, file, text, copies, timeout)?;
            let result = engine.print(&request, mode.into()).await;
            emit(&result)?;
            if !result.success {
                eprintln!("{}", dispatch_failure_message(&result));
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::TestPage { printer, mode } => {
            let result = engine.print_test_page(&printer, mode.into()).await;
            emit(&result)?;
            if !result.success {
                eprintln!("{}", dispatch_failure_message(&result));
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::ResetSpooler { force } => {
            if force {
                engine.restart_spooler().await?;
                emit(&ResetReport { tier: None, state: engine.spooler_state() })?;
            } else {
                let tier = engine.reset_spooler().await?;
                emit(&ResetReport { tier: Some(tier), state: engine.spooler_state() })?;
            }
        }
        Command::Config { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct ResetReport {
    tier: Option<RecoveryTier>,
    state: SpoolerState,
}

fn build_request(
    printer: String,
    file: Option<PathBuf>,
    text: Option<String>,
    copies: u32,
    timeout: Option<u64>,
) -> Result<PrintRequest, SpoolwerkError> {
    let request = match (file, text) {
        (Some(path), _) => PrintRequest::raw(printer, std::fs::read(&path)?),
        (None, Some(text)) => PrintRequest::text(printer, &text),
        (None, None) => {
            return Err(SpoolwerkError::InvalidRequest("nothing to print".into()));
        }
    };
    Ok(request.with_options(PrintOptions {
        copies,
        timeout: timeout.map(Duration::from_secs),
        job_name: None,
    }))
}

fn emit<T: Serialize>(value: &T) -> Result<(), SpoolwerkError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
