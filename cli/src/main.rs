//! Headless session runner.
//!
//! Loads a [`SessionConfig`] from a JSON file, runs one session to
//! completion, and prints every event it produces as a JSON line on
//! stdout — the same framing `Event::to_line` uses for any other
//! subscriber. Diagnostics go to stderr via `tracing`.

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use systemic_risk_sim_core::{ControlCommand, Event, SessionConfig, SessionManager};
use tracing_subscriber::EnvFilter;

/// Run a systemic-risk simulation session from a JSON configuration
/// file and stream its events to stdout.
#[derive(Debug, Parser)]
#[command(name = "simrisk", version, about)]
struct Cli {
    /// Path to a JSON-encoded `SessionConfig`.
    config: PathBuf,

    /// Stop the run after this many steps instead of the config's
    /// `total_steps` (useful for smoke-testing a large config).
    #[arg(long)]
    max_steps: Option<u64>,

    /// Suppress the final status line on stderr.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let raw = match std::fs::read_to_string(&cli.config) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("failed to read config {}: {err}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    let mut config: SessionConfig = match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to parse config {}: {err}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(max_steps) = cli.max_steps {
        config.total_steps = config.total_steps.min(max_steps);
    }

    let manager = SessionManager::new();
    let session_id = match manager.init(config) {
        Ok(id) => id,
        Err(err) => {
            eprintln!("failed to initialize session: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut events = match manager.subscribe(session_id, 256) {
        Ok(rx) => rx,
        Err(err) => {
            eprintln!("failed to subscribe to session {session_id}: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = manager.start(session_id) {
        eprintln!("failed to start session {session_id}: {err}");
        return ExitCode::FAILURE;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut completed = false;
    while let Some(event) = events.recv().await {
        let is_terminal = matches!(event, Event::Complete { .. } | Event::Stopped { .. });
        match event.to_line() {
            Ok(line) => {
                let _ = out.write_all(line.as_bytes());
            }
            Err(err) => tracing::warn!(%err, "failed to serialize event"),
        }
        if is_terminal {
            completed = matches!(event, Event::Complete { .. });
            break;
        }
    }
    let _ = out.flush();

    let status = manager.status(session_id).ok();
    let _ = manager.control(session_id, ControlCommand::Stop).await;
    let _ = manager.destroy(session_id);

    if !cli.quiet {
        if let Some(status) = status {
            eprintln!(
                "session {session_id} finished: state={:?} step={}/{} defaults={} equity={:.2}",
                status.state, status.current_step, status.total_steps, status.total_defaults, status.total_equity
            );
        }
    }

    if completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
