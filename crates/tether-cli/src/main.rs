//! # tether
//!
//! Command-line client: issue one resilient request, or hold the persistent
//! connection open and print inbound events.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tether_core::logging::{LogFormat, init_subscriber};
use tether_core::{Envelope, WILDCARD_TOPIC};
use tether_http::{Method, Request, RequestExecutor};
use tether_realtime::{ConnectionManager, ConnectionState};
use tether_settings::TetherSettings;
use tracing::{info, warn};

/// Resilient request/response and realtime client.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Resilient request and realtime client")]
struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue one request and print the JSON result.
    Request {
        /// HTTP method, e.g. GET or POST.
        method: String,
        /// Path joined onto the configured base URL, or an absolute URL.
        path: String,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
        /// Retries after the first attempt (overrides settings).
        #[arg(long)]
        retries: Option<u32>,
        /// Per-attempt timeout in milliseconds (overrides settings).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Connect and print inbound envelopes until interrupted.
    Listen {
        /// Topic to print; repeatable. Defaults to every topic.
        #[arg(long = "topic")]
        topics: Vec<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<TetherSettings> {
    match path {
        Some(path) => tether_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => tether_settings::load_settings().context("Failed to load settings"),
    }
}

fn parse_method(raw: &str) -> Result<Method> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {raw}"))
}

fn build_request(
    method: &str,
    path: &str,
    body: Option<&str>,
    retries: Option<u32>,
    timeout_ms: Option<u64>,
) -> Result<Request> {
    let mut request = Request::new(parse_method(method)?, path);
    if let Some(body) = body {
        let value: Value = serde_json::from_str(body).context("--body is not valid JSON")?;
        request = request.json(&value);
    }
    if let Some(retries) = retries {
        request = request.retries(retries);
    }
    if let Some(ms) = timeout_ms {
        if ms == 0 {
            bail!("--timeout-ms must be positive");
        }
        request = request.timeout(Duration::from_millis(ms));
    }
    Ok(request)
}

async fn run_request(settings: &TetherSettings, request: Request) -> Result<()> {
    let executor = RequestExecutor::from_settings(&settings.http);
    let work = executor.execute::<Value>(request);
    tokio::pin!(work);

    let outcome = tokio::select! {
        outcome = &mut work => outcome,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            let cancelled = executor.cancel_all();
            info!(cancelled, "interrupted, cancelling in-flight requests");
            work.await
        }
    };

    let value = outcome.context("Request failed")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_envelope(envelope: &Envelope) -> Result<()> {
    println!("{}", envelope.to_text()?);
    Ok(())
}

async fn run_listen(settings: &TetherSettings, topics: Vec<String>) -> Result<()> {
    let manager = ConnectionManager::from_settings(&settings.realtime);
    let topics = if topics.is_empty() {
        vec![WILDCARD_TOPIC.to_string()]
    } else {
        topics
    };
    let _subscriptions: Vec<_> = topics
        .into_iter()
        .map(|topic| manager.subscribe(topic, print_envelope))
        .collect();

    manager
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", manager.config().url))?;
    info!(url = %manager.config().url, "listening");

    let mut state = manager.watch_state();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            info!("interrupted, disconnecting");
            manager.disconnect();
            Ok(())
        }
        gave_up = state.wait_for(|s| *s == ConnectionState::Disconnected) => {
            let _ = gave_up.context("Connection manager went away")?;
            warn!(attempts = manager.state().reconnect_attempts, "reconnect attempts exhausted");
            bail!("Connection lost")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load_config(args.config.as_deref())?;

    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    let format = if args.json_logs {
        LogFormat::Json
    } else {
        settings.logging.format
    };
    init_subscriber(level, format);

    match args.command {
        Command::Request {
            method,
            path,
            body,
            retries,
            timeout_ms,
        } => {
            let request = build_request(&method, &path, body.as_deref(), retries, timeout_ms)?;
            run_request(&settings, request).await
        }
        Command::Listen { topics } => run_listen(&settings, topics).await,
    }
}
