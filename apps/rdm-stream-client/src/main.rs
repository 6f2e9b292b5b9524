//! RDM Stream Client Binary
//!
//! Logs in to a `tr_json2` websocket server, subscribes to the configured
//! items and reports message counts until closed.
//!
//! # Usage
//!
//! ```bash
//! rdm-stream-client -S ELEKTRON_DD -H ads1 -p 15000 -i VOD.L,BT.L -e
//! rdm-stream-client --ext-file items.txt --view-fids 22,25 --exit-time 5
//! ```
//!
//! # Exit Codes
//!
//! - `0`: session closed normally (request, completion or time limit)
//! - `1`: session ended on a fatal condition or a runtime error
//! - `2`: invalid options
//!
//! # Environment Variables
//!
//! Every connection option also reads an `RDM_*` variable (see `--help`),
//! plus:
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: `rdm_stream_client=info`)

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rdm_stream_client::application::services::MessageDispatcher;
use rdm_stream_client::domain::keepalive::KeepAliveMonitor;
use rdm_stream_client::domain::session::Session;
use rdm_stream_client::domain::stats::{CompletionTracker, StatsCounter};
use rdm_stream_client::infrastructure::config::{CliOptions, ClientConfig};
use rdm_stream_client::infrastructure::metrics;
use rdm_stream_client::infrastructure::rdm::{RdmClient, WebSocketTransport};
use rdm_stream_client::infrastructure::telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Exit code for rejected options.
const EXIT_INVALID_OPTIONS: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();
    let options = CliOptions::parse();

    let _telemetry_guard = match telemetry::init() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match ClientConfig::from_options(options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return ExitCode::from(EXIT_INVALID_OPTIONS);
        }
    };

    match run(config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "Client failed");
            ExitCode::FAILURE
        }
    }
}

/// Connect and run one session; returns whether it ended cleanly.
async fn run(config: ClientConfig) -> anyhow::Result<bool> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a rustls crypto provider is already installed"))?;

    log_config(&config);

    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        metrics::init_metrics_exporter(addr).context("failed to start metrics exporter")?;
    }

    let session = Session::new(config.session.clone(), config.planner())
        .context("invalid session configuration")?;
    let dispatcher = MessageDispatcher::new(
        session,
        Arc::new(StatsCounter::new()),
        Arc::new(KeepAliveMonitor::new(config.session.default_ping_interval)),
        CompletionTracker::new(config.auto_exit),
    );

    let url = config.connection.url();
    let transport = WebSocketTransport::connect(&url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let summary = RdmClient::new(transport, dispatcher, config.client, cancel)
        .run()
        .await?;

    if !summary.is_success() {
        tracing::error!(reason = ?summary.reason, "Session ended abnormally");
    }
    Ok(summary.is_success())
}

/// Log the validated configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        url = %config.connection.url(),
        service = config.connection.service.as_deref().unwrap_or("-"),
        items = config.items.len(),
        streaming = config.streaming,
        auto_exit = config.auto_exit,
        exit_after_secs = config.client.exit_after.map(|d| d.as_secs()),
        stats_interval_secs = config.client.stats_interval.map(|d| d.as_secs()),
        "Configuration loaded"
    );
    tracing::debug!(auth = ?config.session.auth, view = ?config.view, "Login parameters");
}

/// Load .env from the current directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Cancel the session on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, logging out"),
        () = terminate => tracing::info!("Received SIGTERM, logging out"),
        () = cancel.cancelled() => return,
    }
    cancel.cancel();
}
