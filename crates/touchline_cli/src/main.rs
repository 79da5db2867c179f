//! TOUCHLINE CLI
//!
//! Replays a recorded capture file against an ingestion service.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use touchline_replay::{
    CaptureParser, HttpSink, HttpSinkConfig, ParsedRecord, ReplayConfig, ReplayOutcome,
    ReplayScheduler,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "touchline")]
#[command(about = "TOUCHLINE - replay a sports event capture", long_about = None)]
struct Cli {
    /// Capture file to replay
    #[arg(short, long, default_value = "PIT_LAC.txt")]
    file: PathBuf,

    /// Base URL of the ingestion service
    #[arg(short, long, default_value = "http://localhost:8080")]
    consumer: String,

    /// Minimum spacing between sends (e.g. 100ms, 1s)
    #[arg(short, long, default_value = "100ms", value_parser = humantime::parse_duration)]
    speed: Duration,

    /// Heartbeat period while streaming (0s disables periodic heartbeats)
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    heartbeat: Duration,

    /// Per-request timeout
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    timeout: Duration,
}

impl Cli {
    fn replay_config(&self) -> ReplayConfig {
        ReplayConfig::default()
            .with_cadence(self.speed)
            .with_heartbeat_interval(self.heartbeat)
    }

    fn sink_config(&self) -> HttpSinkConfig {
        HttpSinkConfig::new(self.consumer.clone()).with_timeout(self.timeout)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("touchline=info,tower_http=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_capture(records: &[ParsedRecord]) {
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return;
    };
    tracing::info!(
        records = records.len(),
        first = %first.original_timestamp,
        last = %last.original_timestamp,
        "capture loaded"
    );
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing();
    tracing::info!(
        file = %cli.file.display(),
        consumer = %cli.consumer,
        speed = ?cli.speed,
        "starting producer"
    );

    let records = CaptureParser::new()
        .with_span(tracing::info_span!("parse", file = %cli.file.display()))
        .parse_file(&cli.file)
        .wrap_err_with(|| format!("failed to parse {}", cli.file.display()))?;

    if records.is_empty() {
        tracing::warn!(file = %cli.file.display(), "capture holds no replayable messages");
        return Ok(());
    }
    log_capture(&records);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received, stopping replay");
        watcher.cancel();
    });

    let sink = HttpSink::new(cli.sink_config())?;
    let scheduler = ReplayScheduler::new(sink, cli.replay_config())
        .with_span(tracing::info_span!("replay", consumer = %cli.consumer));

    let summary = scheduler
        .replay_all(records, cancel)
        .await
        .wrap_err("replay aborted")?;

    match summary.outcome {
        ReplayOutcome::Drained => tracing::info!(
            sent = summary.sent,
            failed = summary.failed,
            heartbeats = summary.heartbeats_sent,
            "replay complete"
        ),
        ReplayOutcome::Cancelled => tracing::info!(
            sent = summary.sent,
            failed = summary.failed,
            "replay cancelled"
        ),
    }
    Ok(())
}
