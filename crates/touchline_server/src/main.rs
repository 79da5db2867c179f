//! TOUCHLINE Server
//!
//! Ingestion service receiving replayed events.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use touchline_server::{ApiServer, ServerConfig, shutdown_signal};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "touchline-server")]
#[command(about = "TOUCHLINE ingestion server", long_about = None)]
struct Args {
    /// Listen port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// redb file for durable state (in-memory when omitted)
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("touchline=info,tower_http=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = ServerConfig::default().with_port(args.port);
    if let Some(path) = args.store {
        config = config.with_store_path(path);
    }

    let server = ApiServer::new(config).context("failed to start ingestion server")?;
    server.serve(shutdown_signal()).await?;

    Ok(())
}
