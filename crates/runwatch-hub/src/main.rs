use anyhow::{Context, Result};
use clap::Parser;
use runwatch_hub::{HubConfig, HubState, DEFAULT_ADDR, DEFAULT_CHANNEL_CAPACITY};
use std::{net::SocketAddr, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "runwatch-hub")]
#[command(about = "In-memory runs server with live SSE streams", long_about = None)]
struct Args {
    #[arg(long, default_value = DEFAULT_ADDR)]
    addr: String,
    /// Events included in a run snapshot.
    #[arg(long, default_value_t = runwatch_core::DEFAULT_EVENT_CAPACITY)]
    event_window: usize,
    #[arg(long, default_value_t = 15)]
    keep_alive_secs: u64,
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    channel_capacity: usize,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let addr: SocketAddr = args
        .addr
        .parse()
        .with_context(|| format!("invalid --addr {}", args.addr))?;
    let hub = HubState::new(HubConfig {
        event_window: args.event_window,
        keep_alive: Duration::from_secs(args.keep_alive_secs.max(1)),
        channel_capacity: args.channel_capacity,
    });
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(event = "hub_start", addr = %addr, event_window = args.event_window);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    runwatch_hub::serve(listener, hub, shutdown)
        .await
        .context("hub server failed")?;
    info!(event = "hub_stop");
    Ok(())
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else {
        std::env::var("RUNWATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
