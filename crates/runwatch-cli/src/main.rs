mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runwatch_core::{NewRun, RunId};
use runwatch_sync::{ApiClient, SyncConfig, SyncView};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runwatch")]
#[command(about = "Run monitoring from the terminal", long_about = None)]
struct Cli {
    /// Base URL of the runs API (overrides RUNWATCH_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage runs
    Runs {
        #[command(subcommand)]
        action: RunCommands,
    },
    /// Follow a run live until interrupted
    Watch {
        run_id: RunId,
        /// Maximum events kept while watching.
        #[arg(long)]
        event_window: Option<usize>,
    },
}

#[derive(Subcommand)]
enum RunCommands {
    List {
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    Show {
        run_id: RunId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();
    if let Some(api_url) = cli.api_url {
        config = config.with_api_url(api_url);
    }

    match cli.command {
        Commands::Runs { action } => {
            let api = ApiClient::new(&config).context("Failed to build API client")?;
            match action {
                RunCommands::List { skip, limit } => {
                    let runs = api
                        .list_runs(skip, limit)
                        .await
                        .context("Failed to list runs")?;
                    if runs.is_empty() {
                        println!("No runs found at {}", api.base_url());
                    }
                    for run in &runs {
                        println!("{}", render::run_line(run));
                    }
                }
                RunCommands::Create { title, description } => {
                    let run = api
                        .create_run(&NewRun { title, description })
                        .await
                        .context("Failed to create run")?;
                    println!("{}", render::run_line(&run));
                }
                RunCommands::Show { run_id } => {
                    let detail = api
                        .get_run(run_id)
                        .await
                        .with_context(|| format!("Failed to load run {run_id}"))?;
                    for line in render::detail_lines(&detail) {
                        println!("{line}");
                    }
                }
            }
        }
        Commands::Watch {
            run_id,
            event_window,
        } => {
            if let Some(event_window) = event_window {
                config.event_capacity = event_window.max(1);
            }
            watch(config, run_id).await?;
        }
    }

    Ok(())
}

/// Prints changes as they arrive. `r` + enter retries, `q` + enter quits.
async fn watch(config: SyncConfig, run_id: RunId) -> Result<()> {
    let sync = runwatch_sync::spawn_http(config).context("Failed to start sync engine")?;
    let mut view = sync.subscribe();
    let mut shown = SyncView::default();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    sync.select(run_id).await;

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = view.borrow_and_update().clone();
                for line in render::describe_changes(&shown, &next) {
                    println!("{line}");
                }
                shown = next;
            }
            line = input.next_line(), if input_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "r" => sync.retry().await,
                    "q" => break,
                    other => debug!(event = "watch_input_ignored", input = other),
                },
                Ok(None) | Err(_) => input_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sync.shutdown().await;
    Ok(())
}

fn init_logging() {
    let level = std::env::var("RUNWATCH_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
