use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod config;
mod import;
mod worker;

use config::{WorkerConfig, WorkerState};

#[derive(Parser, Debug)]
#[command(name = "dagworker")]
#[command(about = "Workflow DAG worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "dagworker.toml", env = "DAGWORKER_CONFIG")]
    config: PathBuf,

    /// Data directory for the job store and event log
    #[arg(short, long, default_value = "./data", env = "DAGWORKER_DATA_DIR")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run workflows named by messages read from stdin, one per line
    Consume {
        /// Messages handled at once (overrides `[consumer] limit`)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Load a workflow JSON file into the job store
    Import {
        /// Workflow file: {"workflow_id", "tasks": [...], "edges": [...]}
        file: PathBuf,
    },

    /// Print the id of every workflow in the job store
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = WorkerConfig::load(&args.config, args.data_dir.clone())?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    tracing::info!("Starting dagworker");
    tracing::info!("Data directory: {}", config.data_dir.display());

    let state = WorkerState::new(&config)?;

    match args.command {
        Command::Consume { limit } => {
            let limit = limit.unwrap_or(config.consumer.limit).max(1);
            let consumer = Arc::new(state.consumer(&config));

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal.cancel();
                }
            });

            tracing::info!("Consuming messages from stdin with limit {}", limit);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            worker::consume_lines(stdin, consumer, limit, shutdown).await?;
        }
        Command::Import { file } => {
            import::import_file(&state.job_store, &file)?;
        }
        Command::List => {
            for workflow_id in state.job_store.list_workflows()? {
                println!("{}", workflow_id);
            }
        }
    }

    Ok(())
}
