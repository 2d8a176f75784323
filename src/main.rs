//! volley - fetch URL batches with a concurrency cap and a group deadline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use volley::observer::BatchObserver;
use volley::server::AppState;
use volley::{BatchConfig, BatchRunner, JobDispatcher, ReqwestFetcher, Target, TracingObserver};

/// Fetch URL batches with a concurrency cap and a group deadline
#[derive(Parser)]
#[command(name = "volley")]
#[command(
    about = "Fetch URL batches with a concurrency cap and a group deadline",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    batch: BatchArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BatchArgs {
    /// JSON file with batch settings; fields it omits keep their defaults
    #[arg(short, long, env = "VOLLEY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Maximum number of fetches in flight
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Group deadline for the whole batch, in milliseconds
    #[arg(long, global = true)]
    deadline_ms: Option<u64>,

    /// Timeout for each individual fetch, in milliseconds
    #[arg(long, global = true)]
    fetch_timeout_ms: Option<u64>,

    /// URL to fetch (repeatable); replaces the configured targets
    #[arg(long = "target", global = true)]
    targets: Vec<String>,
}

impl BatchArgs {
    fn load(self) -> anyhow::Result<BatchConfig> {
        let mut config = match &self.config {
            Some(path) => BatchConfig::from_json_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => BatchConfig::default(),
        };

        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(deadline_ms) = self.deadline_ms {
            config.deadline_ms = deadline_ms;
        }
        if self.fetch_timeout_ms.is_some() {
            config.fetch_timeout_ms = self.fetch_timeout_ms;
        }
        if !self.targets.is_empty() {
            config.targets = self.targets.into_iter().map(Target::from).collect();
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP trigger; each GET /asynctask starts the configured batch
    Serve {
        /// Address to listen on
        #[arg(long, env = "VOLLEY_BIND", default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },

    /// Run the configured batch once and print the result as JSON
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.batch.load()?;
    let fetcher = Arc::new(ReqwestFetcher::from_config(&config)?);

    match cli.command {
        Commands::Serve { bind } => serve(bind, config, fetcher).await,
        Commands::Run => run(config, fetcher).await,
    }
}

async fn run(config: BatchConfig, fetcher: Arc<ReqwestFetcher>) -> anyhow::Result<()> {
    let runner = BatchRunner::new(fetcher);
    let result = runner.run_config(&config).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn serve(
    bind: SocketAddr,
    config: BatchConfig,
    fetcher: Arc<ReqwestFetcher>,
) -> anyhow::Result<()> {
    let observer: Arc<dyn BatchObserver> = Arc::new(TracingObserver);

    #[cfg(feature = "metrics")]
    let metrics = volley::VolleyMetrics::new(prometheus::Registry::new())?;
    #[cfg(feature = "metrics")]
    let observer: Arc<dyn BatchObserver> = Arc::new(
        volley::ObserverSet::new()
            .with(observer)
            .with(Arc::new(metrics.clone())),
    );

    let runner = Arc::new(BatchRunner::new(fetcher).with_observer(observer));
    let state = AppState::new(JobDispatcher::new(runner, config));
    #[cfg(feature = "metrics")]
    let state = state.with_metrics(metrics);

    volley::server::serve(bind, Arc::new(state)).await?;
    Ok(())
}
