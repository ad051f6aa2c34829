use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod backend;
mod config;
mod error;
mod models;
mod orchestrator;
mod output;
mod report;
mod scorers;
mod similarity;
mod validators;

use crate::backend::{EchoBackend, ModelBackend, OpenAiBackend};
use crate::config::{BackendConfig, Config};
use crate::orchestrator::Orchestrator;
use crate::output::OutputFormat;
use crate::report::TracingReporter;
use crate::similarity::{SimilarityOracle, TokenCosine};

/// Crucible - gate a batch of submitted reasoning examples, then measure whether
/// fine-tuning a model on them improves its answers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    run_file: PathBuf,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - log every stage and per-record score
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

/// Install the global subscriber; `CRUCIBLE_LOG` overrides the level
fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("CRUCIBLE_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow::anyhow!("{e}"))
    .context("Failed to set tracing subscriber")
}

fn build_backend(config: &BackendConfig) -> Result<Box<dyn ModelBackend>> {
    Ok(match config {
        BackendConfig::OpenAi(settings) => Box::new(OpenAiBackend::new(settings.clone())?),
        BackendConfig::Echo => Box::new(EchoBackend::new()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_json)?;

    let config = Config::from_file(&args.run_file)?;
    let base_dir = args.run_file.parent().unwrap_or(Path::new("."));
    let dataset = config.dataset(base_dir)?;
    info!(records = dataset.len(), "dataset loaded");

    let oracle: Arc<dyn SimilarityOracle> = Arc::new(TokenCosine);
    let mut orchestrator = Orchestrator::new(config.build_gate(&oracle), config.build_scorers(&oracle))
        .with_strategy(config.forward_strategy())
        .with_reporter(Arc::new(TracingReporter));

    let mut backend = build_backend(&config.backend)?;
    let result = orchestrator
        .run(backend.as_mut(), dataset)
        .await
        .context("Evaluation run failed")?;

    output::print_result(&result, config.comparison, args.output);

    if let Some(storage_path) = config.storage_path(base_dir) {
        output::store_result(&result, &storage_path)?;
        info!(path = %storage_path.display(), "result stored");
    }

    Ok(())
}
