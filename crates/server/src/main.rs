//! Assay Server
//!
//! Command line entry point: one-shot generation, the HTTP API, and a view
//! over stored runs.

mod api;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use assay_core::backend::HttpBackend;
use assay_core::skills::artifact_registry::GenerationParams;
use assay_core::state::{io::get_runtime_path, transcript, RunStore};
use assay_core::swarm::{GenerationRequest, Orchestrator, OrchestratorConfig};
use assay_core::tools::{collector_for, DataCollector, StaticCollector};

use api::AppState;

#[derive(Parser, Clone)]
#[command(author, version, about = "Assay - repository-grounded problem generation")]
struct Args {
    /// JSON configuration file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run the pipeline once for a target and print the report
    Generate {
        /// `owner/repo`, a GitHub URL, a local directory or a snapshot `.json`
        target: String,
        #[arg(long, default_value = "intermediate")]
        difficulty: String,
        #[arg(long)]
        category: Option<String>,
        /// Time box in minutes
        #[arg(long)]
        time_box: Option<u32>,
        /// Write the report JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write a Markdown transcript under `.assay/transcripts/`
        #[arg(long)]
        transcript: bool,
        /// Serve this saved snapshot instead of collecting the target
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// List stored runs
    Runs {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_env() {
    dotenvy::dotenv().ok();
    // Keys saved next to the run database
    let env_path = get_runtime_path().join(".env");
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
}

/// Persistence is optional; a run still completes without it
fn open_store() -> Option<Arc<RunStore>> {
    match RunStore::open() {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!(error = %e, "Run store unavailable; runs will not be persisted");
            None
        }
    }
}

fn github_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
}

async fn run_generate(config: OrchestratorConfig, command: CliCommand) -> anyhow::Result<()> {
    let CliCommand::Generate {
        target,
        difficulty,
        category,
        time_box,
        output,
        transcript: write_transcript,
        snapshot,
    } = command
    else {
        anyhow::bail!("not a generate command");
    };

    let collector: Arc<dyn DataCollector> = match snapshot {
        Some(path) => Arc::new(StaticCollector::from_file(&path)?),
        None => collector_for(&target, github_token())?,
    };
    let mut orchestrator = Orchestrator::new(config, collector, Arc::new(HttpBackend::new()));
    if let Some(store) = open_store() {
        orchestrator = orchestrator.with_store(store);
    }

    let request = GenerationRequest::new(&target).with_params(GenerationParams {
        difficulty,
        category,
        time_box_minutes: time_box,
    });
    let report = orchestrator.generate(request).await?;

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }
    if write_transcript {
        transcript::export(&report).await?;
    }

    eprintln!(
        "{} | {} | score {:.1} | v{} after {} refinement(s)",
        report.artifact.body.title,
        report.outcome.as_str(),
        report.validation.overall_score,
        report.artifact.version,
        report.metrics.refinement_iterations,
    );
    for issue in &report.issues {
        eprintln!("  - {}", issue);
    }
    Ok(())
}

fn run_list(limit: usize) -> anyhow::Result<()> {
    let store = RunStore::open()?;
    let runs = store.list_runs(limit)?;
    if runs.is_empty() {
        println!("No runs recorded in {}", get_runtime_path().display());
        return Ok(());
    }
    for run in runs {
        let detail = match (&run.outcome, run.overall_score, &run.error) {
            (Some(outcome), Some(score), _) => format!("{} ({:.1})", outcome, score),
            (_, _, Some(error)) => error.clone(),
            _ => String::new(),
        };
        println!(
            "{}  {:<9}  {:<30}  {}  {}",
            run.id,
            run.status.as_str(),
            run.target_id,
            run.finished_at,
            detail
        );
    }
    Ok(())
}

async fn run_server(config: OrchestratorConfig, port: u16) -> anyhow::Result<()> {
    let mut state = AppState::new(config, Arc::new(HttpBackend::new()));
    state.store = open_store();
    state.github_token = github_token();
    let app = api::router(Arc::new(state));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Assay server running at http://{}", addr);
    tracing::info!("  POST /api/v1/generate, GET /api/v1/runs, GET /api/v1/events (SSE)");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();
    let config = OrchestratorConfig::load(args.config.as_deref())?;

    match args.command {
        Some(command @ CliCommand::Generate { .. }) => run_generate(config, command).await,
        Some(CliCommand::Runs { limit }) => run_list(limit),
        Some(CliCommand::Serve { port }) => run_server(config, port).await,
        None => run_server(config, 8080).await,
    }
}
