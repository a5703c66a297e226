//! resonance — resonant memory store with a periodic cognitive scheduler
//!
//! Usage:
//!   resonance run [--ticks N] [--goal TEXT]   → run the loops until Ctrl-C
//!   resonance scan --tag critical             → list stored records
//!   resonance query "disk latency"            → rank records by resonance
//!   resonance stats                           → store summary as JSON
//!   resonance dump-config                     → print effective config as TOML

mod reflex;

use anyhow::Context;
use clap::{Parser, Subcommand};
use resonance_cognition::{CognitiveRuntime, CognitiveScheduler};
use resonance_core::ResonanceConfig;
use resonance_memory::{RecordStore, ResonanceMatcher, ScanQuery};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "resonance",
    about = "Resonant memory store driven by a six-phase cognitive scheduler",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (TOML)
    #[arg(long, global = true, default_value = "resonance.toml")]
    config: PathBuf,

    /// Durable state file (overrides storage.path)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cognition, monitoring and evolution loops
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
        /// Active goal used when scoring and querying
        #[arg(long)]
        goal: Option<String>,
    },
    /// List stored records, most important first
    Scan {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        min_importance: Option<f64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Rank stored records against a query
    Query {
        text: String,
        /// Resonance threshold (default: resonance.threshold)
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print store statistics
    Stats,
    /// Print the effective configuration
    DumpConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_json, cli.log_dir.as_deref())?;

    let mut config = ResonanceConfig::load(&cli.config);
    if let Some(state) = &cli.state {
        config.storage.path = state.clone();
    }

    match cli.command {
        Commands::Run { ticks, goal } => run(config, ticks, goal).await?,
        Commands::Scan { tag, min_importance, limit } => {
            let store = open_store(&config).await;
            let mut query = ScanQuery::new().limit(limit);
            if let Some(tag) = tag {
                query = query.tag(tag);
            }
            if let Some(min) = min_importance {
                query = query.min_importance(min);
            }
            for record in store.scan(&query).await {
                let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
                println!(
                    "{}  {:.2}  {}  [{}]  {}",
                    record.id,
                    record.importance,
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    tags.join(","),
                    record.event
                );
            }
        }
        Commands::Query { text, threshold, limit } => {
            let store = open_store(&config).await;
            let matcher = ResonanceMatcher::new(config.resonance.clone());
            let threshold = threshold.unwrap_or(config.resonance.threshold);
            let limit = limit.or(Some(config.resonance.max_results));
            for hit in matcher.resonate(&store, &text, threshold, limit).await {
                println!("{:.3}  {}  {}", hit.resonance, hit.record.id, hit.record.event);
            }
        }
        Commands::Stats => {
            let store = open_store(&config).await;
            let stats = store.stats(config.memory.protection_threshold, 10).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::DumpConfig => {
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

fn init_tracing(json: bool, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "resonance=info".into());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "resonance.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().json().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };
    let plain = (!json).then(|| fmt::layer().with_writer(std::io::stderr));
    let structured = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Open the durable store. A corrupt file leaves an empty store with a
/// warning record, so the error is logged and not propagated.
async fn open_store(config: &ResonanceConfig) -> Arc<RecordStore> {
    let store = Arc::new(RecordStore::with_path(&config.storage.path));
    match store.load_from_durable().await {
        Ok(report) if report.missing => {}
        Ok(report) => tracing::info!(
            "Loaded {} records ({} skipped) from {}",
            report.loaded,
            report.skipped.len(),
            config.storage.path.display()
        ),
        Err(e) => tracing::error!("{}; continuing with an empty store", e),
    }
    store
}

async fn run(config: ResonanceConfig, ticks: Option<u64>, goal: Option<String>) -> anyhow::Result<()> {
    let store = open_store(&config).await;
    let collaborators = reflex::collaborators(store.clone(), &config.memory);
    let mut scheduler = CognitiveScheduler::new(&config, store.clone(), collaborators);
    scheduler.set_goal(goal);

    let runtime = CognitiveRuntime::start(&config, scheduler, ticks);
    tracing::info!(
        "Runtime {} running, state at {} (Ctrl-C to stop)",
        runtime.id(),
        config.storage.path.display()
    );

    let written = runtime
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Ctrl-C handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("persisting state on shutdown")?;

    println!("{} records persisted to {}", written, config.storage.path.display());
    Ok(())
}
