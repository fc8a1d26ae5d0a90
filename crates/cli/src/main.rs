use anyhow::{Context, Result};
use buildrag_collector::{Collector, JenkinsClient};
use buildrag_indexer::CorpusIndexer;
use buildrag_record_store::RecordStore;
use buildrag_retrieval::{HttpGenerator, RetrievalEngine, DEFAULT_TOP_K};
use buildrag_vector_store::EmbeddingModel;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

mod config;
mod http_api;

use config::Config;

#[derive(Parser)]
#[command(name = "buildrag")]
#[command(about = "Jenkins build-history collector and question answering", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file (default: ./buildrag.toml if present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Override embedding backend in this process
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Override embedding model id
    #[arg(long, global = true)]
    embed_model: Option<String>,

    /// Model cache directory (overrides BUILDRAG_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll Jenkins and append new builds to the record store
    Collect(CollectArgs),

    /// Rebuild the vector index from the record store
    Index(IndexArgs),

    /// Ask one question against the indexed build history
    Ask(AskArgs),

    /// Show aggregate counters over the indexed corpus
    Stats(StatsArgs),

    /// Serve the question-answering API over HTTP
    Serve(ServeArgs),
}

#[derive(Args)]
struct CollectArgs {
    /// Run a single collection cycle and exit
    #[arg(long)]
    once: bool,
}

#[derive(Args)]
struct IndexArgs {
    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct AskArgs {
    /// The question to answer
    question: String,

    /// Number of builds to retrieve as context
    #[arg(long, short = 'n', default_value_t = DEFAULT_TOP_K)]
    limit: usize,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StatsArgs {
    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address (overrides [server].bind from the config)
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Copy, Clone, ValueEnum)]
enum EmbedMode {
    Fast,
    Stub,
}

impl EmbedMode {
    const fn as_str(self) -> &'static str {
        match self {
            EmbedMode::Fast => "fast",
            EmbedMode::Stub => "stub",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // Always silence ort crate unless verbose mode (ORT is extremely noisy)
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = Config::load(cli.config.as_deref())?;

    // Embedding settings flow config -> env -> backend; command-line flags
    // take precedence over the config file.
    if let Some(mode) = &config.embedding.mode {
        env::set_var("BUILDRAG_EMBEDDING_MODE", mode);
    }
    if let Some(model) = &config.embedding.model_id {
        env::set_var("BUILDRAG_EMBEDDING_MODEL", model);
    }
    if let Some(dir) = &config.embedding.model_dir {
        env::set_var("BUILDRAG_MODEL_DIR", dir);
    }
    if let Some(mode) = cli.embed_mode {
        env::set_var("BUILDRAG_EMBEDDING_MODE", mode.as_str());
    }
    if let Some(model) = &cli.embed_model {
        env::set_var("BUILDRAG_EMBEDDING_MODEL", model);
    }
    if let Some(dir) = &cli.model_dir {
        env::set_var("BUILDRAG_MODEL_DIR", dir);
    }

    match cli.command {
        Commands::Collect(args) => run_collect(args, config).await?,
        Commands::Index(args) => run_index(args, config).await?,
        Commands::Ask(args) => run_ask(args, config).await?,
        Commands::Stats(args) => run_stats(args, config).await?,
        Commands::Serve(args) => run_serve(args, config).await?,
    }

    Ok(())
}

async fn run_collect(args: CollectArgs, config: Config) -> Result<()> {
    let client = JenkinsClient::new(
        &config.jenkins.url,
        &config.jenkins.username,
        &config.jenkins.api_token,
    )
    .context("Failed to construct Jenkins client")?;
    let store = RecordStore::new(&config.storage.records_path);
    let collector = Collector::new(
        client,
        store,
        &config.jenkins.job,
        Duration::from_secs(config.collector.poll_interval_secs),
    );

    if args.once {
        let outcome = collector.run_cycle().await?;
        eprintln!(
            "Collected {} new builds ({} failed)",
            outcome.appended, outcome.failed
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    collector.run(shutdown_rx).await;
    Ok(())
}

async fn run_index(args: IndexArgs, config: Config) -> Result<()> {
    let store = RecordStore::new(&config.storage.records_path);
    let indexer = CorpusIndexer::new(store, &config.storage.index_dir)
        .context("Failed to initialize embedding backend")?;
    let stats = indexer.build().await?;

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "records": stats.records,
                "dimension": stats.dimension,
                "time_ms": stats.elapsed_ms,
            })
        );
    } else {
        eprintln!(
            "Indexed {} builds (dim {}) in {}ms",
            stats.records, stats.dimension, stats.elapsed_ms
        );
    }
    Ok(())
}

async fn load_engine(config: &Config) -> Result<RetrievalEngine> {
    let embedder = EmbeddingModel::from_env().context("Failed to initialize embedding backend")?;
    let generator = HttpGenerator::new(
        &config.llm.base_url,
        &config.llm.model,
        config.llm.api_key.clone(),
    )?;
    let engine = RetrievalEngine::load(&config.storage.index_dir, embedder, Box::new(generator))
        .await
        .with_context(|| {
            format!(
                "Failed to load index from {} (run `buildrag index` first)",
                config.storage.index_dir.display()
            )
        })?;
    Ok(engine.with_top_k(config.retrieval.top_k))
}

async fn run_ask(args: AskArgs, config: Config) -> Result<()> {
    let engine = load_engine(&config).await?.with_top_k(args.limit);

    if args.json {
        let answer = engine.answer(&args.question).await?;
        let sources: Vec<serde_json::Value> = answer
            .retrieved
            .iter()
            .map(|r| {
                serde_json::json!({
                    "job": r.record.job,
                    "build_number": r.record.build_number,
                    "result": r.record.result.to_string(),
                    "url": r.record.url,
                    "relevance": r.relevance(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "answer": answer.text,
                "sources": sources,
            }))?
        );
        return Ok(());
    }

    let answer = engine.answer(&args.question).await?;
    eprintln!("Grounded on {} builds:", answer.retrieved.len());
    for r in &answer.retrieved {
        eprintln!(
            "  - {} #{} {} (relevance {:.3})",
            r.record.job,
            r.record.build_number,
            r.record.result,
            r.relevance()
        );
    }
    println!("{}", answer.text);
    Ok(())
}

async fn run_stats(args: StatsArgs, config: Config) -> Result<()> {
    let engine = load_engine(&config).await?;
    let stats = engine.stats();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Total builds:   {}", stats.total_builds);
        println!("Success:        {}", stats.success);
        println!("Failure:        {}", stats.failure);
        println!("Aborted:        {}", stats.aborted);
        println!("Unknown:        {}", stats.unknown);
        println!("Success rate:   {:.2}%", stats.success_rate_percent);
    }
    Ok(())
}

async fn run_serve(args: ServeArgs, config: Config) -> Result<()> {
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let engine = Arc::new(load_engine(&config).await?);

    let app = http_api::router(engine);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    println!("Serving build-history API on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}
