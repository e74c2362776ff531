mod files;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use ragdb_core::cancel::CancellationToken;
use ragdb_core::config::{BackendConfig, Config};
use ragdb_core::filter::MetadataFilter;
use ragdb_core::types::{HybridWeights, Metric};
use ragdb_pipeline::RagPipeline;

#[derive(Parser)]
#[command(name = "ragdb", about = "Chunk, embed, index and retrieve documents")]
struct Cli {
    /// Directory holding ragdb.toml (defaults to the current directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage indexes
    Index {
        #[command(subcommand)]
        action: IndexCommand,
    },
    /// Ingest a file or every supported file under a directory
    Ingest {
        path: PathBuf,
        /// Target index (defaults to content-type routing)
        #[arg(long)]
        index: Option<String>,
        /// Stop after this many files
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Retrieve the chunks most relevant to a query
    Query {
        text: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
        /// Restrict to these indexes (repeatable)
        #[arg(long = "index")]
        indexes: Vec<String>,
        /// Hybrid weights as `vector,keyword`, e.g. `0.7,0.3`
        #[arg(long)]
        hybrid: Option<String>,
        /// Metadata equality filter `key=value` (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Print the raw result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a document from every index holding it
    Delete { doc_id: String },
    /// Show the lineage of a document
    Status { doc_id: String },
    /// Check every index backend
    Health,
}

#[derive(Subcommand)]
enum IndexCommand {
    Create {
        name: String,
        #[arg(long, default_value = "memory")]
        backend: String,
        /// Defaults to the embedding dimensionality
        #[arg(long)]
        dim: Option<usize>,
        #[arg(long, default_value = "cosine")]
        metric: String,
        /// Backend connection settings as JSON
        #[arg(long)]
        connection: Option<String>,
    },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config_dir {
        Some(dir) => Config::load_from(dir)?,
        None => Config::load()?,
    };
    let settings = config.settings()?;
    let pipeline = RagPipeline::open(settings).await.context("opening pipeline")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Command::Index { action } => run_index(&pipeline, action).await,
        Command::Ingest { path, index, limit } => run_ingest(&pipeline, path, index, limit, &cancel).await,
        Command::Query { text, top_k, threshold, indexes, hybrid, filters, json } => {
            let mut query = pipeline.new_query(text);
            if let Some(k) = top_k {
                query = query.with_top_k(k);
            }
            if let Some(t) = threshold {
                query = query.with_threshold(t);
            }
            if !indexes.is_empty() {
                query = query.with_indexes(indexes);
            }
            if let Some(spec) = hybrid {
                query = query.with_hybrid(parse_weights(&spec)?);
            }
            query = query.with_filter(MetadataFilter::from_pairs(filters.iter().map(String::as_str))?);

            let result = pipeline.query(&query, &cancel).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }
            for (rank, hit) in result.hits.iter().enumerate() {
                let snippet: String = hit.chunk.text.chars().take(160).collect();
                println!("{:>2}. {:.4}  [{}] {}", rank + 1, hit.combined_score, hit.index, hit.chunk.id);
                println!("    {}", snippet.replace('\n', " "));
            }
            for failure in &result.failed_indexes {
                eprintln!("index '{}' failed: {}", failure.index, failure.error.message);
            }
            if result.hits.is_empty() {
                println!("no matches");
            }
            Ok(())
        }
        Command::Delete { doc_id } => {
            let removed = pipeline.delete_document(&doc_id).await?;
            println!("deleted '{doc_id}' ({removed} chunks)");
            Ok(())
        }
        Command::Status { doc_id } => {
            let lineage = pipeline.document_status(&doc_id)?;
            println!("{}", serde_json::to_string_pretty(&lineage)?);
            Ok(())
        }
        Command::Health => {
            for (index, status) in pipeline.health().await {
                println!("{index}: {}", serde_json::to_string(&status)?);
            }
            Ok(())
        }
    }
}

async fn run_index(pipeline: &RagPipeline, action: IndexCommand) -> Result<()> {
    match action {
        IndexCommand::Create { name, backend, dim, metric, connection } => {
            let connection = match connection {
                Some(raw) => serde_json::from_str(&raw).context("--connection must be JSON")?,
                None => serde_json::Value::Null,
            };
            let config = BackendConfig {
                backend,
                connection,
                dimensionality: dim.unwrap_or(pipeline.settings().embedding.dimensionality),
                metric: Metric::from_str(&metric)?,
                tuning: serde_json::Value::Null,
            };
            let spec = pipeline.create_index(&name, config).await?;
            println!("index '{}' ready ({} dims, {})", spec.name, spec.dimensionality, spec.metric);
        }
        IndexCommand::List => {
            for spec in pipeline.list_indexes() {
                println!("{}\t{}\t{}", spec.name, spec.dimensionality, spec.metric);
            }
        }
    }
    Ok(())
}

async fn run_ingest(
    pipeline: &RagPipeline,
    path: PathBuf,
    index: Option<String>,
    limit: Option<usize>,
    cancel: &CancellationToken,
) -> Result<()> {
    if !path.exists() {
        bail!("path does not exist: {}", path.display());
    }
    let mut paths = files::list_files(&path);
    if let Some(limit) = limit {
        paths.truncate(limit);
    }
    tracing::info!(files = paths.len(), root = %path.display(), "ingesting");

    let bar = ProgressBar::new(paths.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let (mut complete, mut partial, mut failed) = (0usize, 0usize, 0usize);
    for file in &paths {
        let text = match std::fs::read_to_string(file) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %file.display(), error = %e, "skipping unreadable file");
                failed += 1;
                bar.inc(1);
                continue;
            }
        };
        let doc = files::document_for(&path, file, text);
        bar.set_message(doc.id.clone());
        match pipeline.ingest(doc, index.as_deref(), cancel).await {
            Ok(report) if report.failed_count() == 0 => complete += 1,
            Ok(report) => {
                tracing::warn!(doc = %report.doc_id, failed = report.failed_count(), "document partially stored");
                partial += 1;
            }
            Err(ragdb_core::error::RagError::Cancelled) => {
                bar.abandon_with_message("cancelled");
                bail!("ingestion cancelled");
            }
            Err(e) => {
                tracing::warn!(path = %file.display(), error = %e, "document failed");
                failed += 1;
            }
        }
        bar.inc(1);
    }
    bar.finish_with_message("done");
    println!("ingested {complete} documents ({partial} partial, {failed} failed)");
    Ok(())
}

fn parse_weights(spec: &str) -> Result<HybridWeights> {
    let (v, k) = spec.split_once(',').context("--hybrid expects `vector,keyword`")?;
    Ok(HybridWeights::new(v.trim().parse()?, k.trim().parse()?)?)
}
