use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gapidx_core::persist::{load_index, save_index, IndexPaths, MetaFile};
use gapidx_core::query::top_k;
use gapidx_core::tokenizer::normalize;
use gapidx_core::{BooleanMode, Bm25Params, IndexBuilder, QueryEngine, RankingMode};
use tracing_subscriber::{fmt, EnvFilter};

use std::path::Path;
use std::time::Instant;

mod input;

#[derive(Parser)]
#[command(name = "gapidx-indexer")]
#[command(about = "Build and query a gap-compressed inverted index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from tab-separated (.tsv/.txt) or JSONL collection files
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long)]
        output: String,
        /// Run documents through the tokenizer before indexing
        #[arg(long, default_value_t = false)]
        normalize: bool,
        /// Worker threads for postings accumulation (defaults to one per core)
        #[arg(long)]
        threads: Option<usize>,
        /// Documents per accumulation shard
        #[arg(long, default_value_t = 1024)]
        shard_size: usize,
    },
    /// Run one query against a built index and print `doc_id<TAB>score` lines
    Query {
        /// Index directory
        #[arg(long, default_value = "./index")]
        index: String,
        /// Query text
        #[arg(long)]
        q: String,
        /// tfidf or bm25
        #[arg(long, default_value = "bm25")]
        ranking: RankingMode,
        /// and or or
        #[arg(long, default_value = "or")]
        mode: BooleanMode,
        /// Number of results to print
        #[arg(long, default_value_t = 10)]
        k: usize,
        #[arg(long, default_value_t = 1.5)]
        k1: f64,
        #[arg(long, default_value_t = 0.75)]
        b: f64,
        /// Treat the query as already-normalized whitespace-separated terms
        #[arg(long, default_value_t = false)]
        raw: bool,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, normalize, threads, shard_size } => {
            if let Some(n) = threads {
                rayon::ThreadPoolBuilder::new().num_threads(n).build_global()?;
            }
            build_index(Path::new(&input), Path::new(&output), normalize, shard_size)
        }
        Commands::Query { index, q, ranking, mode, k, k1, b, raw } => {
            let params = Bm25Params::new(k1, b)?;
            run_query(Path::new(&index), &q, ranking, mode, k, params, raw)
        }
    }
}

fn build_index(input: &Path, output: &Path, normalize: bool, shard_size: usize) -> Result<()> {
    let start = Instant::now();
    let files = input::collect_inputs(input)?;
    tracing::info!(files = files.len(), input = %input.display(), "reading collection");
    let corpus = input::read_corpus(&files, normalize)?;
    tracing::info!(num_docs = corpus.len(), "ingested documents");

    let built = IndexBuilder::new().with_shard_size(shard_size).build(&corpus);
    let created_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    let meta = MetaFile::for_index(&built, created_at);
    let paths = IndexPaths::new(output);
    save_index(&paths, &built, &meta).with_context(|| format!("writing index to {}", output.display()))?;

    tracing::info!(
        output = %output.display(),
        num_docs = meta.num_docs,
        num_terms = meta.num_terms,
        compressed_bytes = built.compressed_bytes(),
        took_s = start.elapsed().as_secs_f64(),
        "index build complete"
    );
    Ok(())
}

fn run_query(
    index: &Path,
    q: &str,
    ranking: RankingMode,
    mode: BooleanMode,
    k: usize,
    params: Bm25Params,
    raw: bool,
) -> Result<()> {
    let loaded = load_index(&IndexPaths::new(index)).with_context(|| format!("loading index from {}", index.display()))?;
    let engine = QueryEngine::from_loaded(&loaded).with_bm25_params(params);

    let start = Instant::now();
    let terms: Vec<String> = if raw { q.split_whitespace().map(str::to_string).collect() } else { normalize(q) };
    let results = engine.process_query(&terms, ranking, mode);
    let total_hits = results.len();
    tracing::info!(?terms, %ranking, %mode, total_hits, took_s = start.elapsed().as_secs_f64(), "query answered");

    for hit in top_k(results, k) {
        println!("{}\t{:.6}", hit.doc_id, hit.score);
    }
    Ok(())
}
