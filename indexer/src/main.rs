use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shardseek_core::batch::{build_index, BuildConfig};
use shardseek_core::bookkeeper::build_directory;
use shardseek_core::merge::{document_frequencies, merge_index, MergeConfig};
use shardseek_core::persist::{list_batches, load_doc_frequencies, load_meta, IndexPaths};
use shardseek_core::query::{QueryEngine, SearchConfig};
use shardseek_core::source::JsonTreeSource;
use shardseek_core::DEFAULT_TOP_K;
use std::path::Path;
use std::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build, merge and query a sharded TF-IDF inverted index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a corpus of JSON documents into batch files
    Build {
        /// Corpus path (directory tree of {"url", "content"} JSON files, or one file)
        #[arg(long)]
        input: String,
        /// Index directory
        #[arg(long)]
        output: String,
        /// Documents per batch
        #[arg(long, default_value_t = 10_000)]
        batch_size: usize,
        /// Batches that may wait for the disk writer
        #[arg(long, default_value_t = 4)]
        writer_queue: usize,
        /// Continue an existing build instead of starting over
        #[arg(long, default_value_t = false)]
        append: bool,
    },
    /// Fold batch files into term shards and rebuild the offset directory
    Merge {
        #[arg(long, default_value = "./index")]
        index: String,
        /// Postings kept per term
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Corpus size for IDF; defaults to the document table size
        #[arg(long)]
        total_docs: Option<u64>,
        /// Fold batches into the shards already on disk
        #[arg(long, default_value_t = false)]
        keep_existing: bool,
    },
    /// Rescan shard files and rewrite the offset directory
    Bookkeeper {
        #[arg(long, default_value = "./index")]
        index: String,
    },
    /// Summarize an index: documents, terms, batches
    Report {
        #[arg(long, default_value = "./index")]
        index: String,
    },
    /// Run one query and print the ranked URLs
    Search {
        #[arg(long, default_value = "./index")]
        index: String,
        /// Result count
        #[arg(long, default_value_t = 10)]
        k: usize,
        query: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, batch_size, writer_queue, append } => {
            build(&input, &output, BuildConfig { batch_size, writer_queue, append })
        }
        Commands::Merge { index, top_k, total_docs, keep_existing } => {
            merge(&index, MergeConfig { top_k, total_docs, keep_existing })
        }
        Commands::Bookkeeper { index } => {
            let directory = build_directory(&IndexPaths::new(&index))?;
            let terms: usize = directory.values().map(|m| m.len()).sum();
            println!("offset directory: {} shards, {terms} terms", directory.len());
            Ok(())
        }
        Commands::Report { index } => report(&index),
        Commands::Search { index, k, query } => search(&index, &query, k),
    }
}

fn build(input: &str, output: &str, config: BuildConfig) -> Result<()> {
    if !Path::new(input).exists() {
        bail!("input path {input} does not exist");
    }
    let source = JsonTreeSource::new(input);
    tracing::info!(files = source.len(), input, "corpus discovered");
    let paths = IndexPaths::new(output);
    let start = Instant::now();
    let report = build_index(&paths, &config, source.documents())?;
    println!(
        "indexed {} documents ({} skipped, {} failed) into {} batches in {:.1}s",
        report.indexed,
        report.skipped,
        report.failed,
        report.batches,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn merge(index: &str, config: MergeConfig) -> Result<()> {
    let paths = IndexPaths::new(index);
    let start = Instant::now();
    let report = merge_index(&paths, &config)?;
    println!(
        "merged {} batches into {} shards ({} terms, N={}) in {:.1}s",
        report.batches_merged,
        report.shards.len(),
        report.terms,
        report.total_docs,
        start.elapsed().as_secs_f64()
    );
    if !report.is_complete() {
        eprintln!("warning: {} batch files could not be read; the index is incomplete:", report.batches_skipped.len());
        for path in &report.batches_skipped {
            eprintln!("  {}", path.display());
        }
    }
    Ok(())
}

fn report(index: &str) -> Result<()> {
    let paths = IndexPaths::new(index);
    let batches = list_batches(&paths)?;
    let stats = document_frequencies(&batches);
    let unique_terms = match load_doc_frequencies(&paths) {
        Ok(df) => df.len(),
        Err(_) => stats.doc_frequencies.len(),
    };
    println!("batch files:  {} ({} unreadable)", batches.len(), stats.skipped.len());
    println!("unique terms: {unique_terms}");
    println!("unique docs:  {}", stats.distinct_docs);
    if let Ok(meta) = load_meta(&paths) {
        println!("documents:    {} indexed, {} skipped", meta.num_docs, meta.skipped_docs);
        println!("built at:     {} (format v{})", meta.created_at, meta.version);
    }
    Ok(())
}

fn search(index: &str, query: &str, k: usize) -> Result<()> {
    let engine = QueryEngine::open(IndexPaths::new(index))?.with_config(SearchConfig { limit: k.max(1) });
    let start = Instant::now();
    let results = engine.search(query)?;
    for term in &results.missing_terms {
        println!("'{term}' does not appear in the index");
    }
    for term in &results.stale_terms {
        eprintln!("warning: offset directory is stale for '{term}'; run `indexer bookkeeper`");
    }
    for (rank, hit) in results.hits.iter().enumerate() {
        println!("{:>3}. {}", rank + 1, hit.url);
    }
    println!("{} results in {:.2} ms", results.hits.len(), start.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}
