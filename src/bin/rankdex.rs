//! Thin CLI demo harness over the `rankdex` library. Not part of the core;
//! exists so the index/query pipeline can be exercised from a shell.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rankdex::prelude::*;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a CSV or JSON-lines file and save it to disk.
    Build {
        /// Input corpus (.csv, .jsonl, .ndjson, or .json).
        input: PathBuf,
        /// Columns to index, comma-separated.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        /// Directory to write the index into; must not already exist non-empty.
        #[arg(long)]
        out: PathBuf,
        /// Number of partitions to shard the corpus into.
        #[arg(long, default_value_t = num_cpus())]
        partitions: usize,
        /// Use the bundled English stopword list.
        #[arg(long)]
        stopwords_english: bool,
    },
    /// Load a saved index and run a single query against it.
    Search {
        /// Directory previously written by `build`.
        index: PathBuf,
        /// Query text, broadcast to every indexed field.
        query: String,
        /// Number of results to return.
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            fields,
            out,
            partitions,
            stopwords_english,
        } => run_build(input, fields, out, partitions, stopwords_english),
        Commands::Search { index, query, k } => run_search(index, query, k),
    }
}

fn run_build(
    input: PathBuf,
    fields: Vec<String>,
    out: PathBuf,
    partitions: usize,
    stopwords_english: bool,
) -> Result<()> {
    if fields.is_empty() {
        bail!("--fields must name at least one column to index");
    }
    let options = BuildOptions {
        fields,
        num_partitions: partitions.max(1),
        stopwords: if stopwords_english {
            rankdex::tokenize::Stopwords::English
        } else {
            rankdex::tokenize::Stopwords::None
        },
        ..Default::default()
    };
    let mut engine = Bm25Engine::new(options)?;
    let indexed = engine
        .index_file(&input)
        .with_context(|| format!("indexing {}", input.display()))?;
    engine
        .save(&out)
        .with_context(|| format!("saving index to {}", out.display()))?;
    println!("indexed {indexed} documents into {}", out.display());
    Ok(())
}

fn run_search(index: PathBuf, query: String, k: usize) -> Result<()> {
    let mut engine = Bm25Engine::load(&index)
        .with_context(|| format!("loading index from {}", index.display()))?;
    let docs = engine.get_topk_docs(Query::Broadcast(query), k, BoostFactors::default(), None)?;
    for (rank, doc) in docs.iter().enumerate() {
        println!("{:>3}. {:?}", rank + 1, doc);
    }
    if docs.is_empty() {
        println!("(no matches)");
    }
    Ok(())
}
