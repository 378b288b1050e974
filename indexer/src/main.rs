use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ocrsearch_core::builder::PendingFile;
use ocrsearch_core::{
    BackendKind, BuilderConfig, CandidateMode, CommandEmbedder, Config, Embedder, EmbeddingStore, IndexBuilder,
    IndexHandle, IndexStore, InvertedIndex, MissingEmbeddingPolicy, OcrExtractor, RankingConfig, ScoredResult,
    SearchService, TextExtractor,
};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build, embed and query the OCR document index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct IndexArgs {
    /// Persisted index location (a JSON file, or a directory for sled)
    #[arg(long, env = "OCRSEARCH_INDEX")]
    index: PathBuf,
    /// Storage backend: file or sled
    #[arg(long, default_value_t = BackendKind::File)]
    backend: BackendKind,
}

#[derive(Args, Debug, Clone)]
struct OcrArgs {
    /// Tesseract language pack
    #[arg(long, default_value = "spa")]
    ocr_lang: String,
    /// Rasterisation resolution handed to pdftoppm
    #[arg(long, default_value_t = 300)]
    ocr_dpi: u32,
}

impl OcrArgs {
    fn extractor(&self) -> OcrExtractor {
        OcrExtractor { language: self.ocr_lang.clone(), dpi: self.ocr_dpi, ..OcrExtractor::default() }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Index every PDF in the folder that is not in the index yet
    Build {
        /// Folder of scanned PDFs
        #[arg(long, env = "OCRSEARCH_DOCUMENTS")]
        documents: PathBuf,
        #[command(flatten)]
        index: IndexArgs,
        #[command(flatten)]
        ocr: OcrArgs,
        /// Extraction worker threads
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Kill a file's extraction once it runs longer than this
        #[arg(long)]
        extract_timeout_secs: Option<u64>,
    },
    /// Precompute document embeddings with an external model command
    Embed {
        #[arg(long, env = "OCRSEARCH_DOCUMENTS")]
        documents: PathBuf,
        /// Output embeddings file; existing entries are kept
        #[arg(long, env = "OCRSEARCH_EMBEDDINGS")]
        output: PathBuf,
        /// Model command line, e.g. `python embed.py`
        #[arg(long, env = "OCRSEARCH_EMBEDDER")]
        embedder: String,
        #[command(flatten)]
        ocr: OcrArgs,
    },
    /// Run one query and print the ranked results as JSON
    Search {
        query: String,
        #[command(flatten)]
        index: IndexArgs,
        #[arg(long, env = "OCRSEARCH_EMBEDDINGS")]
        embeddings: Option<PathBuf>,
        #[arg(long, env = "OCRSEARCH_EMBEDDER")]
        embedder: Option<String>,
        #[arg(long, default_value_t = 10)]
        k: usize,
        /// lexical-only or skip
        #[arg(long, default_value_t = MissingEmbeddingPolicy::LexicalOnly)]
        missing_embedding: MissingEmbeddingPolicy,
        /// Score every document when no query term is in the index
        #[arg(long, default_value_t = false)]
        full_corpus: bool,
        /// Embed the normalized query terms instead of the raw query
        #[arg(long, default_value_t = false)]
        embed_key_terms: bool,
    },
    /// Copy an index between backends, re-cleaning every key on the way
    Migrate {
        #[arg(long)]
        from: PathBuf,
        #[arg(long, default_value_t = BackendKind::File)]
        from_backend: BackendKind,
        #[arg(long)]
        to: PathBuf,
        #[arg(long, default_value_t = BackendKind::Sled)]
        to_backend: BackendKind,
    },
}

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    took_s: f64,
    total_hits: usize,
    results: &'a [ScoredResult],
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { documents, index, ocr, workers, extract_timeout_secs } => {
            let mut config = Config::new(index.index).with_documents_dir(documents);
            config.backend = index.backend;
            config.builder = BuilderConfig {
                workers,
                extract_timeout: extract_timeout_secs.map(Duration::from_secs),
                ..BuilderConfig::default()
            };
            build(&config, ocr.extractor())
        }
        Commands::Embed { documents, output, embedder, ocr } => {
            embed(documents, output, CommandEmbedder::from_command_line(&embedder)?, ocr.extractor())
        }
        Commands::Search { query, index, embeddings, embedder, k, missing_embedding, full_corpus, embed_key_terms } => {
            let mut config = Config::new(index.index).with_embeddings(embeddings);
            config.backend = index.backend;
            config.ranking = RankingConfig {
                missing_embedding,
                candidates: if full_corpus { CandidateMode::FullCorpus } else { CandidateMode::Lexical },
                embed_key_terms,
                ..RankingConfig::default()
            };
            let embedder = embedder.map(|line| CommandEmbedder::from_command_line(&line)).transpose()?;
            search(&config, embedder, &query, k)
        }
        Commands::Migrate { from, from_backend, to, to_backend } => migrate(from, from_backend, to, to_backend),
    }
}

fn build(config: &Config, extractor: OcrExtractor) -> Result<()> {
    config.validate()?;
    let documents = config.documents_dir()?;
    let store = IndexStore::open(config.backend, &config.index_path)?;
    let mut index = store.load()?;

    let builder = IndexBuilder::new(Arc::new(extractor), config.builder.clone());
    let report = builder.build_delta(documents, &mut index)?;
    if report.changed() {
        store.save(&index)?;
    }
    tracing::info!(
        indexed = report.indexed.len(),
        empty = report.empty.len(),
        failed = report.failed.len(),
        timed_out = report.timed_out.len(),
        terms = index.num_terms(),
        saved = report.changed(),
        "build complete"
    );
    Ok(())
}

fn embed(documents: PathBuf, output: PathBuf, embedder: CommandEmbedder, extractor: OcrExtractor) -> Result<()> {
    let mut vectors = if output.exists() {
        EmbeddingStore::load(&output)?.into_vectors()
    } else {
        Default::default()
    };

    // An empty index makes every PDF in the folder pending.
    let builder = IndexBuilder::new(Arc::new(extractor.clone()), BuilderConfig::default());
    let pending: Vec<PendingFile> = builder
        .scan(&documents, &InvertedIndex::new())?
        .into_iter()
        .filter(|file| !vectors.contains_key(&file.doc_id))
        .collect();
    tracing::info!(pending = pending.len(), existing = vectors.len(), "embedding documents");

    let mut failed = 0usize;
    for file in pending {
        let outcome = extractor.extract(&file.path, None).and_then(|text| embedder.embed(&text));
        match outcome {
            Ok(vector) => {
                vectors.insert(file.doc_id, vector);
            }
            Err(err) => {
                tracing::warn!(doc_id = %file.doc_id, error = %err, "skipping document");
                failed += 1;
            }
        }
    }

    let store = EmbeddingStore::from_vectors(vectors).context("embedding model returned inconsistent vectors")?;
    store.save(&output).with_context(|| format!("writing {}", output.display()))?;
    tracing::info!(documents = store.len(), dims = store.dims(), failed, output = %output.display(), "embeddings saved");
    Ok(())
}

fn search(config: &Config, embedder: Option<CommandEmbedder>, query: &str, k: usize) -> Result<()> {
    config.validate()?;
    let index = IndexStore::open(config.backend, &config.index_path)?.load()?;
    let embeddings = match &config.embeddings_path {
        Some(path) => EmbeddingStore::load(path)?,
        None => EmbeddingStore::default(),
    };
    if embedder.is_some() && embeddings.is_empty() {
        tracing::warn!("an embedder was given without stored embeddings; scores will be lexical only");
    }
    let embedder = embedder.map(|e| Arc::new(e) as Arc<dyn Embedder>);
    let service = SearchService::new(IndexHandle::new(index), embeddings, embedder, config.ranking.clone());

    let start = Instant::now();
    let mut results = service.search(query)?;
    let total_hits = results.len();
    results.truncate(k);
    let output = SearchOutput { query, took_s: start.elapsed().as_secs_f64(), total_hits, results: &results };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn migrate(from: PathBuf, from_backend: BackendKind, to: PathBuf, to_backend: BackendKind) -> Result<()> {
    if from == to {
        bail!("source and destination are the same path: {}", from.display());
    }
    let source = IndexStore::open(from_backend, &from)?;
    let index = source.load()?;
    let before = index.num_terms();
    let index = index.renormalize();
    IndexStore::open(to_backend, &to)?.save(&index)?;
    tracing::info!(
        from = %source.location().display(),
        to = %to.display(),
        terms_before = before,
        terms_after = index.num_terms(),
        documents = index.indexed_documents().len(),
        "index migrated"
    );
    Ok(())
}
