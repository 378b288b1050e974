use anyhow::{Context, Result};
use clap::Parser;
use ocrsearch_core::{
    BackendKind, BuilderConfig, CandidateMode, CommandEmbedder, Config, CrawlerDaemon, Embedder, EmbeddingStore,
    IndexBuilder, IndexHandle, IndexStore, IndexingService, MissingEmbeddingPolicy, OcrExtractor, RankingConfig,
    SearchService,
};
use server::build_app;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Persisted index location
    #[arg(long, env = "OCRSEARCH_INDEX")]
    index: PathBuf,
    #[arg(long, default_value_t = BackendKind::File)]
    backend: BackendKind,
    /// Folder of scanned PDFs, needed for /doc and --watch
    #[arg(long, env = "OCRSEARCH_DOCUMENTS")]
    documents: Option<PathBuf>,
    /// Precomputed document embeddings
    #[arg(long, env = "OCRSEARCH_EMBEDDINGS")]
    embeddings: Option<PathBuf>,
    /// Model command line used to embed queries
    #[arg(long, env = "OCRSEARCH_EMBEDDER")]
    embedder: Option<String>,
    #[arg(long, default_value_t = MissingEmbeddingPolicy::LexicalOnly)]
    missing_embedding: MissingEmbeddingPolicy,
    #[arg(long, default_value_t = false)]
    full_corpus: bool,
    /// Keep indexing the documents folder in the background
    #[arg(long, default_value_t = false)]
    watch: bool,
    #[arg(long, default_value_t = 60)]
    interval_secs: u64,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Kill a file's extraction once it runs longer than this
    #[arg(long)]
    extract_timeout_secs: Option<u64>,
    /// Tesseract language pack
    #[arg(long, default_value = "spa")]
    ocr_lang: String,
    #[arg(long, default_value_t = 300)]
    ocr_dpi: u32,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::new(&self.index).with_embeddings(self.embeddings.clone());
        config.documents_dir = self.documents.clone();
        config.backend = self.backend;
        config.interval = Duration::from_secs(self.interval_secs);
        config.builder = BuilderConfig {
            workers: self.workers,
            extract_timeout: self.extract_timeout_secs.map(Duration::from_secs),
            ..BuilderConfig::default()
        };
        config.ranking = RankingConfig {
            missing_embedding: self.missing_embedding,
            candidates: if self.full_corpus { CandidateMode::FullCorpus } else { CandidateMode::Lexical },
            ..RankingConfig::default()
        };
        config
    }

    fn extractor(&self) -> OcrExtractor {
        OcrExtractor { language: self.ocr_lang.clone(), dpi: self.ocr_dpi, ..OcrExtractor::default() }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = args.config();
    config.validate()?;

    let store = Arc::new(
        IndexStore::open(config.backend, &config.index_path)
            .with_context(|| format!("opening index at {}", config.index_path.display()))?,
    );
    let mut service = None;
    let handle = if args.watch {
        let handle = IndexHandle::default();
        let builder = IndexBuilder::new(Arc::new(args.extractor()), config.builder.clone());
        let daemon = CrawlerDaemon::new(config.documents_dir()?, builder, Arc::clone(&store), handle.clone());
        let mut indexing = IndexingService::new(daemon, config.interval);
        indexing.start()?;
        service = Some(indexing);
        handle
    } else {
        IndexHandle::new(store.load()?)
    };

    let embeddings = match &config.embeddings_path {
        Some(path) => EmbeddingStore::load(path)?,
        None => EmbeddingStore::default(),
    };
    let embedder = match &args.embedder {
        Some(line) => Some(Arc::new(CommandEmbedder::from_command_line(line)?) as Arc<dyn Embedder>),
        None => None,
    };
    let search = Arc::new(SearchService::new(handle, embeddings, embedder, config.ranking.clone()));
    let app = build_app(search, config.documents_dir.clone());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, watch = args.watch, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(mut indexing) = service {
        tokio::task::spawn_blocking(move || indexing.stop()).await??;
    }
    Ok(())
}
