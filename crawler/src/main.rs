use anyhow::{Context, Result};
use clap::Parser;
use ocrsearch_core::{
    BackendKind, BuilderConfig, Config, CrawlerDaemon, IndexBuilder, IndexHandle, IndexStore, IndexingService,
    OcrExtractor,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Watch a folder of scanned PDFs and keep the index up to date")]
struct Cli {
    /// Folder of scanned PDFs
    #[arg(long, env = "OCRSEARCH_DOCUMENTS")]
    documents: PathBuf,
    /// Persisted index location
    #[arg(long, env = "OCRSEARCH_INDEX")]
    index: PathBuf,
    /// Storage backend: file or sled
    #[arg(long, default_value_t = BackendKind::File)]
    backend: BackendKind,
    /// Seconds between indexing passes
    #[arg(long, default_value_t = 60)]
    interval_secs: u64,
    /// Extraction worker threads
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
    /// Run a single pass and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::new(&self.index).with_documents_dir(&self.documents);
        config.backend = self.backend;
        config.interval = Duration::from_secs(self.interval_secs);
        config.builder = BuilderConfig {
            workers: self.workers,
            extract_timeout: self.extract_timeout_secs.map(Duration::from_secs),
            ..BuilderConfig::default()
        };
        config
    }

    fn extractor(&self) -> OcrExtractor {
        OcrExtractor { language: self.ocr_lang.clone(), dpi: self.ocr_dpi, ..OcrExtractor::default() }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();
    let args = Cli::parse();
    let config = args.config();
    config.validate()?;

    let store = Arc::new(
        IndexStore::open(config.backend, &config.index_path)
            .with_context(|| format!("opening index at {}", config.index_path.display()))?,
    );
    let builder = IndexBuilder::new(Arc::new(args.extractor()), config.builder.clone());
    let mut daemon = CrawlerDaemon::new(config.documents_dir()?, builder, store, IndexHandle::default());

    if args.once {
        let report = tokio::task::spawn_blocking(move || daemon.tick()).await??;
        if let Some(err) = report.scan_error {
            anyhow::bail!("could not scan documents folder: {err}");
        }
        tracing::info!(
            indexed = report.build.indexed.len(),
            failed = report.build.failed.len() + report.build.timed_out.len(),
            persisted = report.persisted,
            "single pass complete"
        );
        return Ok(());
    }

    let mut service = IndexingService::new(daemon, config.interval);
    service.start()?;

    let mut poll = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            _ = poll.tick() => {
                if !service.is_running() {
                    tracing::error!(state = %service.state(), "indexing loop exited");
                    break;
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || service.stop()).await??;
    Ok(())
}
