//! Incremental inverted index and hybrid lexical/semantic ranking over a
//! folder of scanned PDFs.

pub mod builder;
pub mod config;
pub mod daemon;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod persist;
pub mod planner;
pub mod process;
pub mod ranking;
pub mod search;
pub mod tokenizer;

pub use builder::{BuildReport, BuilderConfig, IndexBuilder};
pub use config::Config;
pub use daemon::{CrawlerDaemon, DaemonState, IndexHandle, IndexingService, TickReport};
pub use embedding::{CommandEmbedder, Embedder, EmbeddingStore};
pub use error::{Error, Result};
pub use extract::{OcrExtractor, TextExtractor};
pub use index::{DocumentId, DocumentTerms, InvertedIndex, ScoredResult};
pub use persist::{BackendKind, IndexStore};
pub use planner::{QueryPlan, QueryPlanner};
pub use ranking::{CandidateMode, MissingEmbeddingPolicy, Ranking, RankingConfig, RankingEngine};
pub use search::SearchService;
