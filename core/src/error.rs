use crate::index::DocumentId;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("text extraction failed for {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    #[error("text extraction for {path} exceeded {after:?}")]
    ExtractionTimeout { path: PathBuf, after: Duration },

    #[error("corrupt index at {path}: {message}")]
    CorruptIndex { path: PathBuf, message: String },

    #[error("corrupt embeddings file at {path}: {message}")]
    CorruptEmbeddings { path: PathBuf, message: String },

    #[error("inconsistent embeddings: {0}")]
    InvalidEmbeddings(String),

    #[error("no embedding stored for document {0}")]
    EmbeddingLookupMiss(DocumentId),

    #[error("query has no searchable terms")]
    EmptyQuery,

    #[error("{program} failed: {diagnostic}")]
    UpstreamProcess { program: String, diagnostic: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}
