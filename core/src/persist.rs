use crate::error::{Error, Result};
use crate::index::{DocumentId, DocumentTerms, InvertedIndex};
use parking_lot::Mutex;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, create_dir_all};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Where a persisted index lives.
pub trait StorageBackend: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<InvertedIndex>>;
    fn save(&self, index: &InvertedIndex) -> Result<()>;
    fn location(&self) -> &Path;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    File,
    Sled,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(Self::File),
            "sled" | "db" => Ok(Self::Sled),
            other => Err(format!("unknown storage backend `{other}` (expected `file` or `sled`)")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Sled => f.write_str("sled"),
        }
    }
}

/// The one place the index is loaded from and saved to.
pub struct IndexStore {
    backend: Box<dyn StorageBackend>,
    write_lock: Mutex<()>,
}

impl IndexStore {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend, write_lock: Mutex::new(()) }
    }

    pub fn open(kind: BackendKind, path: impl AsRef<Path>) -> Result<Self> {
        let backend: Box<dyn StorageBackend> = match kind {
            BackendKind::File => Box::new(FileBackend::new(path)),
            BackendKind::Sled => Box::new(SledBackend::open(path)?),
        };
        Ok(Self::new(backend))
    }

    pub fn location(&self) -> &Path { self.backend.location() }

    /// Load the persisted index, or an empty one if nothing was saved yet.
    pub fn load(&self) -> Result<InvertedIndex> {
        match self.backend.load()? {
            Some(index) => {
                info!(
                    location = %self.location().display(),
                    terms = index.num_terms(),
                    documents = index.documents.len(),
                    "loaded index"
                );
                Ok(index)
            }
            None => {
                info!(location = %self.location().display(), "no persisted index, starting empty");
                Ok(InvertedIndex::new())
            }
        }
    }

    pub fn save(&self, index: &InvertedIndex) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.backend.save(index)?;
        info!(location = %self.location().display(), terms = index.num_terms(), "saved index");
        Ok(())
    }
}

/// Write `bytes` to a temp file next to `path`, fsync, then rename over it.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Sorted, pretty-printed JSON on disk.
///
/// `<name>.json` holds token -> [document ids]; `<name>.terms.json` holds the
/// per-document term counts.
pub struct FileBackend {
    postings: PathBuf,
    terms: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let postings = path.as_ref().to_path_buf();
        let terms = postings.with_extension("terms.json");
        Self { postings, terms }
    }

    pub fn terms_path(&self) -> &Path { &self.terms }

    fn corrupt(path: &Path, err: impl fmt::Display) -> Error {
        Error::CorruptIndex { path: path.to_path_buf(), message: err.to_string() }
    }
}

impl StorageBackend for FileBackend {
    fn load(&self) -> Result<Option<InvertedIndex>> {
        let Some(text) = read_optional(&self.postings)? else {
            return Ok(None);
        };
        let postings: BTreeMap<String, BTreeSet<DocumentId>> =
            serde_json::from_str(&text).map_err(|e| Self::corrupt(&self.postings, e))?;
        let documents = match read_optional(&self.terms)? {
            Some(text) => serde_json::from_str(&text).map_err(|e| Self::corrupt(&self.terms, e))?,
            None => {
                warn!(path = %self.terms.display(), "term statistics missing; lexical scores will be zero until documents are re-indexed");
                BTreeMap::new()
            }
        };
        Ok(Some(InvertedIndex { postings, documents }))
    }

    fn save(&self, index: &InvertedIndex) -> Result<()> {
        let mut terms = serde_json::to_vec_pretty(&index.documents)?;
        terms.push(b'\n');
        let mut postings = serde_json::to_vec_pretty(&index.postings)?;
        postings.push(b'\n');
        // Postings last: they decide what counts as indexed.
        write_atomic(&self.terms, &terms)?;
        write_atomic(&self.postings, &postings)
    }

    fn location(&self) -> &Path { &self.postings }
}

/// Embedded key-value store: a `postings` tree and a `documents` tree with
/// bincode values, replaced together in one transaction.
pub struct SledBackend {
    path: PathBuf,
    db: sled::Db,
    postings: sled::Tree,
    documents: sled::Tree,
}

impl SledBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        let postings = db.open_tree("postings")?;
        let documents = db.open_tree("documents")?;
        Ok(Self { path, db, postings, documents })
    }

    fn corrupt(&self, err: impl fmt::Display) -> Error {
        Error::CorruptIndex { path: self.path.clone(), message: err.to_string() }
    }

    fn decode_key(&self, key: &[u8]) -> Result<String> {
        String::from_utf8(key.to_vec()).map_err(|e| self.corrupt(e))
    }

    fn stale_keys(tree: &sled::Tree, keep: impl Fn(&[u8]) -> bool) -> Result<Vec<sled::IVec>> {
        let mut stale = Vec::new();
        for key in tree.iter().keys() {
            let key = key?;
            if !keep(&key) {
                stale.push(key);
            }
        }
        Ok(stale)
    }
}

impl StorageBackend for SledBackend {
    fn load(&self) -> Result<Option<InvertedIndex>> {
        if self.postings.is_empty() && self.documents.is_empty() {
            return Ok(None);
        }
        let mut index = InvertedIndex::new();
        for item in self.postings.iter() {
            let (key, value) = item?;
            let docs: BTreeSet<DocumentId> = bincode::deserialize(&value).map_err(|e| self.corrupt(e))?;
            index.postings.insert(self.decode_key(&key)?, docs);
        }
        for item in self.documents.iter() {
            let (key, value) = item?;
            let terms: DocumentTerms = bincode::deserialize(&value).map_err(|e| self.corrupt(e))?;
            index.documents.insert(DocumentId::new(self.decode_key(&key)?), terms);
        }
        Ok(Some(index))
    }

    fn save(&self, index: &InvertedIndex) -> Result<()> {
        let postings: Vec<(&str, Vec<u8>)> = index
            .postings
            .iter()
            .map(|(token, docs)| Ok((token.as_str(), bincode::serialize(docs)?)))
            .collect::<Result<_>>()?;
        let documents: Vec<(&str, Vec<u8>)> = index
            .documents
            .iter()
            .map(|(doc_id, terms)| Ok((doc_id.as_str(), bincode::serialize(terms)?)))
            .collect::<Result<_>>()?;
        let stale_postings = Self::stale_keys(&self.postings, |k| {
            std::str::from_utf8(k).is_ok_and(|k| index.postings.contains_key(k))
        })?;
        let stale_documents = Self::stale_keys(&self.documents, |k| {
            std::str::from_utf8(k).is_ok_and(|k| index.documents.contains_key(&DocumentId::new(k)))
        })?;

        (&self.postings, &self.documents)
            .transaction(|(tx_postings, tx_documents)| {
                for key in &stale_postings {
                    tx_postings.remove(key.clone())?;
                }
                for (token, value) in &postings {
                    tx_postings.insert(*token, value.as_slice())?;
                }
                for key in &stale_documents {
                    tx_documents.remove(key.clone())?;
                }
                for (doc_id, value) in &documents {
                    tx_documents.insert(*doc_id, value.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(err) => Error::Sled(err),
                TransactionError::Abort(()) => {
                    Error::Sled(sled::Error::Unsupported("index transaction aborted".into()))
                }
            })?;
        self.db.flush()?;
        Ok(())
    }

    fn location(&self) -> &Path { &self.path }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InvertedIndex {
        let mut index = InvertedIndex::new();
        index.merge_document(
            &DocumentId::new("decreto_1"),
            DocumentTerms::from_tokens(["decreto", "municipal", "decreto"].map(String::from)),
        );
        index.merge_document(
            &DocumentId::new("decreto_2"),
            DocumentTerms::from_tokens(["alcaldía", "decreto"].map(String::from)),
        );
        index
    }

    #[test]
    fn file_backend_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(BackendKind::File, dir.path().join("index.json")).unwrap();
        assert!(store.load().unwrap().is_empty());

        let index = sample();
        store.save(&index).unwrap();
        assert_eq!(store.load().unwrap(), index);
    }

    #[test]
    fn repeated_saves_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let store = IndexStore::open(BackendKind::File, &path).unwrap();
        store.save(&sample()).unwrap();
        let first = fs::read(&path).unwrap();
        store.save(&store.load().unwrap()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn malformed_file_is_corrupt_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, "{ \"decreto\": [").unwrap();
        let store = IndexStore::open(BackendKind::File, &path).unwrap();
        assert!(matches!(store.load(), Err(Error::CorruptIndex { .. })));
    }

    #[test]
    fn postings_without_terms_sidecar_still_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, r#"{"decreto": ["a.pdf", "b"]}"#).unwrap();
        let index = IndexStore::open(BackendKind::File, &path).unwrap().load().unwrap();
        assert_eq!(index.document_frequency("decreto"), 2);
        assert!(index.documents.is_empty());
    }

    #[test]
    fn sled_backend_round_trips_and_drops_stale_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(BackendKind::Sled, dir.path().join("index.sled")).unwrap();
        let index = sample();
        store.save(&index).unwrap();
        assert_eq!(store.load().unwrap(), index);

        let mut smaller = InvertedIndex::new();
        smaller.merge("decreto", &DocumentId::new("decreto_3"));
        store.save(&smaller).unwrap();
        assert_eq!(store.load().unwrap(), smaller);
    }
}
