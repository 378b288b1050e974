use crate::error::{Error, Result};
use crate::index::DocumentId;
use crate::persist::write_atomic;
use crate::process;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::info;

/// Maps text to a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embedding: Vec<f32>,
}

/// Runs an external model process once per call: one JSON [`EmbedRequest`]
/// on stdin, one JSON [`EmbedResponse`] expected on stdout. Stdin is fed
/// while both output pipes are drained, so large documents and noisy
/// models do not deadlock.
#[derive(Debug, Clone)]
pub struct CommandEmbedder {
    program: String,
    args: Vec<String>,
}

impl CommandEmbedder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Parse a whitespace-separated command line such as `python embed.py --model bert`.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("embedding command is empty".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    fn upstream(&self, diagnostic: impl Into<String>) -> Error {
        Error::UpstreamProcess { program: self.program.clone(), diagnostic: diagnostic.into() }
    }
}

impl Embedder for CommandEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = serde_json::to_vec(&EmbedRequest { text })?;
        let output = process::run(Command::new(&self.program).args(&self.args), Some(request), None)
            .map_err(|e| self.upstream(format!("could not run: {e}")))?
            .ok_or_else(|| self.upstream("killed before finishing"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.upstream(format!("exited with {}: {}", output.status, stderr.trim())));
        }
        let response: EmbedResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| self.upstream(format!("malformed response: {e}")))?;
        if response.embedding.is_empty() {
            return Err(self.upstream("empty embedding"));
        }
        Ok(response.embedding)
    }
}

/// Precomputed document embeddings, loaded once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStore {
    dims: usize,
    vectors: HashMap<DocumentId, Vec<f32>>,
}

impl EmbeddingStore {
    /// Build from an in-memory map; every vector must share one non-zero length.
    pub fn from_vectors(vectors: HashMap<DocumentId, Vec<f32>>) -> Result<Self> {
        let mut dims = None;
        for (doc_id, vector) in &vectors {
            match dims {
                _ if vector.is_empty() => {
                    return Err(Error::InvalidEmbeddings(format!("document {doc_id} has an empty vector")))
                }
                None => dims = Some(vector.len()),
                Some(d) if d != vector.len() => {
                    return Err(Error::InvalidEmbeddings(format!(
                        "document {doc_id} has {} dimensions, expected {d}",
                        vector.len()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(Self { dims: dims.unwrap_or(0), vectors })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let corrupt = |message: String| Error::CorruptEmbeddings { path: path.to_path_buf(), message };
        let text = fs::read_to_string(path)?;
        let vectors: HashMap<DocumentId, Vec<f32>> =
            serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
        let store = Self::from_vectors(vectors).map_err(|e| match e {
            Error::InvalidEmbeddings(message) => corrupt(message),
            other => other,
        })?;
        info!(path = %path.display(), documents = store.len(), dims = store.dims, "loaded embeddings");
        Ok(store)
    }

    /// Sorted JSON so rebuilt files diff cleanly.
    pub fn save(&self, path: &Path) -> Result<()> {
        let sorted: BTreeMap<&DocumentId, &Vec<f32>> = self.vectors.iter().collect();
        let bytes = serde_json::to_vec(&sorted)?;
        write_atomic(path, &bytes)
    }

    pub fn dims(&self) -> usize { self.dims }

    pub fn len(&self) -> usize { self.vectors.len() }

    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }

    pub fn contains(&self, doc_id: &DocumentId) -> bool { self.vectors.contains_key(doc_id) }

    pub fn document_ids(&self) -> impl Iterator<Item = &DocumentId> { self.vectors.keys() }

    pub fn into_vectors(self) -> HashMap<DocumentId, Vec<f32>> { self.vectors }

    pub fn get(&self, doc_id: &DocumentId) -> Result<&[f32]> {
        self.vectors
            .get(doc_id)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::EmbeddingLookupMiss(doc_id.clone()))
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let na: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mixed_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.json");
        fs::write(&path, r#"{"a": [1.0, 0.0], "b": [1.0]}"#).unwrap();
        assert!(matches!(EmbeddingStore::load(&path), Err(Error::CorruptEmbeddings { .. })));
    }

    #[test]
    fn missing_document_is_a_lookup_miss() {
        let store = EmbeddingStore::from_vectors(HashMap::from([(DocumentId::new("a"), vec![1.0, 2.0])])).unwrap();
        assert_eq!(store.dims(), 2);
        assert!(matches!(store.get(&DocumentId::new("b")), Err(Error::EmbeddingLookupMiss(_))));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.json");
        let store = EmbeddingStore::from_vectors(HashMap::from([
            (DocumentId::new("b"), vec![0.5, 0.5]),
            (DocumentId::new("a"), vec![1.0, 0.0]),
        ]))
        .unwrap();
        store.save(&path).unwrap();
        let loaded = EmbeddingStore::load(&path).unwrap();
        assert_eq!(loaded.get(&DocumentId::new("b")).unwrap(), [0.5f32, 0.5].as_slice());
    }

    #[test]
    fn inconsistent_vectors_are_rejected() {
        let mixed = HashMap::from([(DocumentId::new("a"), vec![1.0, 0.0]), (DocumentId::new("b"), vec![1.0])]);
        assert!(matches!(EmbeddingStore::from_vectors(mixed), Err(Error::InvalidEmbeddings(_))));
        let empty = HashMap::from([(DocumentId::new("a"), Vec::new())]);
        assert!(matches!(EmbeddingStore::from_vectors(empty), Err(Error::InvalidEmbeddings(_))));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> CommandEmbedder {
        CommandEmbedder::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[cfg(unix)]
    #[test]
    fn command_embedder_reads_typed_response() {
        let model = sh(r#"grep -q '"text":"decreto"' && echo '{"embedding": [0.5, 1.0]}'"#);
        assert_eq!(model.embed("decreto").unwrap(), vec![0.5, 1.0]);
    }

    #[cfg(unix)]
    #[test]
    fn command_embedder_failures_are_upstream_errors() {
        for script in [
            "echo 'model not loaded' >&2; exit 3",
            "cat >/dev/null; echo 'not json'",
            r#"cat >/dev/null; echo '{"embedding": []}'"#,
        ] {
            let err = sh(script).embed("decreto").unwrap_err();
            assert!(matches!(err, Error::UpstreamProcess { .. }), "{script}: {err}");
        }
        let missing = CommandEmbedder::new("/nonexistent/embedder", Vec::new());
        assert!(matches!(missing.embed("decreto"), Err(Error::UpstreamProcess { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn noisy_model_with_large_document_does_not_hang() {
        // Fills stderr past the pipe buffer before reading the request.
        let model = sh(r#"head -c 200000 /dev/zero >&2; cat >/dev/null; echo '{"embedding": [1.0]}'"#);
        let document = "decreto municipal ".repeat(10_000);
        assert_eq!(model.embed(&document).unwrap(), vec![1.0]);
    }

    #[test]
    fn cosine_of_orthogonal_and_parallel() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
