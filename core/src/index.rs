use crate::tokenizer::clean_token;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Canonical document identifier: the file stem, e.g. `decreto_0451` for
/// `decretos/decreto_0451.pdf`. Shared by the index, the embeddings file and
/// the ranking output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

    pub fn from_path(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        if stem.is_empty() { None } else { Some(Self(stem.to_string())) }
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Term counts for one document, captured at extraction time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTerms {
    pub total: u32,
    pub counts: BTreeMap<String, u32>,
}

impl DocumentTerms {
    pub fn from_tokens<I: IntoIterator<Item = String>>(tokens: I) -> Self {
        let mut terms = Self::default();
        for token in tokens {
            *terms.counts.entry(token).or_insert(0) += 1;
            terms.total += 1;
        }
        terms
    }

    pub fn is_empty(&self) -> bool { self.total == 0 }

    pub fn count(&self, term: &str) -> u32 { self.counts.get(term).copied().unwrap_or(0) }
}

/// Token -> documents mapping plus per-document term statistics.
///
/// A document is listed under a token iff the token occurs in the document's
/// normalized text. Both maps are ordered so serialized output is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvertedIndex {
    pub postings: BTreeMap<String, BTreeSet<DocumentId>>,
    pub documents: BTreeMap<DocumentId, DocumentTerms>,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    /// Attach `doc_id` to `token`. Returns false when it was already there.
    pub fn merge(&mut self, token: &str, doc_id: &DocumentId) -> bool {
        match self.postings.get_mut(token) {
            Some(docs) => docs.insert(doc_id.clone()),
            None => {
                self.postings.insert(token.to_string(), BTreeSet::from([doc_id.clone()]));
                true
            }
        }
    }

    /// Merge every distinct term of a freshly extracted document.
    pub fn merge_document(&mut self, doc_id: &DocumentId, terms: DocumentTerms) {
        for token in terms.counts.keys() {
            self.merge(token, doc_id);
        }
        self.documents.insert(doc_id.clone(), terms);
    }

    /// Union of all posting lists: the documents considered already indexed.
    pub fn indexed_documents(&self) -> BTreeSet<DocumentId> {
        self.postings.values().flat_map(|docs| docs.iter().cloned()).collect()
    }

    /// Number of indexed documents, the `N` of idf. Reads the term
    /// statistics when present; an index loaded without them falls back to
    /// the posting-list union.
    pub fn corpus_size(&self) -> usize {
        if self.documents.is_empty() {
            self.indexed_documents().len()
        } else {
            self.documents.len()
        }
    }

    pub fn lookup(&self, token: &str) -> Option<&BTreeSet<DocumentId>> { self.postings.get(token) }

    pub fn document_frequency(&self, token: &str) -> usize {
        self.postings.get(token).map_or(0, BTreeSet::len)
    }

    pub fn num_terms(&self) -> usize { self.postings.len() }

    pub fn is_empty(&self) -> bool { self.postings.is_empty() && self.documents.is_empty() }

    /// Re-run token cleanup over every key.
    ///
    /// Keys are visited in sorted order; the first key to claim a cleaned
    /// form owns it and later keys that clean to the same form union their
    /// document lists into it. Keys that clean to nothing are dropped.
    pub fn renormalize(self) -> Self {
        let mut postings: BTreeMap<String, BTreeSet<DocumentId>> = BTreeMap::new();
        for (key, docs) in self.postings {
            let Some(cleaned) = clean_token(&key) else { continue };
            postings.entry(cleaned).or_default().extend(docs);
        }
        let documents = self
            .documents
            .into_iter()
            .map(|(doc_id, terms)| {
                let mut counts: BTreeMap<String, u32> = BTreeMap::new();
                let mut total = 0;
                for (key, count) in terms.counts {
                    if let Some(cleaned) = clean_token(&key) {
                        *counts.entry(cleaned).or_insert(0) += count;
                        total += count;
                    }
                }
                (doc_id, DocumentTerms { total, counts })
            })
            .collect();
        Self { postings, documents }
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub doc_id: DocumentId,
    pub score: f64,
    pub lexical: f64,
    /// `None` when the document had no stored embedding.
    pub semantic: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_idempotent() {
        let mut index = InvertedIndex::new();
        let doc = DocumentId::new("d1");
        assert!(index.merge("decreto", &doc));
        assert!(!index.merge("decreto", &doc));
        assert_eq!(index.document_frequency("decreto"), 1);
    }

    #[test]
    fn merge_order_does_not_matter() {
        let a = DocumentId::new("a");
        let b = DocumentId::new("b");
        let terms_a = DocumentTerms::from_tokens(["x".to_string(), "y".to_string()]);
        let terms_b = DocumentTerms::from_tokens(["y".to_string(), "z".to_string()]);

        let mut ab = InvertedIndex::new();
        ab.merge_document(&a, terms_a.clone());
        ab.merge_document(&b, terms_b.clone());
        let mut ba = InvertedIndex::new();
        ba.merge_document(&b, terms_b);
        ba.merge_document(&a, terms_a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn renormalize_keeps_every_document() {
        let mut index = InvertedIndex::new();
        index.merge("0123", &DocumentId::new("a"));
        index.merge("123", &DocumentId::new("b"));
        index.merge("_123_", &DocumentId::new("c"));
        index.merge("000", &DocumentId::new("d"));
        let index = index.renormalize();
        assert_eq!(index.num_terms(), 1);
        let docs: Vec<&str> = index.lookup("123").unwrap().iter().map(DocumentId::as_str).collect();
        assert_eq!(docs, vec!["a", "b", "c"]);
    }

    #[test]
    fn corpus_size_with_and_without_term_statistics() {
        let mut index = InvertedIndex::new();
        index.merge_document(&DocumentId::new("a"), DocumentTerms::from_tokens(["x".to_string()]));
        index.merge_document(&DocumentId::new("b"), DocumentTerms::from_tokens(["x".to_string(), "y".to_string()]));
        assert_eq!(index.corpus_size(), 2);

        let postings_only = InvertedIndex { postings: index.postings.clone(), documents: BTreeMap::new() };
        assert_eq!(postings_only.corpus_size(), 2);
    }

    #[test]
    fn document_id_is_file_stem() {
        let id = DocumentId::from_path(Path::new("/data/decretos/decreto_0451.pdf")).unwrap();
        assert_eq!(id.as_str(), "decreto_0451");
    }
}
