use crate::error::{Error, Result};
use crate::index::{DocumentId, InvertedIndex};
use crate::tokenizer::tokenize;
use std::collections::BTreeSet;

/// What a raw query turns into before ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Query tokens in query order, repeats kept (they weight the query vector).
    pub normalized_terms: Vec<String>,
    /// Union of the posting lists of every query term.
    pub candidate_document_ids: BTreeSet<DocumentId>,
}

impl QueryPlan {
    /// Distinct terms joined by spaces, fed to the embedder in key-term mode.
    pub fn key_terms(&self) -> String {
        let mut seen = BTreeSet::new();
        self.normalized_terms
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_candidates(&self) -> bool { !self.candidate_document_ids.is_empty() }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryPlanner;

impl QueryPlanner {
    pub fn new() -> Self { Self }

    /// Fails with [`Error::EmptyQuery`] when nothing survives normalization.
    /// A query whose terms match no document is a valid plan with no candidates.
    pub fn plan(&self, raw_query: &str, index: &InvertedIndex) -> Result<QueryPlan> {
        let normalized_terms = tokenize(raw_query);
        if normalized_terms.is_empty() {
            return Err(Error::EmptyQuery);
        }
        let candidate_document_ids = normalized_terms
            .iter()
            .filter_map(|term| index.lookup(term))
            .flat_map(|docs| docs.iter().cloned())
            .collect();
        Ok(QueryPlan { normalized_terms, candidate_document_ids })
    }
}
