use crate::embedding::{cosine_similarity, EmbeddingStore};
use crate::index::{DocumentId, DocumentTerms, InvertedIndex, ScoredResult};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// What to do with a candidate that has no stored embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingEmbeddingPolicy {
    /// Keep it, semantic component counts as zero.
    #[default]
    LexicalOnly,
    /// Leave it out of the results.
    Skip,
}

impl FromStr for MissingEmbeddingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "lexical-only" | "lexical" => Ok(Self::LexicalOnly),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown missing-embedding policy `{other}` (expected `lexical-only` or `skip`)")),
        }
    }
}

impl fmt::Display for MissingEmbeddingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LexicalOnly => f.write_str("lexical-only"),
            Self::Skip => f.write_str("skip"),
        }
    }
}

/// Which documents get scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateMode {
    /// Only documents sharing at least one term with the query.
    #[default]
    Lexical,
    /// Every known document when the lexical filter matches nothing.
    FullCorpus,
}

impl FromStr for CandidateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "lexical" => Ok(Self::Lexical),
            "full-corpus" | "full" => Ok(Self::FullCorpus),
            other => Err(format!("unknown candidate mode `{other}` (expected `lexical` or `full-corpus`)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingConfig {
    pub lexical_weight: f64,
    pub semantic_weight: f64,
    pub missing_embedding: MissingEmbeddingPolicy,
    pub candidates: CandidateMode,
    /// Embed the query's distinct normalized terms instead of the raw text.
    pub embed_key_terms: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            lexical_weight: 0.5,
            semantic_weight: 0.5,
            missing_embedding: MissingEmbeddingPolicy::default(),
            candidates: CandidateMode::default(),
            embed_key_terms: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub results: Vec<ScoredResult>,
    /// Candidates that had no stored embedding.
    pub misses: Vec<DocumentId>,
}

/// ln(N / df); zero when the term occurs nowhere.
pub fn idf(corpus_size: usize, document_frequency: usize) -> f64 {
    if document_frequency == 0 || corpus_size == 0 {
        return 0.0;
    }
    (corpus_size as f64 / document_frequency as f64).ln()
}

struct IdfTable<'a> {
    index: &'a InvertedIndex,
    corpus_size: usize,
    cache: HashMap<String, f64>,
}

impl<'a> IdfTable<'a> {
    fn new(index: &'a InvertedIndex) -> Self {
        Self { index, corpus_size: index.corpus_size(), cache: HashMap::new() }
    }

    fn get(&mut self, term: &str) -> f64 {
        if let Some(&cached) = self.cache.get(term) {
            return cached;
        }
        let value = idf(self.corpus_size, self.index.document_frequency(term));
        self.cache.insert(term.to_string(), value);
        value
    }
}

pub struct RankingEngine {
    config: RankingConfig,
}

impl RankingEngine {
    pub fn new(config: RankingConfig) -> Self { Self { config } }

    pub fn config(&self) -> &RankingConfig { &self.config }

    /// Score `candidates` against the query and order them best first.
    ///
    /// Ties on the combined score fall back to document id order. Without a
    /// query embedding the semantic component is left out for every document.
    pub fn rank(
        &self,
        query_terms: &[String],
        query_embedding: Option<&[f32]>,
        candidates: &BTreeSet<DocumentId>,
        index: &InvertedIndex,
        embeddings: &EmbeddingStore,
    ) -> Ranking {
        let query = DocumentTerms::from_tokens(query_terms.iter().cloned());
        let mut idf = IdfTable::new(index);
        let mut ranking = Ranking::default();

        for doc_id in candidates {
            let semantic = match query_embedding {
                None => None,
                Some(q) => match embeddings.get(doc_id) {
                    Ok(doc) => Some(cosine_similarity(q, doc)),
                    Err(err) => {
                        warn!(error = %err, policy = %self.config.missing_embedding, "ranking without semantic score");
                        ranking.misses.push(doc_id.clone());
                        match self.config.missing_embedding {
                            MissingEmbeddingPolicy::Skip => continue,
                            MissingEmbeddingPolicy::LexicalOnly => None,
                        }
                    }
                },
            };
            let lexical = index
                .documents
                .get(doc_id)
                .map_or(0.0, |doc| lexical_similarity(&query, doc, &mut idf));
            let score = self.config.lexical_weight * lexical + self.config.semantic_weight * semantic.unwrap_or(0.0);
            ranking.results.push(ScoredResult { doc_id: doc_id.clone(), score, lexical, semantic });
        }

        ranking
            .results
            .sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));
        ranking
    }
}

/// Cosine between the TF·IDF vectors of the query and the document, with tf
/// taken relative to each side's token count.
fn lexical_similarity(query: &DocumentTerms, doc: &DocumentTerms, idf: &mut IdfTable<'_>) -> f64 {
    if query.is_empty() || doc.is_empty() {
        return 0.0;
    }
    let weight = |count: u32, total: u32, term_idf: f64| (count as f64 / total as f64) * term_idf;

    let mut dot = 0.0;
    let mut query_norm = 0.0;
    for (term, &count) in &query.counts {
        let term_idf = idf.get(term);
        let q = weight(count, query.total, term_idf);
        query_norm += q * q;
        let d_count = doc.count(term);
        if d_count > 0 {
            dot += q * weight(d_count, doc.total, term_idf);
        }
    }
    if dot == 0.0 {
        return 0.0;
    }
    let doc_norm: f64 = doc
        .counts
        .iter()
        .map(|(term, &count)| weight(count, doc.total, idf.get(term)).powi(2))
        .sum();
    dot / (query_norm.sqrt() * doc_norm.sqrt())
}
