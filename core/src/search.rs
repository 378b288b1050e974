use crate::daemon::IndexHandle;
use crate::embedding::{Embedder, EmbeddingStore};
use crate::error::{Error, Result};
use crate::index::{DocumentId, InvertedIndex, ScoredResult};
use crate::planner::QueryPlanner;
use crate::ranking::{CandidateMode, Ranking, RankingConfig, RankingEngine};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// In-process query path: plan against the latest committed index, embed
/// the query, rank.
pub struct SearchService {
    index: IndexHandle,
    embeddings: Arc<EmbeddingStore>,
    embedder: Option<Arc<dyn Embedder>>,
    planner: QueryPlanner,
    engine: RankingEngine,
}

impl SearchService {
    pub fn new(
        index: IndexHandle,
        embeddings: EmbeddingStore,
        embedder: Option<Arc<dyn Embedder>>,
        config: RankingConfig,
    ) -> Self {
        Self {
            index,
            embeddings: Arc::new(embeddings),
            embedder,
            planner: QueryPlanner::new(),
            engine: RankingEngine::new(config),
        }
    }

    pub fn index(&self) -> &IndexHandle { &self.index }

    /// Ranked results, best first. No matching documents is an empty list.
    pub fn search(&self, raw_query: &str) -> Result<Vec<ScoredResult>> {
        Ok(self.rank(raw_query)?.results)
    }

    /// Like [`SearchService::search`], also reporting embedding misses.
    pub fn rank(&self, raw_query: &str) -> Result<Ranking> {
        let snapshot = self.index.snapshot();
        let index = snapshot.index.as_ref();

        let plan = match self.planner.plan(raw_query, index) {
            Ok(plan) => plan,
            Err(Error::EmptyQuery) => {
                debug!(query = raw_query, "query has no searchable terms");
                return Ok(Ranking::default());
            }
            Err(err) => return Err(err),
        };

        let candidates = if plan.has_candidates() {
            plan.candidate_document_ids.clone()
        } else {
            match self.engine.config().candidates {
                CandidateMode::Lexical => return Ok(Ranking::default()),
                CandidateMode::FullCorpus => self.full_corpus(index),
            }
        };
        if candidates.is_empty() {
            return Ok(Ranking::default());
        }

        let query_embedding = match &self.embedder {
            Some(embedder) => {
                let text = if self.engine.config().embed_key_terms { plan.key_terms() } else { raw_query.to_string() };
                let vector = embedder.embed(&text)?;
                if !self.embeddings.is_empty() && vector.len() != self.embeddings.dims() {
                    return Err(Error::UpstreamProcess {
                        program: "embedder".to_string(),
                        diagnostic: format!(
                            "query embedding has {} dimensions, stored embeddings have {}",
                            vector.len(),
                            self.embeddings.dims()
                        ),
                    });
                }
                Some(vector)
            }
            None => None,
        };

        debug!(
            query = raw_query,
            generation = snapshot.generation,
            terms = plan.normalized_terms.len(),
            candidates = candidates.len(),
            "ranking"
        );
        Ok(self.engine.rank(
            &plan.normalized_terms,
            query_embedding.as_deref(),
            &candidates,
            index,
            &self.embeddings,
        ))
    }

    fn full_corpus(&self, index: &InvertedIndex) -> BTreeSet<DocumentId> {
        let mut all = index.indexed_documents();
        all.extend(self.embeddings.document_ids().cloned());
        all
    }
}
