use ocrsearch_core::tokenizer::tokenize;
use ocrsearch_core::{
    CandidateMode, DocumentId, DocumentTerms, Embedder, EmbeddingStore, Error, IndexHandle, InvertedIndex,
    MissingEmbeddingPolicy, RankingConfig, SearchService,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Points every query at a fixed vector, or fails like a crashed model process.
struct FixedEmbedder(Option<Vec<f32>>);

impl Embedder for FixedEmbedder {
    fn embed(&self, _text: &str) -> ocrsearch_core::Result<Vec<f32>> {
        self.0.clone().ok_or_else(|| Error::UpstreamProcess {
            program: "fake-model".to_string(),
            diagnostic: "model crashed".to_string(),
        })
    }
}

fn index_of(docs: &[(&str, &str)]) -> InvertedIndex {
    let mut index = InvertedIndex::new();
    for (id, text) in docs {
        index.merge_document(&DocumentId::new(*id), DocumentTerms::from_tokens(tokenize(text)));
    }
    index
}

fn corpus() -> InvertedIndex {
    index_of(&[
        ("d1", "Decreto alcaldicio: el decreto fija el plazo y el decreto firma del pago comunal junio"),
        ("d2", "Ordenanza municipal sobre permisos de firma"),
        ("d3", "Resolución exenta de la comuna con firma"),
    ])
}

fn store(vectors: &[(&str, [f32; 2])]) -> EmbeddingStore {
    let map: HashMap<DocumentId, Vec<f32>> = vectors.iter().map(|(id, v)| (DocumentId::new(*id), v.to_vec())).collect();
    EmbeddingStore::from_vectors(map).unwrap()
}

fn ids(results: &[ocrsearch_core::ScoredResult]) -> Vec<&str> {
    results.iter().map(|r| r.doc_id.as_str()).collect()
}

#[test]
fn only_matching_document_is_returned() {
    let service = SearchService::new(IndexHandle::new(corpus()), EmbeddingStore::default(), None, RankingConfig::default());
    let results = service.search("decreto").unwrap();
    assert_eq!(ids(&results), vec!["d1"]);
    assert!(results[0].lexical > 0.0);
    assert_eq!(results[0].semantic, None);
}

#[test]
fn stopword_only_query_is_empty_not_an_error() {
    let service = SearchService::new(IndexHandle::new(corpus()), EmbeddingStore::default(), None, RankingConfig::default());
    assert!(service.search("de la y los").unwrap().is_empty());
    assert!(service.search("   ").unwrap().is_empty());
}

#[test]
fn unknown_terms_give_no_results_in_lexical_mode() {
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder(Some(vec![1.0, 0.0])));
    let service = SearchService::new(
        IndexHandle::new(corpus()),
        store(&[("d1", [1.0, 0.0]), ("d2", [0.0, 1.0]), ("d3", [0.0, 1.0])]),
        Some(embedder),
        RankingConfig::default(),
    );
    assert!(service.search("licitación").unwrap().is_empty());
}

#[test]
fn full_corpus_mode_ranks_by_meaning_when_no_term_matches() {
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder(Some(vec![0.0, 1.0])));
    let config = RankingConfig { candidates: CandidateMode::FullCorpus, ..RankingConfig::default() };
    let service = SearchService::new(
        IndexHandle::new(corpus()),
        store(&[("d1", [1.0, 0.0]), ("d2", [0.0, 1.0]), ("d3", [0.6, 0.8])]),
        Some(embedder),
        config,
    );
    let results = service.search("licitación").unwrap();
    assert_eq!(ids(&results), vec!["d2", "d3", "d1"]);
    assert!(results.iter().all(|r| r.lexical == 0.0));
}

#[test]
fn shared_term_is_broken_by_semantic_score() {
    // "firma" is in every document, so its idf is zero.
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder(Some(vec![0.0, 1.0])));
    let service = SearchService::new(
        IndexHandle::new(corpus()),
        store(&[("d1", [1.0, 0.0]), ("d2", [0.0, 1.0]), ("d3", [0.6, 0.8])]),
        Some(embedder),
        RankingConfig::default(),
    );
    let first = service.search("firma").unwrap();
    assert_eq!(ids(&first), vec!["d2", "d3", "d1"]);
    assert!(first.iter().all(|r| r.lexical == 0.0));
    assert_eq!(service.search("firma").unwrap(), first);
}

#[test]
fn missing_embedding_follows_policy() {
    let embeddings = || store(&[("d2", [0.0, 1.0]), ("d3", [0.0, 1.0])]);
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder(Some(vec![0.0, 1.0])));

    let lexical_only =
        SearchService::new(IndexHandle::new(corpus()), embeddings(), Some(Arc::clone(&embedder)), RankingConfig::default());
    let ranking = lexical_only.rank("decreto").unwrap();
    assert_eq!(ids(&ranking.results), vec!["d1"]);
    assert_eq!(ranking.results[0].semantic, None);
    assert_eq!(ranking.misses, vec![DocumentId::new("d1")]);

    let config = RankingConfig { missing_embedding: MissingEmbeddingPolicy::Skip, ..RankingConfig::default() };
    let skip = SearchService::new(IndexHandle::new(corpus()), embeddings(), Some(embedder), config);
    let ranking = skip.rank("decreto").unwrap();
    assert!(ranking.results.is_empty());
    assert_eq!(ranking.misses, vec![DocumentId::new("d1")]);
}

#[test]
fn embedder_failure_is_an_upstream_error() {
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder(None));
    let service = SearchService::new(IndexHandle::new(corpus()), store(&[("d1", [1.0, 0.0])]), Some(embedder), RankingConfig::default());
    assert!(matches!(service.search("decreto"), Err(Error::UpstreamProcess { .. })));
}

#[test]
fn query_embedding_with_wrong_dimensions_is_rejected() {
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder(Some(vec![1.0, 0.0, 0.0])));
    let service = SearchService::new(IndexHandle::new(corpus()), store(&[("d1", [1.0, 0.0])]), Some(embedder), RankingConfig::default());
    assert!(matches!(service.search("decreto"), Err(Error::UpstreamProcess { .. })));
}

#[test]
fn queries_see_newly_published_index() {
    let handle = IndexHandle::new(corpus());
    let service = SearchService::new(handle.clone(), EmbeddingStore::default(), None, RankingConfig::default());
    assert!(service.search("licitación").unwrap().is_empty());

    let mut next = (*handle.snapshot().index).clone();
    next.merge_document(&DocumentId::new("d4"), DocumentTerms::from_tokens(tokenize("Bases de licitación pública")));
    handle.publish(next);
    assert_eq!(ids(&service.search("licitación").unwrap()), vec!["d4"]);
}
