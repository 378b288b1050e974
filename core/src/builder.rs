use crate::error::{Error, Result};
use crate::extract::TextExtractor;
use crate::index::{DocumentId, DocumentTerms, InvertedIndex};
use crate::tokenizer::tokenize;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Extraction threads per pass.
    pub workers: usize,
    /// Per-file deadline; a file that runs over is killed and retried next pass.
    pub extract_timeout: Option<Duration>,
    /// Only files with this extension (case-insensitive) are indexed.
    pub extension: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self { workers: 4, extract_timeout: None, extension: "pdf".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub doc_id: DocumentId,
    pub path: PathBuf,
}

/// What one indexing pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub indexed: Vec<DocumentId>,
    /// Extracted fine but produced no tokens. These stay unindexed and are
    /// picked up again on every pass.
    pub empty: Vec<DocumentId>,
    pub failed: Vec<(DocumentId, String)>,
    pub timed_out: Vec<DocumentId>,
}

impl BuildReport {
    pub fn attempted(&self) -> usize {
        self.indexed.len() + self.empty.len() + self.failed.len() + self.timed_out.len()
    }

    /// True when merging this pass changed the index.
    pub fn changed(&self) -> bool { !self.indexed.is_empty() }
}

/// Extraction results waiting to be merged.
#[derive(Debug, Default)]
pub struct Batch {
    documents: Vec<(DocumentId, DocumentTerms)>,
    report: BuildReport,
}

impl Batch {
    pub fn report(&self) -> &BuildReport { &self.report }

    pub fn into_report(self) -> BuildReport { self.report }

    pub fn merge_into(self, index: &mut InvertedIndex) -> BuildReport {
        for (doc_id, terms) in self.documents {
            index.merge_document(&doc_id, terms);
        }
        self.report
    }
}

/// Walks the documents folder and indexes files the index has not seen yet.
pub struct IndexBuilder {
    extractor: Arc<dyn TextExtractor>,
    config: BuilderConfig,
}

impl IndexBuilder {
    pub fn new(extractor: Arc<dyn TextExtractor>, config: BuilderConfig) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &BuilderConfig { &self.config }

    /// Extract, tokenize and merge every new file under `folder`.
    pub fn build_delta(&self, folder: &Path, index: &mut InvertedIndex) -> Result<BuildReport> {
        let pending = self.scan(folder, index)?;
        Ok(self.extract(pending)?.merge_into(index))
    }

    /// Files on disk whose id is not listed under any token yet.
    pub fn scan(&self, folder: &Path, index: &InvertedIndex) -> Result<Vec<PendingFile>> {
        let indexed = index.indexed_documents();
        let mut seen: BTreeSet<DocumentId> = BTreeSet::new();
        let mut pending = Vec::new();

        for entry in WalkDir::new(folder).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            let path = entry.path();
            if !entry.file_type().is_file() || !self.is_supported(path) {
                continue;
            }
            let Some(doc_id) = DocumentId::from_path(path) else { continue };
            if indexed.contains(&doc_id) {
                continue;
            }
            if !seen.insert(doc_id.clone()) {
                warn!(path = %path.display(), doc_id = %doc_id, "another file already maps to this document id, skipping");
                continue;
            }
            pending.push(PendingFile { doc_id, path: path.to_path_buf() });
        }

        debug!(folder = %folder.display(), indexed = indexed.len(), pending = pending.len(), "scanned documents folder");
        Ok(pending)
    }

    /// Run extraction on a pool of exactly `workers` threads.
    ///
    /// Failures and timeouts are recorded per file and never abort the batch.
    /// Extraction runs on the pool thread itself, so at most `workers`
    /// extractions are in flight at any time.
    pub fn extract(&self, pending: Vec<PendingFile>) -> Result<Batch> {
        let total = pending.len();
        if total == 0 {
            return Ok(Batch::default());
        }
        let start = Instant::now();
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.workers.clamp(1, total))
            .thread_name(|i| format!("ocr-worker-{i}"))
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        let mut outcomes: Vec<(PendingFile, Result<DocumentTerms>)> = pool.install(|| {
            pending
                .into_par_iter()
                .map(|file| {
                    let outcome = self.process(&file);
                    (file, outcome)
                })
                .collect()
        });
        outcomes.sort_by(|a, b| a.0.doc_id.cmp(&b.0.doc_id));

        let mut batch = Batch::default();
        for (file, outcome) in outcomes {
            match outcome {
                Ok(terms) if terms.is_empty() => {
                    warn!(path = %file.path.display(), "no tokens extracted; document stays unindexed");
                    batch.report.empty.push(file.doc_id);
                }
                Ok(terms) => {
                    debug!(doc_id = %file.doc_id, tokens = terms.total, distinct = terms.counts.len(), "extracted");
                    batch.report.indexed.push(file.doc_id.clone());
                    batch.documents.push((file.doc_id, terms));
                }
                Err(err @ Error::ExtractionTimeout { .. }) => {
                    warn!(error = %err, "extraction killed at deadline; will retry next pass");
                    batch.report.timed_out.push(file.doc_id);
                }
                Err(err) => {
                    warn!(path = %file.path.display(), error = %err, "extraction failed; will retry next pass");
                    batch.report.failed.push((file.doc_id, err.to_string()));
                }
            }
        }

        info!(
            total,
            indexed = batch.report.indexed.len(),
            empty = batch.report.empty.len(),
            failed = batch.report.failed.len(),
            timed_out = batch.report.timed_out.len(),
            took_s = start.elapsed().as_secs_f64(),
            "extraction batch finished"
        );
        Ok(batch)
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.config.extension))
    }

    fn process(&self, file: &PendingFile) -> Result<DocumentTerms> {
        let deadline = self.config.extract_timeout.map(|timeout| Instant::now() + timeout);
        let text = self.extractor.extract(&file.path, deadline)?;
        Ok(DocumentTerms::from_tokens(tokenize(&text)))
    }
}
