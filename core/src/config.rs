use crate::builder::BuilderConfig;
use crate::daemon::DEFAULT_INTERVAL;
use crate::error::{Error, Result};
use crate::persist::BackendKind;
use crate::ranking::RankingConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Paths and tuning shared by the binaries. Everything comes from flags or
/// environment variables; [`Config::validate`] runs before any work starts.
#[derive(Debug, Clone)]
pub struct Config {
    pub documents_dir: Option<PathBuf>,
    pub index_path: PathBuf,
    pub backend: BackendKind,
    pub embeddings_path: Option<PathBuf>,
    pub interval: Duration,
    pub builder: BuilderConfig,
    pub ranking: RankingConfig,
}

impl Config {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            documents_dir: None,
            index_path: index_path.into(),
            backend: BackendKind::default(),
            embeddings_path: None,
            interval: DEFAULT_INTERVAL,
            builder: BuilderConfig::default(),
            ranking: RankingConfig::default(),
        }
    }

    pub fn with_documents_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.documents_dir = Some(dir.into());
        self
    }

    pub fn with_embeddings(mut self, path: Option<PathBuf>) -> Self {
        self.embeddings_path = path;
        self
    }

    /// The documents folder, for commands that cannot run without one.
    pub fn documents_dir(&self) -> Result<&Path> {
        self.documents_dir
            .as_deref()
            .ok_or_else(|| Error::Config("a documents folder is required (--documents)".to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.documents_dir {
            if !dir.is_dir() {
                return Err(Error::Config(format!("documents folder {} does not exist", dir.display())));
            }
            fs::read_dir(dir)
                .map_err(|e| Error::Config(format!("documents folder {} is not readable: {e}", dir.display())))?;
        }

        let parent = match self.index_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.is_dir() {
            return Err(Error::Config(format!("index directory {} does not exist", parent.display())));
        }
        if self.backend == BackendKind::File && self.index_path.is_dir() {
            return Err(Error::Config(format!(
                "index path {} is a directory; the file backend needs a file path",
                self.index_path.display()
            )));
        }

        if let Some(path) = &self.embeddings_path {
            if !path.is_file() {
                return Err(Error::Config(format!("embeddings file {} does not exist", path.display())));
            }
        }

        if self.builder.workers == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }
        if self.interval.is_zero() {
            return Err(Error::Config("crawl interval must be greater than zero".to_string()));
        }

        let ranking = &self.ranking;
        let weights = [ranking.lexical_weight, ranking.semantic_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Config("ranking weights must be finite and non-negative".to_string()));
        }
        if weights.iter().all(|w| *w == 0.0) {
            return Err(Error::Config("at least one ranking weight must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_documents_folder_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("index.json")).with_documents_dir(dir.path().join("nope"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn missing_index_directory_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("missing").join("index.json"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn missing_embeddings_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("index.json")).with_embeddings(Some(dir.path().join("e.json")));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_weights_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path().join("index.json"));
        config.ranking.lexical_weight = 0.0;
        config.ranking.semantic_weight = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn defaults_validate() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("index.json")).with_documents_dir(dir.path());
        config.validate().unwrap();
        assert_eq!(config.builder.workers, 4);
        assert_eq!(config.interval, Duration::from_secs(60));
    }
}
