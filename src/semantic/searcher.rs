//! Query text to ranked chunks.

use crate::errors::{OragError, Result};
use crate::semantic::embeddings::Embedder;
use crate::semantic::index::QueryResult;
use crate::semantic::store::{validate_query_params, VectorStore};

/// Per-call fallbacks for `top_k` and `min_score`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchDefaults {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.3,
        }
    }
}

pub struct Searcher<'a> {
    store: &'a VectorStore,
    embedder: &'a dyn Embedder,
    defaults: SearchDefaults,
}

impl<'a> Searcher<'a> {
    pub fn new(
        store: &'a VectorStore,
        embedder: &'a dyn Embedder,
        defaults: SearchDefaults,
    ) -> Self {
        Self {
            store,
            embedder,
            defaults,
        }
    }

    pub fn defaults(&self) -> SearchDefaults {
        self.defaults
    }

    /// Embed `text` and return the best matching chunks.
    ///
    /// Parameters are checked before the embedder is called. An empty store
    /// yields an empty result without embedding the query.
    pub fn query(
        &self,
        text: &str,
        top_k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<QueryResult>> {
        let top_k = top_k.unwrap_or(self.defaults.top_k);
        let min_score = min_score.unwrap_or(self.defaults.min_score);

        let index = self.store.snapshot()?;
        validate_query_params(index.metric(), top_k, min_score)?;

        if index.dimensions() != self.embedder.dimensions() {
            return Err(OragError::DimensionMismatch {
                stored: index.dimensions(),
                configured: self.embedder.dimensions(),
            });
        }

        if index.is_empty() {
            log::debug!("Search on empty index, skipping query embedding");
            return Ok(vec![]);
        }

        let query_vector = self.embedder.embed(text)?;
        let results = index.search(&query_vector, top_k, min_score)?;

        log::debug!(
            "Query matched {} chunks (top_k={top_k}, min_score={min_score})",
            results.len()
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::semantic::chunker::Chunker;
    use crate::semantic::index::SimilarityMetric;
    use crate::semantic::indexer::Indexer;
    use crate::tests::HashingEmbedder;

    fn indexed_store(dir: &std::path::Path, embedder: &HashingEmbedder) -> VectorStore {
        let store = VectorStore::open(
            dir,
            embedder.dimensions(),
            embedder.model_id(),
            SimilarityMetric::Cosine,
        )
        .unwrap();

        let docs = vec![
            Document::new("rust.md", "rust.md", "rust borrow checker lifetimes", 1),
            Document::new("bread.md", "bread.md", "sourdough starter flour water", 1),
            Document::new("mixed.md", "mixed.md", "rust and sourdough bread loaves", 1),
        ];
        Indexer::new(&store, embedder, Chunker::new(256, 16).unwrap())
            .sync(&docs, false)
            .unwrap();
        store
    }

    #[test]
    fn test_query_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(512);
        let store = indexed_store(dir.path(), &embedder);
        let searcher = Searcher::new(&store, &embedder, SearchDefaults::default());

        let results = searcher.query("rust lifetimes", None, Some(0.0)).unwrap();

        assert_eq!(results[0].document_key(), "rust.md");
        assert_eq!(results[1].document_key(), "mixed.md");
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_overrides_beat_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(512);
        let store = indexed_store(dir.path(), &embedder);
        let searcher = Searcher::new(
            &store,
            &embedder,
            SearchDefaults {
                top_k: 1,
                min_score: 0.0,
            },
        );

        assert_eq!(searcher.query("rust", None, None).unwrap().len(), 1);
        assert!(searcher.query("rust", Some(3), None).unwrap().len() > 1);
        assert!(searcher.query("rust", Some(3), Some(0.99)).unwrap().is_empty());
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(512);
        let store = VectorStore::open(
            dir.path(),
            512,
            embedder.model_id(),
            SimilarityMetric::Cosine,
        )
        .unwrap();
        let searcher = Searcher::new(&store, &embedder, SearchDefaults::default());

        assert!(searcher.query("anything", None, None).unwrap().is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[test]
    fn test_invalid_parameters_fail_before_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(512);
        let store = indexed_store(dir.path(), &embedder);
        let searcher = Searcher::new(&store, &embedder, SearchDefaults::default());
        let calls = embedder.calls();

        assert!(matches!(
            searcher.query("rust", Some(0), None),
            Err(OragError::Config(_))
        ));
        assert!(matches!(
            searcher.query("rust", None, Some(-3.0)),
            Err(OragError::Config(_))
        ));
        assert_eq!(embedder.calls(), calls);
    }

    #[test]
    fn test_embedding_failure_is_fatal_for_query() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = HashingEmbedder::new(512);
        let store = indexed_store(dir.path(), &healthy);
        let broken = HashingEmbedder::new(512).failing_on("rust");
        let searcher = Searcher::new(&store, &broken, SearchDefaults::default());

        assert!(matches!(
            searcher.query("rust", None, None),
            Err(OragError::EmbeddingUnavailable(_))
        ));
    }
}
