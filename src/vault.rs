//! High-level entry point: one vault, one embedder, one vector store.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{EmbeddingBackend, GlobalConfig, VaultConfig};
use crate::document::Document;
use crate::errors::{OragError, Result};
use crate::lock::StoreLock;
use crate::rag::{self, SourceRef};
use crate::semantic::indexer::{progress_bar, IndexReport, Indexer};
use crate::semantic::{Embedder, QueryResult, RemoteEmbedder, Searcher, VectorStore};

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<QueryResult>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub query: String,
    pub context: String,
    pub sources: Vec<SourceRef>,
    /// Length of `context` in characters
    pub context_length: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultStats {
    pub vault_name: String,
    pub vault_path: PathBuf,
    pub document_count: usize,
    pub chunk_count: usize,
    pub dimension: usize,
    pub store_size_bytes: u64,
    pub embedding_model: String,
    /// When the index file was last written
    pub last_indexed: Option<DateTime<Utc>>,
}

pub struct Vault {
    root: PathBuf,
    name: String,
    store_dir: PathBuf,
    config: GlobalConfig,
    embedder: Box<dyn Embedder>,
    store: VectorStore,
}

impl Vault {
    /// Open the vault at `root` using the user's global config and the
    /// embedding backend it names.
    pub fn open(root: &Path) -> Result<Self> {
        let config = GlobalConfig::load()?;
        let embedder = create_embedder(&config)?;
        Self::with_embedder(root, config, embedder)
    }

    pub fn with_embedder(
        root: &Path,
        config: GlobalConfig,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;
        let vault_config = VaultConfig::load(root)?;

        if let Some(expected) = config.embedding.dimensions {
            if expected != embedder.dimensions() {
                return Err(OragError::config(format!(
                    "embedding.dimensions is {expected} but model '{}' produces {}",
                    embedder.name(),
                    embedder.dimensions()
                )));
            }
        }

        let store_dir = vault_config.store_dir(root);
        let store = VectorStore::open(
            &store_dir,
            embedder.dimensions(),
            embedder.model_id(),
            config.search.metric,
        )?;

        let name = vault_config.name(root);
        log::info!("Opened vault '{name}' at {}", root.display());

        Ok(Self {
            root: root.to_path_buf(),
            name,
            store_dir,
            config,
            embedder,
            store,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Index `documents`, holding the store's writer lock for the duration.
    pub fn sync(&self, documents: &[Document], force: bool) -> Result<IndexReport> {
        let _lock = StoreLock::try_acquire(&self.store_dir)?;
        self.store.reload()?;
        self.indexer()?.sync(documents, force)
    }

    /// Discard the index and rebuild it from `documents`.
    pub fn reindex(&self, documents: &[Document]) -> Result<IndexReport> {
        let _lock = StoreLock::try_acquire(&self.store_dir)?;
        self.store.reset()?;
        self.indexer()?.sync(documents, true)
    }

    pub fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let results = self.searcher().query(query, top_k, min_score)?;

        Ok(SearchResponse {
            query: query.to_string(),
            results,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Retrieve `search.rag_top_k` chunks and assemble them into a context.
    pub fn rag_context(
        &self,
        query: &str,
        max_chars: Option<usize>,
        max_sources: Option<usize>,
    ) -> Result<RagResponse> {
        let started = Instant::now();
        let search = &self.config.search;
        let max_chars = max_chars.unwrap_or(search.default_max_chars);
        let max_sources = max_sources.unwrap_or(search.default_max_sources);

        // fail on bad limits before paying for the query embedding
        if max_chars == 0 || max_sources == 0 {
            return Err(OragError::config(
                "max_chars and max_sources must be greater than 0",
            ));
        }

        let results = self
            .searcher()
            .query(query, Some(search.rag_top_k), None)?;
        let assembled = rag::assemble(&results, max_chars, max_sources)?;

        Ok(RagResponse {
            query: query.to_string(),
            context: assembled.context,
            sources: assembled.sources,
            context_length: assembled.char_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub fn stats(&self) -> Result<VaultStats> {
        let stats = self.store.stats()?;
        let storage = self.store.storage();

        Ok(VaultStats {
            vault_name: self.name.clone(),
            vault_path: self.root.clone(),
            document_count: stats.document_count,
            chunk_count: stats.record_count,
            dimension: stats.dimension,
            store_size_bytes: storage.size_bytes(),
            embedding_model: self.embedder.name().to_string(),
            last_indexed: storage.modified().map(DateTime::<Utc>::from),
        })
    }

    /// Persist pending changes and release the vault.
    pub fn close(self) -> Result<()> {
        self.store.close()
    }

    fn indexer(&self) -> Result<Indexer<'_>> {
        Ok(
            Indexer::new(&self.store, self.embedder.as_ref(), self.config.chunker()?)
                .with_parallelism(self.config.parallelism())
                .with_checkpoint_every(self.config.indexing.checkpoint_every)
                .with_progress(progress_bar(self.config.indexing.show_progress)),
        )
    }

    fn searcher(&self) -> Searcher<'_> {
        Searcher::new(
            &self.store,
            self.embedder.as_ref(),
            self.config.search_defaults(),
        )
    }
}

/// Build the embedder selected by `embedding.backend`.
pub fn create_embedder(config: &GlobalConfig) -> Result<Box<dyn Embedder>> {
    let emb = &config.embedding;

    match emb.backend {
        EmbeddingBackend::Local => create_local_embedder(config),
        EmbeddingBackend::Remote => {
            let endpoint = emb.endpoint.as_deref().ok_or_else(|| {
                OragError::config("embedding.endpoint is required for the remote backend")
            })?;
            let embedder = RemoteEmbedder::new(
                endpoint,
                &emb.model,
                config.api_key(),
                Duration::from_secs(emb.request_timeout_secs),
                emb.dimensions,
            )?;
            Ok(Box::new(embedder))
        }
    }
}

#[cfg(feature = "local-embeddings")]
fn create_local_embedder(config: &GlobalConfig) -> Result<Box<dyn Embedder>> {
    let emb = &config.embedding;
    log::info!("Initializing local embedding model '{}'", emb.model);

    let model = crate::semantic::EmbeddingModel::new(
        &emb.model,
        config.base_path().to_path_buf(),
        Some(Duration::from_secs(emb.download_timeout_secs)),
    )?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "local-embeddings"))]
fn create_local_embedder(_config: &GlobalConfig) -> Result<Box<dyn Embedder>> {
    Err(OragError::config(
        "built without the local-embeddings feature; use the remote backend",
    ))
}
