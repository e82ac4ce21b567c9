//! Vector store: the owned handle over one vault's persisted index.
//!
//! Readers search the last committed snapshot and never wait on a writer.
//! Mutations are serialized by a writer mutex; each one builds the next
//! index off to the side and publishes it with a single pointer swap, so a
//! call's records become visible all at once or not at all.
//!
//! Changes live in memory until `persist()` (or `close()`).

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::errors::{OragError, Result};
use crate::semantic::chunker::Chunker;
use crate::semantic::index::{EmbeddingRecord, QueryResult, SimilarityMetric, VectorIndex};
use crate::semantic::storage::{VectorStorage, VectorStorageError, VECTORS_FILE};

/// Record and document counts of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub record_count: usize,
    pub document_count: usize,
    pub dimension: usize,
}

pub struct VectorStore {
    storage: VectorStorage,
    model_id: [u8; 32],
    committed: RwLock<Arc<VectorIndex>>,
    writer: Mutex<()>,
    dirty: AtomicBool,
}

impl VectorStore {
    /// Open the store kept in `dir`, creating the directory if needed.
    ///
    /// A missing `vectors.bin` yields an empty store. A file written for a
    /// different dimension or model fails with `DimensionMismatch` or
    /// `ModelMismatch`; any other unreadable file is `StoreUnavailable`.
    pub fn open(
        dir: &Path,
        dimensions: usize,
        model_id: [u8; 32],
        metric: SimilarityMetric,
    ) -> Result<Self> {
        if dimensions == 0 {
            return Err(OragError::config("embedding dimension must be greater than 0"));
        }

        std::fs::create_dir_all(dir)
            .map_err(|e| OragError::StoreUnavailable(VectorStorageError::Io(e)))?;

        let storage = VectorStorage::new(dir.join(VECTORS_FILE));

        let index = if storage.exists() {
            match storage.load(&model_id, dimensions, metric) {
                Ok(index) => {
                    log::info!(
                        "Loaded {} vectors for {} documents from {}",
                        index.len(),
                        index.document_count(),
                        storage.path().display()
                    );
                    index
                }
                Err(e) => {
                    log::error!("Failed to load {}: {e}", storage.path().display());
                    return Err(e.into());
                }
            }
        } else {
            log::info!("No existing index at {}, starting fresh", dir.display());
            VectorIndex::new(dimensions, metric)
        };

        Ok(Self {
            storage,
            model_id,
            committed: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    pub fn model_id(&self) -> &[u8; 32] {
        &self.model_id
    }

    pub fn storage(&self) -> &VectorStorage {
        &self.storage
    }

    /// Whether there are committed changes not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// The last committed state of the index.
    pub fn snapshot(&self) -> Result<Arc<VectorIndex>> {
        let guard = self.committed.read().map_err(|e| poisoned(&e))?;
        Ok(Arc::clone(&guard))
    }

    pub fn dimension(&self) -> Result<usize> {
        Ok(self.snapshot()?.dimensions())
    }

    pub fn metric(&self) -> Result<SimilarityMetric> {
        Ok(self.snapshot()?.metric())
    }

    /// Insert or replace records by chunk id.
    ///
    /// All-or-nothing: if any record is rejected, nothing from this call is
    /// committed.
    pub fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.commit(|index| {
            for record in records {
                index.insert(record)?;
            }
            Ok(())
        })
    }

    /// Remove every record of a document. Returns the number removed.
    pub fn delete_by_document(&self, document_key: &str) -> Result<usize> {
        if self.snapshot()?.document(document_key).is_none() {
            return Ok(0);
        }
        self.commit(|index| Ok(index.remove_document(document_key)))
    }

    /// Delete a document's records and insert `records` in one commit.
    ///
    /// Returns the number of records removed.
    pub fn replace_document(
        &self,
        document_key: &str,
        records: Vec<EmbeddingRecord>,
    ) -> Result<usize> {
        if let Some(stray) = records.iter().find(|r| r.document_key() != document_key) {
            return Err(OragError::InvalidVector(format!(
                "record {} does not belong to document {document_key}",
                stray.id
            )));
        }

        self.commit(|index| {
            let removed = index.remove_document(document_key);
            for record in records {
                index.insert(record)?;
            }
            Ok(removed)
        })
    }

    /// Ranked records scoring at least `min_score`, at most `top_k` of them.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<QueryResult>> {
        let index = self.snapshot()?;
        validate_query_params(index.metric(), top_k, min_score)?;

        if index.is_empty() {
            return Ok(vec![]);
        }

        Ok(index.search(query, top_k, min_score)?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let index = self.snapshot()?;
        Ok(StoreStats {
            record_count: index.len(),
            document_count: index.document_count(),
            dimension: index.dimensions(),
        })
    }

    /// Chunk geometry the stored records were cut with, if known.
    pub fn chunking(&self) -> Result<Option<Chunker>> {
        Ok(self.snapshot()?.chunking())
    }

    /// Record the chunk geometry of the stored records.
    pub fn set_chunking(&self, chunking: Option<Chunker>) -> Result<()> {
        if self.chunking()? == chunking {
            return Ok(());
        }
        self.commit(|index| {
            index.set_chunking(chunking);
            Ok(())
        })
    }

    /// Write the committed index to disk.
    pub fn persist(&self) -> Result<()> {
        let _writer = self.writer.lock().map_err(|e| poisoned(&e))?;
        let index = self.snapshot()?;

        self.storage.save(&index, &self.model_id)?;
        self.dirty.store(false, Ordering::Release);

        log::debug!(
            "Persisted {} vectors to {}",
            index.len(),
            self.storage.path().display()
        );
        Ok(())
    }

    /// Discard all records and persist the empty index.
    pub fn reset(&self) -> Result<()> {
        let _writer = self.writer.lock().map_err(|e| poisoned(&e))?;
        let current = self.snapshot()?;
        let empty = VectorIndex::new(current.dimensions(), current.metric());

        self.storage.save(&empty, &self.model_id)?;
        *self.committed.write().map_err(|e| poisoned(&e))? = Arc::new(empty);
        self.dirty.store(false, Ordering::Release);

        log::info!("Reset vector store at {}", self.storage.path().display());
        Ok(())
    }

    /// Replace the in-memory index with what is on disk.
    ///
    /// Picks up writes made by another process since `open`. Unsaved
    /// changes of this handle are discarded.
    pub fn reload(&self) -> Result<()> {
        let _writer = self.writer.lock().map_err(|e| poisoned(&e))?;
        let current = self.snapshot()?;

        let index = if self.storage.exists() {
            self.storage
                .load(&self.model_id, current.dimensions(), current.metric())?
        } else {
            VectorIndex::new(current.dimensions(), current.metric())
        };

        if self.is_dirty() {
            log::warn!(
                "Discarding unsaved changes to {} on reload",
                self.storage.path().display()
            );
        }

        *self.committed.write().map_err(|e| poisoned(&e))? = Arc::new(index);
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Persist pending changes and release the store.
    pub fn close(self) -> Result<()> {
        if self.is_dirty() {
            self.persist()?;
        }
        Ok(())
    }

    /// Apply `change` to a copy of the committed index and publish it.
    ///
    /// The copy is dropped on error, leaving the committed state untouched.
    fn commit<T>(&self, change: impl FnOnce(&mut VectorIndex) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock().map_err(|e| poisoned(&e))?;

        let mut next = VectorIndex::clone(&*self.snapshot()?);
        let out = change(&mut next)?;

        *self.committed.write().map_err(|e| poisoned(&e))? = Arc::new(next);
        self.dirty.store(true, Ordering::Release);

        Ok(out)
    }
}

impl Drop for VectorStore {
    fn drop(&mut self) {
        if self.is_dirty() {
            log::warn!(
                "Vector store at {} dropped with unsaved changes",
                self.storage.path().display()
            );
        }
    }
}

/// Reject `top_k`/`min_score` values a search cannot honor.
pub(crate) fn validate_query_params(
    metric: SimilarityMetric,
    top_k: usize,
    min_score: f32,
) -> Result<()> {
    if top_k == 0 {
        return Err(OragError::config("top_k must be at least 1"));
    }
    if !metric.accepts_min_score(min_score) {
        return Err(OragError::config(format!(
            "min_score {min_score} is out of range for {metric:?} similarity"
        )));
    }
    Ok(())
}

fn poisoned(err: &impl std::fmt::Display) -> OragError {
    OragError::StoreUnavailable(VectorStorageError::Poisoned(err.to_string()))
}
