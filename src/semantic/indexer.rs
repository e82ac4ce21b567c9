//! Keeps a vector store consistent with the current document set.
//!
//! Each document is chunked, embedded and committed with a single
//! `replace_document`, and the store is persisted every `checkpoint_every`
//! documents. Because unchanged fingerprints are skipped, re-running an
//! interrupted sync converges to the same end state.

use std::collections::HashSet;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;

use crate::document::Document;
use crate::errors::{OragError, Result};
use crate::semantic::chunker::Chunker;
use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::index::EmbeddingRecord;
use crate::semantic::store::VectorStore;

/// Default number of documents embedded between checkpoints
pub const DEFAULT_CHECKPOINT_EVERY: usize = 32;

/// Outcome of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Keys of documents whose embedding failed; they are retried next run
    pub failed: Vec<String>,
    pub chunks_written: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Added,
    Updated,
}

pub struct Indexer<'a> {
    store: &'a VectorStore,
    embedder: &'a dyn Embedder,
    chunker: Chunker,
    parallelism: Option<usize>,
    checkpoint_every: usize,
    progress: ProgressBar,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a VectorStore, embedder: &'a dyn Embedder, chunker: Chunker) -> Self {
        Self {
            store,
            embedder,
            chunker,
            parallelism: None,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            progress: ProgressBar::hidden(),
        }
    }

    /// Number of embedding worker threads; `None` uses one per core.
    pub fn with_parallelism(mut self, parallelism: Option<usize>) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_checkpoint_every(mut self, checkpoint_every: usize) -> Self {
        self.checkpoint_every = checkpoint_every.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Bring the store in line with `documents`.
    ///
    /// New documents are added, documents with a changed fingerprint (or
    /// every known document when `force` is set or the store was built with
    /// a different chunk size or overlap) are replaced, and indexed
    /// documents missing from `documents` are removed. Embedding failures
    /// are recorded per document in `IndexReport::failed`; store failures
    /// abort the run.
    pub fn sync(&self, documents: &[Document], force: bool) -> Result<IndexReport> {
        let started = Instant::now();
        let _span = tracing::info_span!("sync", documents = documents.len(), force).entered();

        let stored_dimension = self.store.dimension()?;
        if stored_dimension != self.embedder.dimensions() {
            return Err(OragError::DimensionMismatch {
                stored: stored_dimension,
                configured: self.embedder.dimensions(),
            });
        }

        let snapshot = self.store.snapshot()?;
        let mut report = IndexReport::default();

        // records cut with other chunk geometry must all be redone
        let stored_chunking = snapshot.chunking();
        let rechunk = !snapshot.is_empty() && stored_chunking != Some(self.chunker);
        if rechunk {
            log::info!(
                "Chunking changed to size={} overlap={}, re-indexing every document",
                self.chunker.size(),
                self.chunker.overlap()
            );
        }
        let force = force || rechunk;

        let mut seen: HashSet<&str> = HashSet::with_capacity(documents.len());
        let mut pending: Vec<(&Document, Change)> = Vec::new();

        for document in documents {
            if !seen.insert(document.key.as_str()) {
                log::warn!("Duplicate document key '{}', keeping the first", document.key);
                continue;
            }

            match snapshot.document(&document.key) {
                None => pending.push((document, Change::Added)),
                Some(summary) if force || summary.fingerprint != document.fingerprint => {
                    log::debug!(
                        "'{}' changed: {} -> {}",
                        document.key,
                        summary.fingerprint.short_hex(),
                        document.fingerprint.short_hex()
                    );
                    pending.push((document, Change::Updated))
                }
                Some(_) => report.unchanged += 1,
            }
        }

        let stale: Vec<String> = snapshot
            .documents()
            .map(|(key, _)| key)
            .filter(|key| !seen.contains(key))
            .map(str::to_string)
            .collect();
        drop(snapshot);

        for key in &stale {
            let count = self.store.delete_by_document(key)?;
            log::debug!("Removed {count} chunks of deleted document '{key}'");
            report.removed += 1;
        }

        log::info!(
            "Indexing {} documents ({} unchanged, {} removed)",
            pending.len(),
            report.unchanged,
            report.removed
        );

        if !pending.is_empty() {
            self.index_pending(&pending, &mut report)?;
        }

        // failed documents keep their old chunks; record the new geometry
        // only once every document was cut with it
        if report.failed.is_empty() && stored_chunking != Some(self.chunker) {
            self.store.set_chunking(Some(self.chunker))?;
        }

        if self.store.is_dirty() {
            self.store.persist()?;
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "Sync finished in {}ms: {} added, {} updated, {} removed, {} unchanged, {} failed",
            report.elapsed_ms,
            report.added,
            report.updated,
            report.removed,
            report.unchanged,
            report.failed.len()
        );

        Ok(report)
    }

    fn index_pending(
        &self,
        pending: &[(&Document, Change)],
        report: &mut IndexReport,
    ) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism.unwrap_or(0))
            .thread_name(|i| format!("orag-embed-{i}"))
            .build()
            .map_err(|e| OragError::config(format!("failed to start embedding workers: {e}")))?;

        self.progress.set_length(pending.len() as u64);
        self.progress.set_position(0);

        for batch in pending.chunks(self.checkpoint_every) {
            let embedded: Vec<Result<Vec<EmbeddingRecord>>> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|(document, _)| self.embed_document(document))
                    .collect()
            });

            for ((document, change), outcome) in batch.iter().zip(embedded) {
                let committed = outcome.and_then(|records| {
                    let written = records.len();
                    self.store.replace_document(&document.key, records)?;
                    Ok(written)
                });

                match committed {
                    Ok(written) => {
                        report.chunks_written += written;
                        match change {
                            Change::Added => report.added += 1,
                            Change::Updated => report.updated += 1,
                        }
                    }
                    Err(e) if e.is_per_document() => {
                        log::warn!("Failed to index '{}': {e}", document.key);
                        report.failed.push(document.key.clone());
                    }
                    Err(e) => {
                        self.progress.abandon();
                        return Err(e);
                    }
                }
                self.progress.inc(1);
            }

            self.store.persist()?;
        }

        self.progress.finish_and_clear();
        Ok(())
    }

    fn embed_document(&self, document: &Document) -> Result<Vec<EmbeddingRecord>> {
        let chunks = self.chunker.chunk(&document.key, &document.text);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let vectors = self.embedder.embed_batch(&texts)?;
        if vectors.len() != chunks.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: chunks.len(),
                got: vectors.len(),
            }
            .into());
        }

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord::from_chunk(document, chunk, vector))
            .collect())
    }
}

/// Progress bar for indexing runs; hidden unless `show` is set.
pub fn progress_bar(show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} indexing [{bar:40}] {pos}/{len} documents ({eta})")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}
