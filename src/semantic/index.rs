//! In-memory vector index with exact similarity search.
//!
//! Records are keyed by chunk id. Because chunk ids order by document key
//! first, all chunks of a document form one contiguous key range, which
//! makes per-document deletes a range scan.
//!
//! Search is a full scan that keeps the best `top_k` hits in a bounded
//! min-heap (O(n log k)).

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::{Document, Fingerprint};
use crate::semantic::chunker::{Chunk, ChunkId, Chunker};

/// How query/record similarity is scored. Higher is always better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    /// Cosine similarity, in [-1, 1]
    #[default]
    Cosine,
    /// Raw inner product, unbounded
    Dot,
    /// `1 / (1 + L2 distance)`, in (0, 1]
    Euclidean,
}

impl SimilarityMetric {
    /// Whether `min_score` is meaningful for this metric.
    pub fn accepts_min_score(&self, min_score: f32) -> bool {
        match self {
            SimilarityMetric::Cosine => (-1.0..=1.0).contains(&min_score),
            SimilarityMetric::Dot => min_score.is_finite(),
            SimilarityMetric::Euclidean => (0.0..=1.0).contains(&min_score),
        }
    }

    fn score(&self, query: &[f32], query_norm: f32, target: &[f32], target_norm: f32) -> f32 {
        match self {
            SimilarityMetric::Cosine => {
                if target_norm < f32::EPSILON {
                    return 0.0;
                }
                (dot(query, target) / (query_norm * target_norm)).clamp(-1.0, 1.0)
            }
            SimilarityMetric::Dot => dot(query, target),
            SimilarityMetric::Euclidean => {
                let distance = query
                    .iter()
                    .zip(target)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + distance)
            }
        }
    }
}

/// Fixed metadata stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordMetadata {
    pub source_path: String,
    /// Chunk start character offset
    pub start: usize,
    /// Chunk end character offset (exclusive)
    pub end: usize,
    /// Fingerprint of the document version the chunk came from
    pub fingerprint: Fingerprint,
}

/// One stored chunk embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: ChunkId,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
    /// Chunk text, returned with search hits for context assembly
    pub text: String,
}

impl EmbeddingRecord {
    pub fn from_chunk(document: &Document, chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.id,
            embedding,
            metadata: RecordMetadata {
                source_path: document.source_path.to_string_lossy().into_owned(),
                start: chunk.start,
                end: chunk.end,
                fingerprint: document.fingerprint,
            },
            text: chunk.text,
        }
    }

    pub fn document_key(&self) -> &str {
        &self.id.document_key
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub id: ChunkId,
    pub score: f32,
    pub metadata: RecordMetadata,
    pub text: String,
}

impl QueryResult {
    pub fn document_key(&self) -> &str {
        &self.id.document_key
    }
}

/// Per-document bookkeeping derived from its records.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub fingerprint: Fingerprint,
    pub source_path: String,
    pub chunk_count: usize,
}

#[derive(Debug)]
struct IndexedRecord {
    record: EmbeddingRecord,
    norm: f32,
}

/// In-memory vector index.
///
/// Cloning is cheap: records are shared behind `Arc`, so a clone costs one
/// pointer copy per record, not a copy of the vectors.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    records: BTreeMap<ChunkId, Arc<IndexedRecord>>,
    documents: BTreeMap<String, DocumentSummary>,
    dimensions: usize,
    metric: SimilarityMetric,
    /// Chunk geometry the records were produced with, if known
    chunking: Option<Chunker>,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Vector contains NaN or infinite values")]
    NonFiniteVector,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize, metric: SimilarityMetric) -> Self {
        Self {
            records: BTreeMap::new(),
            documents: BTreeMap::new(),
            dimensions,
            metric,
            chunking: None,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn chunking(&self) -> Option<Chunker> {
        self.chunking
    }

    pub fn set_chunking(&mut self, chunking: Option<Chunker>) {
        self.chunking = chunking;
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn document(&self, key: &str) -> Option<&DocumentSummary> {
        self.documents.get(key)
    }

    /// Indexed documents in key order.
    pub fn documents(&self) -> impl Iterator<Item = (&str, &DocumentSummary)> {
        self.documents.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, id: &ChunkId) -> Option<&EmbeddingRecord> {
        self.records.get(id).map(|r| &r.record)
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.records.contains_key(id)
    }

    /// Iterate over all records in chunk id order.
    pub fn iter(&self) -> impl Iterator<Item = &EmbeddingRecord> {
        self.records.values().map(|r| &r.record)
    }

    /// Check that a record can be inserted without modifying the index.
    pub fn validate(&self, record: &EmbeddingRecord) -> Result<(), IndexError> {
        self.check_vector(&record.embedding).map(|_| ())
    }

    /// Insert or replace a record by chunk id.
    ///
    /// Returns `true` if an existing record was replaced.
    pub fn insert(&mut self, record: EmbeddingRecord) -> Result<bool, IndexError> {
        let norm = self.check_vector(&record.embedding)?;

        let key = record.id.document_key.clone();
        let summary_fingerprint = record.metadata.fingerprint;
        let summary_path = record.metadata.source_path.clone();

        let replaced = self
            .records
            .insert(record.id.clone(), Arc::new(IndexedRecord { record, norm }))
            .is_some();

        let summary = self.documents.entry(key).or_insert(DocumentSummary {
            fingerprint: summary_fingerprint,
            source_path: summary_path.clone(),
            chunk_count: 0,
        });
        summary.fingerprint = summary_fingerprint;
        summary.source_path = summary_path;
        if !replaced {
            summary.chunk_count += 1;
        }

        Ok(replaced)
    }

    /// Remove every record of a document. Returns the number removed.
    pub fn remove_document(&mut self, document_key: &str) -> usize {
        let range = ChunkId::new(document_key, 0)..=ChunkId::new(document_key, u32::MAX);
        let ids: Vec<ChunkId> = self.records.range(range).map(|(id, _)| id.clone()).collect();

        for id in &ids {
            self.records.remove(id);
        }
        self.documents.remove(document_key);

        ids.len()
    }

    /// Clear all entries from the index.
    pub fn clear(&mut self) {
        self.records.clear();
        self.documents.clear();
        self.chunking = None;
    }

    /// Search for the `top_k` records most similar to `query`.
    ///
    /// Only records scoring at least `min_score` are returned. Results are
    /// ordered by score descending, ties broken by chunk id ascending.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<QueryResult>, IndexError> {
        let query_norm = self.check_vector(query)?;

        if top_k == 0 {
            return Ok(vec![]);
        }

        let mut heap: BinaryHeap<Reverse<Ranked<'_>>> =
            BinaryHeap::with_capacity(top_k.min(self.records.len()) + 1);

        for (id, entry) in &self.records {
            let score = self
                .metric
                .score(query, query_norm, &entry.record.embedding, entry.norm);
            if score.is_nan() || score < min_score {
                continue;
            }

            let candidate = Ranked { score, id, entry };
            if heap.len() < top_k {
                heap.push(Reverse(candidate));
            } else if heap.peek().is_some_and(|Reverse(worst)| candidate > *worst) {
                heap.pop();
                heap.push(Reverse(candidate));
            }
        }

        let mut ranked: Vec<Ranked<'_>> = heap.into_iter().map(|Reverse(r)| r).collect();
        ranked.sort_by(|a, b| b.cmp(a));

        Ok(ranked
            .into_iter()
            .map(|r| QueryResult {
                id: r.id.clone(),
                score: r.score,
                metadata: r.entry.record.metadata.clone(),
                text: r.entry.record.text.clone(),
            })
            .collect())
    }

    /// Validate a vector against the index and return its L2 norm.
    fn check_vector(&self, v: &[f32]) -> Result<f32, IndexError> {
        if v.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: v.len(),
            });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteVector);
        }

        let norm = l2_norm(v);
        if self.metric == SimilarityMetric::Cosine && norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }
        Ok(norm)
    }
}

/// Heap entry. "Greater" means ranked higher: larger score, then smaller id.
struct Ranked<'a> {
    score: f32,
    id: &'a ChunkId,
    entry: &'a Arc<IndexedRecord>,
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked<'_> {}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(self.id))
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, seq: u32, embedding: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: ChunkId::new(key, seq),
            embedding,
            metadata: RecordMetadata {
                source_path: key.to_string(),
                start: seq as usize * 10,
                end: seq as usize * 10 + 10,
                fingerprint: Fingerprint::new(key, 1),
            },
            text: format!("{key} chunk {seq}"),
        }
    }

    fn index() -> VectorIndex {
        VectorIndex::new(3, SimilarityMetric::Cosine)
    }

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(384, SimilarityMetric::Cosine);
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert_eq!(index.document_count(), 0);
    }

    #[test]
    fn test_insert_and_get() {
        let mut index = index();
        let rec = record("a.md", 0, vec![1.0, 0.0, 0.0]);

        assert!(!index.insert(rec.clone()).unwrap());

        assert_eq!(index.len(), 1);
        assert!(index.contains(&rec.id));
        assert_eq!(index.get(&rec.id), Some(&rec));
        assert_eq!(index.document("a.md").unwrap().chunk_count, 1);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut index = index();
        let rec = record("a.md", 0, vec![1.0, 0.0, 0.0]);

        index.insert(rec.clone()).unwrap();
        assert!(index.insert(rec).unwrap());

        assert_eq!(index.len(), 1);
        assert_eq!(index.document("a.md").unwrap().chunk_count, 1);
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let mut index = index();
        let result = index.insert(record("a.md", 0, vec![1.0, 0.0, 0.0, 0.0]));
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, got: 4 })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_insert_zero_norm_rejected_for_cosine() {
        let mut index = index();
        let result = index.insert(record("a.md", 0, vec![0.0, 0.0, 0.0]));
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));

        let mut euclid = VectorIndex::new(3, SimilarityMetric::Euclidean);
        assert!(euclid.insert(record("a.md", 0, vec![0.0, 0.0, 0.0])).is_ok());
    }

    #[test]
    fn test_insert_non_finite_rejected() {
        let mut index = index();
        let result = index.insert(record("a.md", 0, vec![f32::NAN, 1.0, 0.0]));
        assert!(matches!(result, Err(IndexError::NonFiniteVector)));
    }

    #[test]
    fn test_remove_document() {
        let mut index = index();
        for seq in 0..5 {
            index.insert(record("a.md", seq, vec![1.0, 0.0, 0.0])).unwrap();
        }
        index.insert(record("a.md.bak", 0, vec![0.0, 1.0, 0.0])).unwrap();
        index.insert(record("b.md", 0, vec![0.0, 1.0, 0.0])).unwrap();

        assert_eq!(index.remove_document("a.md"), 5);
        assert_eq!(index.len(), 2);
        assert!(index.document("a.md").is_none());
        assert!(index.document("a.md.bak").is_some());
        assert_eq!(index.remove_document("a.md"), 0);
    }

    #[test]
    fn test_search_basic() {
        let mut index = index();
        index.insert(record("a.md", 0, vec![1.0, 0.0, 0.0])).unwrap();
        index.insert(record("b.md", 0, vec![0.0, 1.0, 0.0])).unwrap();

        let results = index.search(&[1.0, 0.1, 0.0], 10, 0.0).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, ChunkId::new("a.md", 0));
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].text, "a.md chunk 0");
    }

    #[test]
    fn test_search_with_threshold() {
        let mut index = index();
        index.insert(record("a.md", 0, vec![1.0, 0.0, 0.0])).unwrap();
        index.insert(record("b.md", 0, vec![0.0, 1.0, 0.0])).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 10, 0.9).unwrap();

        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_search_with_limit() {
        let mut index = index();
        for i in 0..10 {
            index
                .insert(record(&format!("n{i}.md"), 0, vec![1.0, i as f32 * 0.1, 0.0]))
                .unwrap();
        }

        let results = index.search(&[1.0, 0.0, 0.0], 3, 0.0).unwrap();

        let keys: Vec<&str> = results.iter().map(|r| r.document_key()).collect();
        assert_eq!(keys, vec!["n0.md", "n1.md", "n2.md"]);
    }

    #[test]
    fn test_search_ties_break_by_chunk_id() {
        let mut index = index();
        index.insert(record("c.md", 0, vec![1.0, 0.0, 0.0])).unwrap();
        index.insert(record("a.md", 1, vec![1.0, 0.0, 0.0])).unwrap();
        index.insert(record("a.md", 0, vec![2.0, 0.0, 0.0])).unwrap();
        index.insert(record("b.md", 0, vec![1.0, 0.0, 0.0])).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 3, 0.0).unwrap();
        let ids: Vec<String> = results.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["a.md#0", "a.md#1", "b.md#0"]);
    }

    #[test]
    fn test_search_matches_full_sort() {
        let mut index = VectorIndex::new(4, SimilarityMetric::Cosine);
        for i in 0..200u32 {
            let x = (i as f32 * 0.37).sin();
            let y = (i as f32 * 0.11).cos();
            let z = ((i % 7) as f32) * 0.1;
            index
                .insert(record(&format!("doc{}.md", i % 23), i, vec![x, y, z, 0.5]))
                .unwrap();
        }
        let query = [0.3, -0.2, 0.9, 0.1];

        let all = index.search(&query, usize::MAX >> 1, -1.0).unwrap();
        assert_eq!(all.len(), 200);
        for pair in all.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }

        for k in [1, 5, 17, 200] {
            let top = index.search(&query, k, 0.2).unwrap();
            let expected: Vec<&QueryResult> =
                all.iter().filter(|r| r.score >= 0.2).take(k).collect();
            assert_eq!(top.len(), expected.len());
            for (got, want) in top.iter().zip(expected) {
                assert_eq!(got.id, want.id);
            }
        }
    }

    #[test]
    fn test_search_empty_index() {
        let index = index();
        assert!(index.search(&[1.0, 0.0, 0.0], 5, 0.3).unwrap().is_empty());
    }

    #[test]
    fn test_search_zero_query_rejected_for_cosine() {
        let mut index = index();
        index.insert(record("a.md", 0, vec![1.0, 0.0, 0.0])).unwrap();
        assert!(matches!(
            index.search(&[0.0, 0.0, 0.0], 5, 0.0),
            Err(IndexError::ZeroNormVector)
        ));
    }

    #[test]
    fn test_search_query_dimension_mismatch() {
        let index = index();
        assert!(matches!(
            index.search(&[1.0, 0.0], 5, 0.0),
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_dot_and_euclidean_metrics() {
        let mut dot = VectorIndex::new(2, SimilarityMetric::Dot);
        dot.insert(record("a.md", 0, vec![2.0, 0.0])).unwrap();
        dot.insert(record("b.md", 0, vec![1.0, 1.0])).unwrap();
        let results = dot.search(&[3.0, 0.0], 5, f32::MIN).unwrap();
        assert_eq!(results[0].document_key(), "a.md");
        assert!((results[0].score - 6.0).abs() < 1e-6);

        let mut euclid = VectorIndex::new(2, SimilarityMetric::Euclidean);
        euclid.insert(record("a.md", 0, vec![0.0, 0.0])).unwrap();
        euclid.insert(record("b.md", 0, vec![3.0, 4.0])).unwrap();
        let results = euclid.search(&[0.0, 0.0], 5, 0.0).unwrap();
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_min_score_ranges() {
        assert!(SimilarityMetric::Cosine.accepts_min_score(-1.0));
        assert!(!SimilarityMetric::Cosine.accepts_min_score(1.5));
        assert!(SimilarityMetric::Dot.accepts_min_score(42.0));
        assert!(!SimilarityMetric::Dot.accepts_min_score(f32::NAN));
        assert!(!SimilarityMetric::Euclidean.accepts_min_score(-0.1));
    }

    #[test]
    fn test_clone_shares_records() {
        let mut index = index();
        index.insert(record("a.md", 0, vec![1.0, 0.0, 0.0])).unwrap();

        let snapshot = index.clone();
        index.remove_document("a.md");

        assert!(index.is_empty());
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_document_tracking() {
        let mut index = index();
        let mut rec = record("a.md", 0, vec![1.0, 0.0, 0.0]);
        index.insert(rec.clone()).unwrap();

        rec.metadata.fingerprint = Fingerprint::new("changed", 2);
        index.insert(rec.clone()).unwrap();

        let docs: Vec<(&str, &DocumentSummary)> = index.documents().collect();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].1.fingerprint, rec.metadata.fingerprint);
    }
}
