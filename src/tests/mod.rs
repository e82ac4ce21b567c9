
use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};

use crate::semantic::embeddings::{Embedder, EmbeddingError};

/// Deterministic bag-of-words embedder.
///
/// Every lowercase alphanumeric token adds 1.0 to a bucket picked by its
/// SHA256, so texts sharing words score higher under cosine similarity.
pub struct HashingEmbedder {
    dimensions: usize,
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every text containing `marker`.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_on = Some(marker.to_string());
        self
    }

    /// Number of texts embedded so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                return Err(EmbeddingError::EmbeddingFailed(format!(
                    "refusing text containing '{marker}'"
                )));
            }
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            vector[(u64::from_le_bytes(bucket) % self.dimensions as u64) as usize] += 1.0;
        }

        // keep empty text embeddable under cosine
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }

        Ok(vector)
    }

    fn name(&self) -> &str {
        "hashing-test-embedder"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
