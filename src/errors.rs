use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::index::IndexError;
use crate::semantic::storage::VectorStorageError;

#[derive(thiserror::Error, Debug)]
pub enum OragError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dimension mismatch: index holds {stored}-dimensional vectors, embedding model produces {configured}; rebuild the index")]
    DimensionMismatch { stored: usize, configured: usize },

    #[error("index was built with a different embedding model; rebuild the index")]
    ModelMismatch,

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(#[source] VectorStorageError),

    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbeddingError),

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("vector store is locked: {0}")]
    Locked(String),
}

impl OragError {
    pub fn config(msg: impl Into<String>) -> Self {
        OragError::Config(msg.into())
    }

    /// Failures that only affect the document being indexed.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            OragError::EmbeddingUnavailable(_) | OragError::InvalidVector(_)
        )
    }
}

impl From<IndexError> for OragError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, got } => OragError::DimensionMismatch {
                stored: expected,
                configured: got,
            },
            IndexError::ZeroNormVector | IndexError::NonFiniteVector => {
                OragError::InvalidVector(err.to_string())
            }
        }
    }
}

impl From<VectorStorageError> for OragError {
    fn from(err: VectorStorageError) -> Self {
        match err {
            VectorStorageError::DimensionMismatch { expected, got } => {
                OragError::DimensionMismatch {
                    stored: got,
                    configured: expected,
                }
            }
            VectorStorageError::ModelMismatch => OragError::ModelMismatch,
            other => OragError::StoreUnavailable(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, OragError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_dimension_error_maps_to_dimension_mismatch() {
        let err: OragError = IndexError::DimensionMismatch {
            expected: 384,
            got: 768,
        }
        .into();

        assert!(matches!(
            err,
            OragError::DimensionMismatch {
                stored: 384,
                configured: 768
            }
        ));
        assert!(!err.is_per_document());
    }

    #[test]
    fn test_storage_errors_keep_their_kind() {
        let err: OragError = VectorStorageError::ChecksumMismatch.into();
        assert!(matches!(err, OragError::StoreUnavailable(_)));

        let err: OragError = VectorStorageError::DimensionMismatch {
            expected: 384,
            got: 3,
        }
        .into();
        assert!(matches!(
            err,
            OragError::DimensionMismatch {
                stored: 3,
                configured: 384
            }
        ));

        let err: OragError = VectorStorageError::ModelMismatch.into();
        assert!(matches!(err, OragError::ModelMismatch));
    }

    #[test]
    fn test_metric_mismatch_is_store_unavailable() {
        use crate::semantic::index::SimilarityMetric;

        let err: OragError = VectorStorageError::MetricMismatch {
            id: "a.md#1".to_string(),
            stored: SimilarityMetric::Euclidean,
            configured: SimilarityMetric::Cosine,
            reason: IndexError::ZeroNormVector.to_string(),
        }
        .into();

        assert!(matches!(err, OragError::StoreUnavailable(_)));
        assert!(err.to_string().contains("rebuild the index"));
    }

    #[test]
    fn test_zero_norm_is_per_document() {
        let err: OragError = IndexError::ZeroNormVector.into();
        assert!(matches!(err, OragError::InvalidVector(_)));
        assert!(err.is_per_document());
    }

    #[test]
    fn test_embedding_failure_is_per_document() {
        let err: OragError = EmbeddingError::EmbeddingFailed("backend down".to_string()).into();
        assert!(err.is_per_document());
        assert!(err.to_string().contains("backend down"));
    }
}
