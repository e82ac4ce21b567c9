//! Semantic search infrastructure for vault documents.
//!
//! Embeddings come from a pluggable `Embedder`; vectors live in an
//! in-memory index persisted to a single binary file.
//!
//! # Architecture
//!
//! - `chunker`: Splits document text into overlapping fixed-size chunks
//! - `embeddings`: `Embedder` trait and the fastembed-backed local model
//! - `remote`: OpenAI-compatible HTTP embedder
//! - `index`: In-memory vector index with top-k similarity search
//! - `storage`: Binary file I/O for vectors.bin persistence
//! - `store`: Owned store handle with snapshot readers and a single writer
//! - `indexer`: Fingerprint-gated sync of a document set into the store
//! - `searcher`: Query text to ranked chunks

pub mod chunker;
pub mod embeddings;
pub mod index;
pub mod indexer;
pub mod remote;
pub mod searcher;
pub mod storage;
pub mod store;

pub use chunker::{Chunk, ChunkId, Chunker};
#[cfg(feature = "local-embeddings")]
pub use embeddings::EmbeddingModel;
pub use embeddings::{Embedder, EmbeddingError};
pub use index::{EmbeddingRecord, QueryResult, RecordMetadata, SimilarityMetric, VectorIndex};
pub use indexer::{IndexReport, Indexer};
pub use remote::RemoteEmbedder;
pub use searcher::{SearchDefaults, Searcher};
pub use storage::{VectorStorage, VectorStorageError};
pub use store::{StoreStats, VectorStore};
