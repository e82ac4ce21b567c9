//! Binary storage for the vector index.
//!
//! File format: vectors.bin
//!
//! Header (62 bytes):
//! - magic: [u8; 4] (`ORAG`)
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u32 (little-endian)
//! - metric: u8 (0 cosine, 1 dot, 2 euclidean) the records were validated under
//! - chunk_size: u32, chunk_overlap: u32 (both 0 when unknown)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, all integers little-endian, strings are u32 length + UTF-8):
//! - document_key: string
//! - seq: u32
//! - source_path: string
//! - start: u64, end: u64 (character offsets)
//! - content_hash: [u8; 32], modified: u64 (document fingerprint)
//! - text: string
//! - embedding: [f32; dimensions]
//!
//! Trailer:
//! - body_checksum: u32 (CRC32 of all entry bytes)

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::document::Fingerprint;
use crate::semantic::chunker::{ChunkId, Chunker};
use crate::semantic::index::{EmbeddingRecord, RecordMetadata, SimilarityMetric, VectorIndex};

/// File name of the persisted index inside the vector store directory
pub const VECTORS_FILE: &str = "vectors.bin";

const MAGIC: &[u8; 4] = b"ORAG";

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: magic(4) + version(1) + model_id(32) + dimensions(4)
/// + metric(1) + chunk_size(4) + chunk_overlap(4) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 62;

/// Header bytes covered by the header checksum
const HEADER_BODY: usize = HEADER_SIZE - 4;

/// Upper bound for a single string field; anything larger is treated as corruption
const MAX_FIELD_LEN: usize = 64 * 1024 * 1024;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error(
        "Record {id} was stored under {stored:?} similarity and is invalid under \
         {configured:?}: {reason}; rebuild the index"
    )]
    MetricMismatch {
        id: String,
        stored: SimilarityMetric,
        configured: SimilarityMetric,
        reason: String,
    },

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

/// Storage manager for the persisted vector index.
#[derive(Debug, Clone)]
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    /// Create a new storage manager for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the storage file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the storage file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Size of the storage file in bytes, 0 if absent.
    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Time of the last successful save, if any.
    pub fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Load the vector index from storage.
    ///
    /// Fails if the file is unreadable, truncated, fails a checksum, or was
    /// written for another model or dimension. Every stored record must load;
    /// a record the index rejects fails the whole load.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
        metric: SimilarityMetric,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        validate_header(&header, expected_model_id, expected_dimensions)?;

        let dimensions = header.dimensions as usize;
        let mut index = VectorIndex::new(dimensions, metric);
        index.set_chunking(header.chunking);
        let mut body = ChecksumReader::new(&mut reader);

        for _ in 0..header.entry_count {
            let record = read_entry(&mut body, dimensions)?;
            let id = record.id.to_string();
            match index.insert(record) {
                Ok(false) => {}
                Ok(true) => {
                    return Err(VectorStorageError::InvalidFormat(format!(
                        "record {id} is stored twice"
                    )))
                }
                Err(e) if header.metric != metric => {
                    return Err(VectorStorageError::MetricMismatch {
                        id,
                        stored: header.metric,
                        configured: metric,
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    return Err(VectorStorageError::InvalidFormat(format!(
                        "record {id} is invalid: {e}"
                    )))
                }
            }
        }

        let computed = body.finalize();
        let stored = read_u32(&mut reader)?;
        if stored != computed {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(VectorStorageError::InvalidFormat(
                "unexpected data after trailer".to_string(),
            ));
        }

        Ok(index)
    }

    /// Save the vector index to storage.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        let result = write_to_file(&temp_path, index, model_id);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Delete the storage file if it exists.
    pub fn delete(&self) -> Result<(), VectorStorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u32,
    metric: SimilarityMetric,
    chunking: Option<Chunker>,
    entry_count: u64,
}

fn write_to_file(
    path: &Path,
    index: &VectorIndex,
    model_id: &[u8; 32],
) -> Result<(), VectorStorageError> {
    let dimensions = u32::try_from(index.dimensions()).map_err(|_| {
        VectorStorageError::InvalidFormat(format!("dimension {} too large", index.dimensions()))
    })?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_header(
        &mut writer,
        &Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            metric: index.metric(),
            chunking: index.chunking(),
            entry_count: index.len() as u64,
        },
    )?;

    let mut body = ChecksumWriter::new(&mut writer);
    for record in index.iter() {
        write_entry(&mut body, record)?;
    }
    let checksum = body.finalize();
    writer.write_all(&checksum.to_le_bytes())?;

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).map_err(eof_as_corruption)?;

    if &header_bytes[0..4] != MAGIC {
        return Err(VectorStorageError::InvalidFormat(
            "not an orag vector file".to_string(),
        ));
    }

    let version = header_bytes[4];
    if version > FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes(le_array(&header_bytes[HEADER_BODY..]));
    let computed_checksum = crc32fast::hash(&header_bytes[..HEADER_BODY]);
    if stored_checksum != computed_checksum {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[5..37]);

    let metric = metric_from_byte(header_bytes[41])?;
    let chunk_size = u32::from_le_bytes(le_array(&header_bytes[42..46])) as usize;
    let chunk_overlap = u32::from_le_bytes(le_array(&header_bytes[46..50])) as usize;
    let chunking = match (chunk_size, chunk_overlap) {
        (0, 0) => None,
        (size, overlap) => Some(Chunker::new(size, overlap).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "invalid chunking size={size} overlap={overlap}"
            ))
        })?),
    };

    Ok(Header {
        version,
        model_id,
        dimensions: u32::from_le_bytes(le_array(&header_bytes[37..41])),
        metric,
        chunking,
        entry_count: u64::from_le_bytes(le_array(&header_bytes[50..58])),
    })
}

/// Validate header against expected values.
fn validate_header(
    header: &Header,
    expected_model_id: &[u8; 32],
    expected_dimensions: usize,
) -> Result<(), VectorStorageError> {
    if header.version == 0 {
        return Err(VectorStorageError::InvalidFormat("version 0".to_string()));
    }

    if header.dimensions as usize != expected_dimensions {
        return Err(VectorStorageError::DimensionMismatch {
            expected: expected_dimensions,
            got: header.dimensions as usize,
        });
    }

    if header.model_id != *expected_model_id {
        return Err(VectorStorageError::ModelMismatch);
    }

    Ok(())
}

fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0..4].copy_from_slice(MAGIC);
    header_bytes[4] = header.version;
    header_bytes[5..37].copy_from_slice(&header.model_id);
    header_bytes[37..41].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[41] = metric_to_byte(header.metric);

    let (size, overlap) = header
        .chunking
        .map(|c| (c.size(), c.overlap()))
        .unwrap_or((0, 0));
    for (range, value) in [(42..46, size), (46..50, overlap)] {
        let value = u32::try_from(value).map_err(|_| {
            VectorStorageError::InvalidFormat(format!("chunking value {value} too large"))
        })?;
        header_bytes[range].copy_from_slice(&value.to_le_bytes());
    }
    header_bytes[50..58].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[..HEADER_BODY]);
    header_bytes[HEADER_BODY..].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn metric_to_byte(metric: SimilarityMetric) -> u8 {
    match metric {
        SimilarityMetric::Cosine => 0,
        SimilarityMetric::Dot => 1,
        SimilarityMetric::Euclidean => 2,
    }
}

fn metric_from_byte(byte: u8) -> Result<SimilarityMetric, VectorStorageError> {
    match byte {
        0 => Ok(SimilarityMetric::Cosine),
        1 => Ok(SimilarityMetric::Dot),
        2 => Ok(SimilarityMetric::Euclidean),
        other => Err(VectorStorageError::InvalidFormat(format!(
            "unknown similarity metric {other}"
        ))),
    }
}

fn write_entry(
    writer: &mut impl Write,
    record: &EmbeddingRecord,
) -> Result<(), VectorStorageError> {
    write_str(writer, &record.id.document_key)?;
    writer.write_all(&record.id.seq.to_le_bytes())?;
    write_str(writer, &record.metadata.source_path)?;
    writer.write_all(&(record.metadata.start as u64).to_le_bytes())?;
    writer.write_all(&(record.metadata.end as u64).to_le_bytes())?;
    writer.write_all(&record.metadata.fingerprint.content_hash)?;
    writer.write_all(&record.metadata.fingerprint.modified.to_le_bytes())?;
    write_str(writer, &record.text)?;

    for &value in &record.embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}

fn read_entry(
    reader: &mut impl Read,
    dimensions: usize,
) -> Result<EmbeddingRecord, VectorStorageError> {
    let document_key = read_string(reader)?;
    let seq = read_u32(reader)?;
    let source_path = read_string(reader)?;
    let start = read_u64(reader)? as usize;
    let end = read_u64(reader)? as usize;

    let mut content_hash = [0u8; 32];
    reader.read_exact(&mut content_hash).map_err(eof_as_corruption)?;
    let modified = read_u64(reader)?;

    let text = read_string(reader)?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut float_bytes = [0u8; 4];
        reader.read_exact(&mut float_bytes).map_err(eof_as_corruption)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    Ok(EmbeddingRecord {
        id: ChunkId { document_key, seq },
        embedding,
        metadata: RecordMetadata {
            source_path,
            start,
            end,
            fingerprint: Fingerprint {
                content_hash,
                modified,
            },
        },
        text,
    })
}

fn write_str(writer: &mut impl Write, value: &str) -> Result<(), VectorStorageError> {
    let len = u32::try_from(value.len())
        .map_err(|_| VectorStorageError::InvalidFormat("string field too long".to_string()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_string(reader: &mut impl Read) -> Result<String, VectorStorageError> {
    let len = read_u32(reader)? as usize;
    if len > MAX_FIELD_LEN {
        return Err(VectorStorageError::InvalidFormat(format!(
            "string field of {len} bytes"
        )));
    }

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(eof_as_corruption)?;
    String::from_utf8(bytes)
        .map_err(|_| VectorStorageError::InvalidFormat("string field is not UTF-8".to_string()))
}

fn read_u32(reader: &mut impl Read) -> Result<u32, VectorStorageError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes).map_err(eof_as_corruption)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(reader: &mut impl Read) -> Result<u64, VectorStorageError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes).map_err(eof_as_corruption)?;
    Ok(u64::from_le_bytes(bytes))
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn eof_as_corruption(err: io::Error) -> VectorStorageError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        VectorStorageError::InvalidFormat("file is truncated".to_string())
    } else {
        VectorStorageError::Io(err)
    }
}

/// Reader that computes a CRC32 over everything read through it.
struct ChecksumReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
}

impl<R: Read> ChecksumReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Writer that computes a CRC32 over everything written through it.
struct ChecksumWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> ChecksumWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
