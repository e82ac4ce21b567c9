//! Fixed-size overlapping chunking of document text.
//!
//! Offsets are character offsets (Unicode scalar values), not bytes. For a
//! chunk size `s` and overlap `o`, chunk `i + 1` starts exactly `s - o`
//! characters after chunk `i`. The last chunk may be shorter than `s`.

use std::fmt;

use serde::Serialize;

use crate::errors::{OragError, Result};

/// Deterministic chunk identity: owning document key plus sequence index.
///
/// Orders by document key first, then sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ChunkId {
    pub document_key: String,
    pub seq: u32,
}

impl ChunkId {
    pub fn new(document_key: impl Into<String>, seq: u32) -> Self {
        Self {
            document_key: document_key.into(),
            seq,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_key, self.seq)
    }
}

/// A contiguous slice of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    /// Start character offset (inclusive)
    pub start: usize,
    /// End character offset (exclusive)
    pub end: usize,
    pub text: String,
}

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Requires `0 < overlap < size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(OragError::config("chunk size must be greater than 0"));
        }
        if overlap == 0 || overlap >= size {
            return Err(OragError::config(format!(
                "chunk overlap must satisfy 0 < overlap < size, got overlap={overlap} size={size}"
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of consecutive chunks.
    pub fn stride(&self) -> usize {
        self.size - self.overlap
    }

    /// Split `text` into ordered chunks owned by `document_key`.
    ///
    /// Text no longer than the chunk size (including empty text) yields
    /// exactly one chunk covering all of it.
    pub fn chunk(&self, document_key: &str, text: &str) -> Vec<Chunk> {
        // byte offset of every char boundary, plus the end of the string
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_len = boundaries.len() - 1;

        let mut chunks = Vec::with_capacity(char_len / self.stride() + 1);
        let mut start = 0;

        loop {
            let end = (start + self.size).min(char_len);
            chunks.push(Chunk {
                id: ChunkId::new(document_key, chunks.len() as u32),
                start,
                end,
                text: text[boundaries[start]..boundaries[end]].to_string(),
            });

            if end == char_len {
                break;
            }
            start += self.stride();
        }

        chunks
    }
}

/// Rebuild the original text from chunks produced by the same chunker.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered: usize = 0;

    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        out.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.end);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(Chunker::new(0, 0), Err(OragError::Config(_))));
        assert!(matches!(Chunker::new(10, 0), Err(OragError::Config(_))));
        assert!(matches!(Chunker::new(10, 10), Err(OragError::Config(_))));
        assert!(matches!(Chunker::new(10, 20), Err(OragError::Config(_))));
        assert!(Chunker::new(10, 9).is_ok());
    }

    #[test]
    fn test_thousand_chars_make_three_chunks() {
        let text = "a".repeat(1000);
        let chunker = Chunker::new(512, 50).unwrap();
        let chunks = chunker.chunk("doc.md", &text);

        let offsets: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(offsets, vec![(0, 512), (462, 974), (924, 1000)]);
        assert_eq!(chunks[2].text.len(), 76);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = Chunker::new(512, 50).unwrap();

        let chunks = chunker.chunk("doc.md", "short note");
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 10));
        assert_eq!(chunks[0].text, "short note");

        let exact = "b".repeat(512);
        assert_eq!(chunker.chunk("doc.md", &exact).len(), 1);
    }

    #[test]
    fn test_empty_text_single_empty_chunk() {
        let chunker = Chunker::new(8, 2).unwrap();
        let chunks = chunker.chunk("empty.md", "");
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 0));
        assert!(chunks[0].text.is_empty());
    }

    #[test]
    fn test_ids_are_sequential() {
        let chunker = Chunker::new(4, 1).unwrap();
        let chunks = chunker.chunk("notes/a.md", "abcdefghij");

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, ChunkId::new("notes/a.md", i as u32));
        }
        assert_eq!(chunks[1].id.to_string(), "notes/a.md#1");
    }

    #[test]
    fn test_offsets_are_characters_not_bytes() {
        let chunker = Chunker::new(3, 1).unwrap();
        let text = "héllo wörld";
        let chunks = chunker.chunk("u.md", text);

        assert_eq!(chunks[0].text, "hél");
        assert_eq!(chunks[1].text, "llo");
        assert_eq!(chunks.last().unwrap().end, text.chars().count());
    }

    #[test]
    fn test_reassemble_reconstructs_text() {
        let texts = [
            String::new(),
            "x".to_string(),
            "The quick brown fox jumps over the lazy dog".to_string(),
            "日本語のテキストと English mixed together, repeated. ".repeat(7),
            "z".repeat(1000),
        ];
        let params = [(2, 1), (5, 2), (16, 15), (64, 7), (512, 50)];

        for text in &texts {
            for (size, overlap) in params {
                let chunker = Chunker::new(size, overlap).unwrap();
                let chunks = chunker.chunk("doc", text);
                assert_eq!(&reassemble(&chunks), text, "size={size} overlap={overlap}");
            }
        }
    }

    #[test]
    fn test_consecutive_starts_follow_stride() {
        let chunker = Chunker::new(10, 3).unwrap();
        let chunks = chunker.chunk("doc", &"q".repeat(95));

        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start, pair[0].start + chunker.stride());
            assert_eq!(pair[0].end - pair[0].start, 10);
        }
    }

    #[test]
    fn test_deterministic() {
        let chunker = Chunker::new(7, 2).unwrap();
        let text = "deterministic chunking output";
        assert_eq!(chunker.chunk("d", text), chunker.chunk("d", text));
    }
}
