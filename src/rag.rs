//! RAG context assembly from ranked search hits.
//!
//! Hits are grouped per document. Documents are ranked by their best chunk,
//! each document's chunks are stitched back together in text order with
//! overlapping characters removed, and the resulting blocks are
//! concatenated until the next block would exceed `max_chars`.
//!
//! Block layout:
//!
//! ```text
//! ## {source_path} (score: {best:.4})
//!
//! {body}
//! ```
//!
//! Blocks are separated by `\n\n---\n\n`. Chunks of one document that do not
//! touch are joined with `\n...\n`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::{OragError, Result};
use crate::semantic::QueryResult;

const BLOCK_SEPARATOR: &str = "\n\n---\n\n";
const GAP_MARKER: &str = "\n...\n";

/// A document cited in an assembled context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub document_key: String,
    pub source_path: String,
    pub best_score: f32,
    /// Chunks of this document that went into its block
    pub chunk_count: usize,
    /// Characters in this document's block, header included
    pub char_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RagContext {
    pub context: String,
    pub sources: Vec<SourceRef>,
    /// Length of `context` in characters
    pub char_count: usize,
}

struct Group<'a> {
    best_score: f32,
    source_path: &'a str,
    chunks: Vec<&'a QueryResult>,
}

/// Build a context of at most `max_chars` characters from at most
/// `max_sources` documents.
pub fn assemble(
    results: &[QueryResult],
    max_chars: usize,
    max_sources: usize,
) -> Result<RagContext> {
    if max_chars == 0 {
        return Err(OragError::config("max_chars must be greater than 0"));
    }
    if max_sources == 0 {
        return Err(OragError::config("max_sources must be at least 1"));
    }

    let mut groups: BTreeMap<&str, Group<'_>> = BTreeMap::new();
    for result in results {
        let group = groups.entry(result.document_key()).or_insert_with(|| Group {
            best_score: result.score,
            source_path: &result.metadata.source_path,
            chunks: Vec::new(),
        });
        if result.score > group.best_score {
            group.best_score = result.score;
            group.source_path = &result.metadata.source_path;
        }
        if !group.chunks.iter().any(|c| c.id == result.id) {
            group.chunks.push(result);
        }
    }

    let mut ranked: Vec<(&str, Group<'_>)> = groups.into_iter().collect();
    // BTreeMap order makes ties fall back to document key ascending
    ranked.sort_by(|(_, a), (_, b)| b.best_score.total_cmp(&a.best_score));

    let mut out = RagContext::default();

    for (document_key, mut group) in ranked.into_iter().take(max_sources) {
        group
            .chunks
            .sort_by(|a, b| a.metadata.start.cmp(&b.metadata.start).then(a.id.cmp(&b.id)));

        let block = format!(
            "## {} (score: {:.4})\n\n{}",
            group.source_path,
            group.best_score,
            stitch(&group.chunks)
        );
        let block_chars = block.chars().count();
        let separator_chars = if out.sources.is_empty() {
            0
        } else {
            BLOCK_SEPARATOR.len()
        };

        if out.char_count + separator_chars + block_chars > max_chars {
            log::debug!(
                "Context budget of {max_chars} chars reached after {} sources",
                out.sources.len()
            );
            break;
        }

        if separator_chars > 0 {
            out.context.push_str(BLOCK_SEPARATOR);
        }
        out.context.push_str(&block);
        out.char_count += separator_chars + block_chars;
        out.sources.push(SourceRef {
            document_key: document_key.to_string(),
            source_path: group.source_path.to_string(),
            best_score: group.best_score,
            chunk_count: group.chunks.len(),
            char_count: block_chars,
        });
    }

    Ok(out)
}

/// Join chunks sorted by start offset, dropping characters already emitted.
fn stitch(chunks: &[&QueryResult]) -> String {
    let mut body = String::new();
    let mut covered: Option<usize> = None;

    for chunk in chunks {
        let (start, end) = (chunk.metadata.start, chunk.metadata.end);
        match covered {
            None => {
                body.push_str(&chunk.text);
                covered = Some(end);
            }
            Some(until) if start <= until => {
                if end > until {
                    body.extend(chunk.text.chars().skip(until - start));
                    covered = Some(end);
                }
            }
            Some(_) => {
                body.push_str(GAP_MARKER);
                body.push_str(&chunk.text);
                covered = Some(end);
            }
        }
    }

    body
}
