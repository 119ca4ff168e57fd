//! Paragraph-boundary text chunker.
//!
//! Splits document text into chunks bounded by `max_chunk_size` characters.
//! Splitting only happens on blank-line paragraph boundaries; a paragraph is
//! never cut in the middle.
//!
//! # Algorithm
//!
//! 1. Split text into paragraphs at runs of one or more blank
//!    (empty or whitespace-only) lines. Trailing whitespace is trimmed;
//!    leading indentation of the first line is kept, so indented code and
//!    nested list blocks survive unchanged.
//! 2. Accumulate paragraphs into a buffer, joined by `"\n\n"`.
//! 3. When appending the next paragraph would push the buffer past
//!    `max_chunk_size` and the buffer is non-empty, flush the buffer and
//!    start a new one with that paragraph.
//! 4. A paragraph longer than `max_chunk_size` becomes its own oversized
//!    chunk.
//! 5. Empty or whitespace-only text yields no chunks.
//!
//! Lengths are counted in `char`s, so multi-byte text is measured the same
//! way as ASCII. The `"\n\n"` separator counts toward the limit: the check
//! is `current + 2 + paragraph > max_chunk_size`, not `current + paragraph`.
//! A stored chunk therefore never exceeds `max_chunk_size` unless it is a
//! single oversized paragraph, at the cost of flushing slightly earlier than
//! a check that ignores the separator.
//!
//! # Example
//!
//! ```rust
//! use knowledge_engine_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("Alpha facts.\n\nBeta facts.\n\nGamma facts.", 15);
//! assert_eq!(chunks, vec!["Alpha facts.", "Beta facts.", "Gamma facts."]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Metadata};

/// Separator placed between paragraphs that share a chunk.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

const SEPARATOR_CHARS: usize = 2;

/// Split `text` into paragraph-aligned chunks of at most `max_chunk_size`
/// characters (oversized paragraphs excepted).
///
/// Deterministic: identical input always yields an identical sequence.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut current_chars = 0usize;

    for para in paragraphs(text) {
        let para_chars = para.chars().count();
        let would_be = if current_buf.is_empty() {
            para_chars
        } else {
            current_chars + SEPARATOR_CHARS + para_chars
        };

        if would_be > max_chunk_size && !current_buf.is_empty() {
            chunks.push(std::mem::take(&mut current_buf));
            current_chars = 0;
        }

        if !current_buf.is_empty() {
            current_buf.push_str(PARAGRAPH_SEPARATOR);
            current_chars += SEPARATOR_CHARS;
        }
        current_buf.push_str(para);
        current_chars += para_chars;
    }

    if !current_buf.is_empty() {
        chunks.push(current_buf);
    }

    chunks
}

/// Split text into non-empty paragraphs.
///
/// A boundary is one or more lines that are empty or contain only
/// whitespace. Each paragraph starts at its first non-blank line and is
/// borrowed from `text` unchanged apart from trailing whitespace, so
/// indentation and interior line breaks are preserved.
pub fn paragraphs(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0usize;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                out.push(text[s..end].trim_end());
            }
        } else {
            if start.is_none() {
                start = Some(line_start);
            }
            end = offset;
        }
    }

    if let Some(s) = start {
        out.push(text[s..end].trim_end());
    }

    out
}

/// Turn chunk texts into [`Chunk`] records for `document_id`.
///
/// Positions are contiguous from 0. Each chunk gets a fresh UUID, the
/// SHA-256 of its text, and `{"index": n}` metadata.
pub fn build_chunks(document_id: &str, texts: Vec<String>) -> Vec<Chunk> {
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(document_id, i as i64, text))
        .collect()
}

/// Hash used to detect re-ingestion that would not change the chunk set.
pub fn dedup_hash(max_chunk_size: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((max_chunk_size as u64).to_le_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let mut metadata = Metadata::new();
    metadata.insert("index".to_string(), serde_json::Value::from(index));

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        position: index,
        content: text,
        metadata,
        hash,
        embedding: None,
        external_ref: None,
    }
}
