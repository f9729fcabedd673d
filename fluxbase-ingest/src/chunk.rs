//! Chunking strategies (spec §4.2).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by [`Chunker::chunk`].
#[non_exhaustive]
#[derive(Debug, Error, PartialEq)]
pub enum ChunkError {
    /// `overlap` must be strictly less than `chunk_size` (KB invariant §3).
    #[error("chunk overlap {overlap} must be less than chunk size {chunk_size}")]
    InvalidOverlap {
        /// Requested chunk size, in estimated tokens.
        chunk_size: usize,
        /// Requested overlap, in estimated tokens.
        overlap: usize,
    },
}

/// Chunking strategy, mirroring `KnowledgeBase.chunkStrategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed-size character windows with overlap.
    Fixed,
    /// Greedy sentence packing.
    Sentence,
    /// Blank-line-delimited paragraphs.
    Paragraph,
    /// Separator cascade with character-split fallback.
    Recursive,
}

/// One chunk produced by [`Chunker::chunk`], before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    /// Normalized chunk text.
    pub content: String,
    /// 0-based, contiguous within a document.
    pub chunk_index: usize,
    /// Char offset into the (whitespace-normalized) source, when known.
    pub start_offset: Option<usize>,
    /// Char offset into the (whitespace-normalized) source, when known.
    pub end_offset: Option<usize>,
    /// Estimated token count (`ceil(chars / 4)`).
    pub token_count: usize,
}

const CHARS_PER_TOKEN: usize = 4;

fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        0
    } else {
        chars.div_ceil(CHARS_PER_TOKEN)
    }
}

/// Collapse whitespace runs to a single space and trim both ends.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !out.is_empty() {
                pending_space = true;
            }
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }
    out
}

/// Splits and chunks extracted document text.
pub struct Chunker;

impl Chunker {
    /// Chunk `text` under `strategy`, targeting `chunk_size` estimated
    /// tokens per chunk with `overlap` tokens of carry-over between
    /// consecutive chunks (ignored by the `paragraph` strategy, which has
    /// no notion of overlap).
    pub fn chunk(
        text: &str,
        strategy: ChunkStrategy,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Vec<RawChunk>, ChunkError> {
        if overlap >= chunk_size {
            return Err(ChunkError::InvalidOverlap { chunk_size, overlap });
        }

        let contents = match strategy {
            ChunkStrategy::Fixed => return Ok(Self::fixed(text, chunk_size, overlap)),
            ChunkStrategy::Sentence => greedy_pack(split_sentences(text), chunk_size, overlap),
            ChunkStrategy::Paragraph => split_paragraphs(text)
                .into_iter()
                .map(|p| normalize_whitespace(&p))
                .collect(),
            ChunkStrategy::Recursive => {
                let pieces = recursive_split(text, RECURSIVE_SEPARATORS, chunk_size);
                greedy_pack(pieces, chunk_size, overlap)
            }
        };

        Ok(build_raw_chunks(contents))
    }

    fn fixed(text: &str, chunk_size: usize, overlap: usize) -> Vec<RawChunk> {
        let normalized = normalize_whitespace(text);
        let chars: Vec<char> = normalized.chars().collect();
        let window = chunk_size * CHARS_PER_TOKEN;
        let step = (chunk_size - overlap) * CHARS_PER_TOKEN;

        if chars.is_empty() || window == 0 {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;
        loop {
            let end = (start + window).min(chars.len());
            let content: String = chars[start..end].iter().collect();
            let token_count = estimate_tokens(&content);
            if token_count > 0 {
                chunks.push(RawChunk {
                    content,
                    chunk_index: index,
                    start_offset: Some(start),
                    end_offset: Some(end),
                    token_count,
                });
                index += 1;
            }
            if end >= chars.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

fn build_raw_chunks(contents: Vec<String>) -> Vec<RawChunk> {
    contents
        .into_iter()
        .filter_map(|content| {
            let token_count = estimate_tokens(&content);
            (token_count > 0).then_some((content, token_count))
        })
        .enumerate()
        .map(|(chunk_index, (content, token_count))| RawChunk {
            content,
            chunk_index,
            start_offset: None,
            end_offset: None,
            token_count,
        })
        .collect()
}

/// Split on `.`/`?`/`!` boundaries, treating runs of terminal punctuation
/// (e.g. `?!`, `...`) as a single boundary.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        if matches!(c, '.' | '?' | '!') {
            i += 1;
            while i < chars.len() && matches!(chars[i], '.' | '?' | '!') {
                current.push(chars[i]);
                i += 1;
            }
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
            continue;
        }
        i += 1;
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Split on blank-line runs; empty paragraphs are dropped.
fn split_paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for line in normalized.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.clone());
                current.clear();
            }
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(line.trim());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

const RECURSIVE_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

fn recursive_split(text: &str, separators: &[&str], chunk_size: usize) -> Vec<String> {
    if estimate_tokens(text) <= chunk_size {
        return vec![text.to_string()];
    }
    let Some((sep, rest)) = separators.split_first() else {
        return char_split(text, chunk_size);
    };

    let mut result = Vec::new();
    for piece in text.split(sep) {
        if piece.is_empty() {
            continue;
        }
        if estimate_tokens(piece) > chunk_size {
            result.extend(recursive_split(piece, rest, chunk_size));
        } else {
            result.push(piece.to_string());
        }
    }
    result
}

/// Last-resort split: fixed character windows, no overlap.
fn char_split(text: &str, chunk_size: usize) -> Vec<String> {
    let window = (chunk_size * CHARS_PER_TOKEN).max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + window).min(chars.len());
        out.push(chars[start..end].iter().collect());
        start = end;
    }
    out
}

/// Greedily pack `units` until adding the next would exceed `chunk_size`
/// tokens, then overlap-carry the last `overlap` tokens' worth of units
/// into the next chunk.
fn greedy_pack(units: Vec<String>, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for unit in units {
        let normalized = normalize_whitespace(&unit);
        if normalized.is_empty() {
            continue;
        }
        let unit_tokens = estimate_tokens(&normalized);

        if current_tokens + unit_tokens > chunk_size && !current.is_empty() {
            chunks.push(current.join(" "));
            current = carry_overlap(&current, overlap);
            current_tokens = current.iter().map(|s| estimate_tokens(s)).sum();
        }

        current_tokens += unit_tokens;
        current.push(normalized);
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// Take units from the tail, in original order, until their combined token
/// estimate reaches `overlap`.
fn carry_overlap(units: &[String], overlap: usize) -> Vec<String> {
    if overlap == 0 {
        return Vec::new();
    }
    let mut carried = Vec::new();
    let mut tokens = 0usize;
    for unit in units.iter().rev() {
        if tokens >= overlap {
            break;
        }
        tokens += estimate_tokens(unit);
        carried.push(unit.clone());
    }
    carried.reverse();
    carried
}
