//! Recursive, overlap-aware text chunker.
//!
//! Text is first cut into *pieces* along the coarsest natural boundary that
//! keeps every piece within `chunk_size` characters: paragraph breaks, then
//! line breaks, then sentence ends, then whitespace, and finally single
//! characters. Separators stay attached to the piece they end, so pieces tile
//! the input exactly.
//!
//! Pieces are then merged greedily into chunks. When a chunk is emitted, the
//! trailing pieces that fit within `chunk_overlap` characters are carried into
//! the next chunk. Every chunk is a verbatim substring of the input, so
//! [`reconstruct`] can rebuild the original text by dropping the overlaps.
//!
//! Lengths are counted in characters, offsets are byte offsets.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::error::{DocChatError, Result};
use crate::models::Chunk;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Separator levels, coarsest first. Past the last level text is cut per character.
const SEPARATORS: &[&[&str]] = &[
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? ", "; "],
    &[" ", "\t"],
];

/// A byte range `[start, end)` of the input text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

/// Splits text into overlapping chunks of bounded size.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    /// Create a chunker. `chunk_overlap` must be strictly less than `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DocChatError::InvalidChunking(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(DocChatError::InvalidChunking(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Compute chunk boundaries for `text`. Empty input yields no spans.
    pub fn split(&self, text: &str) -> Vec<Span> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        self.split_pieces(text, 0, text.len(), 0, &mut pieces);
        self.merge(pieces)
    }

    /// Split `text` into [`Chunk`]s tagged with `source` and contiguous indices from 0.
    pub fn chunk(&self, source: &str, text: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(i, span)| make_chunk(source, i as i64, span.start, &text[span.start..span.end]))
            .collect()
    }

    fn split_pieces(&self, text: &str, start: usize, end: usize, level: usize, out: &mut Vec<Piece>) {
        let chars = text[start..end].chars().count();
        if chars <= self.chunk_size {
            out.push(Piece { start, end, chars });
            return;
        }

        match SEPARATORS.get(level) {
            Some(separators) => {
                let mut segment_start = start;
                for boundary in split_points(&text[start..end], separators) {
                    let segment_end = start + boundary;
                    self.split_pieces(text, segment_start, segment_end, level + 1, out);
                    segment_start = segment_end;
                }
                if segment_start < end {
                    self.split_pieces(text, segment_start, end, level + 1, out);
                }
            }
            None => {
                // No natural boundary left: one piece per character.
                for (offset, ch) in text[start..end].char_indices() {
                    let piece_start = start + offset;
                    out.push(Piece {
                        start: piece_start,
                        end: piece_start + ch.len_utf8(),
                        chars: 1,
                    });
                }
            }
        }
    }

    fn merge(&self, pieces: Vec<Piece>) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut window: VecDeque<Piece> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            if total + piece.chars > self.chunk_size {
                if let (Some(first), Some(last)) = (window.front(), window.back()) {
                    spans.push(Span {
                        start: first.start,
                        end: last.end,
                    });
                }
                // Keep only a tail that fits the overlap and leaves room for `piece`.
                while total > self.chunk_overlap
                    || (total > 0 && total + piece.chars > self.chunk_size)
                {
                    match window.pop_front() {
                        Some(dropped) => total -= dropped.chars,
                        None => break,
                    }
                }
            }
            total += piece.chars;
            window.push_back(piece);
        }

        if let (Some(first), Some(last)) = (window.front(), window.back()) {
            spans.push(Span {
                start: first.start,
                end: last.end,
            });
        }

        spans
    }
}

/// Byte offsets just past each separator occurrence in `s`.
fn split_points(s: &str, separators: &[&str]) -> Vec<usize> {
    let mut points = Vec::new();
    let mut i = 0;
    while i < s.len() {
        if let Some(sep) = separators.iter().find(|sep| s[i..].starts_with(**sep)) {
            i += sep.len();
            points.push(i);
        } else {
            i += s[i..].chars().next().map_or(1, char::len_utf8);
        }
    }
    points
}

fn make_chunk(source: &str, index: i64, start: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        source: source.to_string(),
        chunk_index: index,
        start,
        text: text.to_string(),
        hash,
    }
}

/// Number of characters `next` shares with the end of `previous`.
pub fn overlap_chars(previous: &Chunk, next: &Chunk) -> usize {
    let shared = previous.end().saturating_sub(next.start);
    next.text
        .get(..shared.min(next.text.len()))
        .map_or(0, |s| s.chars().count())
}

/// Rebuild the chunked text from one document's chunks, in order, dropping overlaps.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start).min(chunk.text.len());
        out.push_str(&chunk.text[skip..]);
        covered = covered.max(chunk.end());
    }
    out
}
