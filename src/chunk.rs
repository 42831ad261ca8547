//! Paragraph-boundary text chunker for knowledge snippets.
//!
//! Splits page text into [`Snippet`]s that respect a `max_tokens` limit.
//! Splitting happens on paragraph boundaries (`\n\n`); a single paragraph
//! longer than the limit is hard-split on the nearest line break or space.
//! Each snippet carries a SHA-256 of its text, used to skip re-ingesting
//! content that is already stored.

use sha2::{Digest, Sha256};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub index: usize,
    pub text: String,
    pub hash: String,
}

/// Split text into snippets; indices are contiguous from 0.
/// Blank input yields no snippets.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<Snippet> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current.is_empty() {
            trimmed.len()
        } else {
            current.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| Snippet {
            index,
            hash: content_hash(&text),
            text,
        })
        .collect()
}

fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            out.push(remaining.trim().to_string());
            break;
        }
        let mut limit = max_chars;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let head = &remaining[..limit];
        let split_at = head
            .rfind('\n')
            .or_else(|| head.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or_else(|| limit.max(first_char_len(remaining)));

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

fn first_char_len(s: &str) -> usize {
    s.chars().next().map(char::len_utf8).unwrap_or(0)
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
