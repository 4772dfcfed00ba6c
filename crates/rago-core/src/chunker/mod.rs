//! Splits plain text into ordered, overlapping chunks.

use std::str::FromStr;

use crate::error::{RagoError, Result};

/// One chunk produced by [`chunk`], in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub index: usize,
}

/// Selects the atomic unit packed into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMethod {
    Sentence,
    Paragraph,
    Token,
}

impl FromStr for ChunkMethod {
    type Err = RagoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sentence" => Ok(Self::Sentence),
            "paragraph" => Ok(Self::Paragraph),
            "token" => Ok(Self::Token),
            other => Err(RagoError::InvalidInput(format!(
                "unknown chunk method: {other}"
            ))),
        }
    }
}

enum OverlapUnit {
    Chars,
    Words,
}

/// Splits `content` into chunks of at most `size` characters (best-effort, see
/// the oversized-unit fallback), seeding each rollover with an overlap of the
/// previous chunk.
pub fn chunk(content: &str, method: ChunkMethod, size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if size == 0 {
        return Err(RagoError::InvalidInput("chunk size must be positive".into()));
    }
    if overlap >= size {
        return Err(RagoError::InvalidInput(
            "chunk overlap must be strictly less than size".into(),
        ));
    }
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let raw = match method {
        ChunkMethod::Sentence => {
            pack_units(split_sentences(content), size, overlap, " ", OverlapUnit::Chars)
        }
        ChunkMethod::Paragraph => {
            pack_units(split_paragraphs(content), size, overlap, "\n\n", OverlapUnit::Chars)
        }
        ChunkMethod::Token => pack_units(split_words(content), size, overlap, " ", OverlapUnit::Words),
    };

    let mut chunks = Vec::with_capacity(raw.len());
    for text in raw {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            chunks.push(Chunk {
                content: trimmed.to_string(),
                index: chunks.len(),
            });
        }
    }
    Ok(chunks)
}

fn split_sentences(content: &str) -> Vec<String> {
    const TERMINATORS: &[char] = &['.', '!', '?', '。', '!', '?'];
    let chars: Vec<(usize, char)> = content.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let ch = chars[i].1;
        if TERMINATORS.contains(&ch) {
            let mut j = i + 1;
            while j < chars.len() && matches!(chars[j].1, '"' | '\'' | ')' ) {
                j += 1;
            }
            let end_byte = if j < chars.len() { chars[j].0 } else { content.len() };
            sentences.push(content[start..end_byte].to_string());
            start = end_byte;
            i = j;
            continue;
        }
        i += 1;
    }
    if start < content.len() {
        sentences.push(content[start..].to_string());
    }
    sentences
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_paragraphs(content: &str) -> Vec<String> {
    let bytes = content.as_bytes();
    let mut paragraphs = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let run_start = i;
            let mut j = i;
            while j < bytes.len() && bytes[j] == b'\n' {
                j += 1;
            }
            if j - run_start >= 2 {
                paragraphs.push(content[start..run_start].to_string());
                start = j;
            }
            i = j;
            continue;
        }
        i += 1;
    }
    if start < content.len() {
        paragraphs.push(content[start..].to_string());
    }
    paragraphs
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn split_words(content: &str) -> Vec<String> {
    content.split_whitespace().map(str::to_string).collect()
}

/// Greedily packs atomic units into chunks of at most `size` bytes, seeding
/// each rollover from a suffix of the previous chunk per `overlap_unit`.
fn pack_units(
    units: Vec<String>,
    size: usize,
    overlap: usize,
    separator: &str,
    overlap_unit: OverlapUnit,
) -> Vec<String> {
    let mut result = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for unit in units {
        if unit.len() > size {
            if !current.is_empty() {
                result.push(current.join(separator));
                current.clear();
                current_len = 0;
            }
            result.extend(split_oversized(&unit, size));
            continue;
        }

        let additional = if current.is_empty() {
            unit.len()
        } else {
            separator.len() + unit.len()
        };

        if !current.is_empty() && current_len + additional > size {
            let seed = match overlap_unit {
                OverlapUnit::Chars => overlap_char_suffix(&current.join(separator), overlap),
                OverlapUnit::Words => overlap_word_suffix(&current, overlap),
            };
            result.push(current.join(separator));
            current.clear();
            current_len = 0;
            if !seed.is_empty() {
                current_len = seed.len();
                current.push(seed);
            }
        }

        if current.is_empty() {
            current_len = unit.len();
        } else {
            current_len += separator.len() + unit.len();
        }
        current.push(unit);
    }

    if !current.is_empty() {
        result.push(current.join(separator));
    }
    result
}

fn overlap_char_suffix(s: &str, overlap: usize) -> String {
    if overlap == 0 || s.is_empty() {
        return String::new();
    }
    let start_raw = s.len().saturating_sub(overlap);
    let start = ceil_char_boundary(s, start_raw);
    s[start..].to_string()
}

fn overlap_word_suffix(units: &[String], overlap_words: usize) -> String {
    if overlap_words == 0 || units.is_empty() {
        return String::new();
    }
    let start = units.len().saturating_sub(overlap_words);
    units[start..].join(" ")
}

/// Finds a valid char boundary at or before `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Finds a valid char boundary at or after `index`.
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Forces a split of a single atomic unit that itself exceeds `size`, using a
/// char-boundary-safe sliding window with natural break-point search.
fn split_oversized(content: &str, size: usize) -> Vec<String> {
    if content.len() <= size {
        return vec![content.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < content.len() {
        let raw_end = (start + size).min(content.len());
        let mut end = floor_char_boundary(content, raw_end);

        if end < content.len() {
            let search_start_raw = start + (size * 70 / 100);
            let search_start = ceil_char_boundary(content, search_start_raw);
            if search_start < end {
                let region = &content[search_start..end];
                if let Some(pos) = region.rfind('\n') {
                    end = search_start + pos + 1;
                } else if let Some(pos) = region.rfind(' ') {
                    end = search_start + pos + 1;
                }
            }
        }

        end = floor_char_boundary(content, end);
        if end <= start {
            end = ceil_char_boundary(content, start + 1);
        }
        pieces.push(content[start..end].to_string());
        if end >= content.len() {
            break;
        }
        start = end;
    }
    pieces
}
