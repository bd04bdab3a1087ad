//! C4: Chunker.
//!
//! Sentence-boundary segmentation (`unicode-segmentation`, UAX#29) first;
//! sentences longer than `MaxChunkTokens` are hard-split on exact token
//! boundaries using the configured tokenizer's offsets. Packing is greedy;
//! overlap is measured in tokens, not characters, not raw char length.

use unicode_segmentation::UnicodeSegmentation;

use crate::config::Config;
use crate::errors::{CoreError, CoreResult};
use crate::extract::CHARS_PER_ESTIMATED_PAGE;
use crate::tokenizer::TokenizerRegistry;
use crate::types::FileType;

/// One packed chunk, before the orchestrator assigns it an id and
/// `document_id`.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub content: String,
    pub token_count: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub page_number: Option<usize>,
}

#[derive(Debug, Clone)]
struct Sentence {
    text: String,
    token_count: usize,
    start_char: usize,
    end_char: usize,
}

fn char_slice(text: &str, start_char: usize, end_char: usize) -> &str {
    let start_byte = text
        .char_indices()
        .nth(start_char)
        .map(|(b, _)| b)
        .unwrap_or(text.len());
    let end_byte = text
        .char_indices()
        .nth(end_char)
        .map(|(b, _)| b)
        .unwrap_or(text.len());
    &text[start_byte..end_byte]
}

/// Sentence boundaries as char (code point) offsets into `text`.
fn segment_char_offsets(text: &str) -> Vec<(usize, usize)> {
    let mut offsets = Vec::new();
    let mut cursor = 0usize;
    for sentence in text.unicode_sentences() {
        let len_chars = sentence.chars().count();
        offsets.push((cursor, cursor + len_chars));
        cursor += len_chars;
    }
    offsets
}

fn hard_split(
    slice: &str,
    base_char_offset: usize,
    tokenizer_name: &str,
    registry: &TokenizerRegistry,
    max_tokens: usize,
) -> CoreResult<Vec<Sentence>> {
    let offsets = registry.token_offsets(tokenizer_name, slice)?;
    let mut out = Vec::new();
    for group in offsets.chunks(max_tokens.max(1)) {
        if group.is_empty() {
            continue;
        }
        let byte_start = group.first().unwrap().0;
        let byte_end = group.last().unwrap().1;
        if byte_end <= byte_start || byte_end > slice.len() {
            continue;
        }
        let piece = &slice[byte_start..byte_end];
        let start_char = base_char_offset + slice[..byte_start].chars().count();
        let end_char = base_char_offset + slice[..byte_end].chars().count();
        out.push(Sentence {
            text: piece.to_string(),
            token_count: group.len(),
            start_char,
            end_char,
        });
    }
    Ok(out)
}

fn build_sentences(
    text: &str,
    tokenizer_name: &str,
    registry: &TokenizerRegistry,
    max_tokens: usize,
) -> CoreResult<Vec<Sentence>> {
    let mut out = Vec::new();
    for (start_char, end_char) in segment_char_offsets(text) {
        let slice = char_slice(text, start_char, end_char);
        if slice.trim().is_empty() {
            continue;
        }
        let token_count = registry.count(tokenizer_name, slice)?;
        if token_count <= max_tokens {
            out.push(Sentence {
                text: slice.to_string(),
                token_count,
                start_char,
                end_char,
            });
        } else {
            out.extend(hard_split(slice, start_char, tokenizer_name, registry, max_tokens)?);
        }
    }
    Ok(out)
}

/// Maximal suffix of `prev` whose token total is closest to `overlap_tokens`
/// without exceeding it (§4.4).
fn select_overlap(prev: &[Sentence], overlap_tokens: usize) -> Vec<Sentence> {
    let mut total = 0usize;
    let mut start_idx = prev.len();
    for i in (0..prev.len()).rev() {
        let candidate = total + prev[i].token_count;
        if candidate > overlap_tokens {
            break;
        }
        total = candidate;
        start_idx = i;
    }
    prev[start_idx..].to_vec()
}

fn page_for_offset(start_char: usize, file_type: FileType, per_page_breaks: Option<&[usize]>) -> Option<usize> {
    if let Some(breaks) = per_page_breaks {
        let mut page = 1;
        for (i, b) in breaks.iter().enumerate() {
            if start_char >= *b {
                page = i + 1;
            } else {
                break;
            }
        }
        return Some(page);
    }
    match file_type {
        FileType::Pdf => None,
        FileType::Txt | FileType::Md => Some(1),
        FileType::Docx => Some(start_char / CHARS_PER_ESTIMATED_PAGE + 1),
    }
}

/// Produces the chunk sequence for one document's extracted text (§4.4).
pub fn chunk_text(
    text: &str,
    file_type: FileType,
    per_page_breaks: Option<&[usize]>,
    tokenizer_name: &str,
    registry: &TokenizerRegistry,
    cfg: &Config,
) -> CoreResult<Vec<RawChunk>> {
    if text.trim().is_empty() {
        return Err(CoreError::EmptyDocument);
    }

    let sentences = build_sentences(text, tokenizer_name, registry, cfg.max_chunk_tokens)?;
    if sentences.is_empty() {
        return Err(CoreError::EmptyDocument);
    }

    let mut chunks = Vec::new();
    let mut idx = 0usize;
    let mut prev_sentences: Vec<Sentence> = Vec::new();

    while idx < sentences.len() {
        let mut current: Vec<Sentence> = Vec::new();
        let mut current_tokens = 0usize;

        if !prev_sentences.is_empty() {
            for s in select_overlap(&prev_sentences, cfg.overlap_tokens) {
                current_tokens += s.token_count;
                current.push(s);
            }
        }

        // `idx` must advance by at least one sentence every outer
        // iteration. If the overlap seed alone is already close to
        // `max_chunk_tokens`, the first unconsumed sentence can overflow
        // the budget before anything new is packed; without a forced
        // first append `idx` would never move and this chunk would repeat
        // forever. So the overflow check only applies once the chunk has
        // grown past its overlap seed.
        let idx_before_pack = idx;
        while idx < sentences.len() {
            let next = &sentences[idx];
            let overflows = !current.is_empty() && current_tokens + next.token_count > cfg.max_chunk_tokens;
            if overflows && idx > idx_before_pack {
                break;
            }
            current_tokens += next.token_count;
            current.push(next.clone());
            idx += 1;
            if overflows {
                break;
            }
        }

        if current.is_empty() {
            break;
        }

        let start_char = current.first().unwrap().start_char;
        let end_char = current.last().unwrap().end_char;
        let content = current
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let page_number = page_for_offset(start_char, file_type, per_page_breaks);

        chunks.push(RawChunk {
            content,
            token_count: current_tokens,
            start_char,
            end_char,
            page_number,
        });
        prev_sentences = current;
    }

    Ok(chunks)
}
