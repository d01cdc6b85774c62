//! Deterministic text splitting.
//!
//! Documents are split into semantic segments bounded by a character budget,
//! then a sliding character overlap is applied so spans around chunk
//! boundaries stay visible to retrieval. Identical input text always yields
//! the identical chunk sequence, which is what makes re-processing and
//! fingerprint-based dedupe safe.

use semchunk_rs::Chunker;

/// Split `text` into an ordered chunk sequence.
///
/// - `chunk_size` is a hard upper bound on the character count per chunk.
/// - `overlap` characters from the tail of the previous chunk are prepended
///   to each following chunk; when the combined text exceeds the budget it is
///   trimmed from the start so the current chunk is never truncated.
///
/// Returns an empty vector when the input is all whitespace.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let chunker = Chunker::new(chunk_size, Box::new(|segment: &str| segment.chars().count()));
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap)
}

/// Carry a character-limited overlap between the tail of the previous chunk
/// and the current one, keeping every result within `chunk_size` characters.
fn apply_overlap(chunks: Vec<String>, chunk_size: usize, overlap: usize) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 || chunks.is_empty() {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut iter = chunks.into_iter();
    let Some(mut previous) = iter.next() else {
        return Vec::new();
    };
    overlapped.push(previous.clone());

    for current in iter {
        let tail = tail_chars(&previous, effective_overlap).trim_start();
        let mut combined = String::with_capacity(tail.len() + current.len() + 1);
        if !tail.is_empty() {
            combined.push_str(tail);
            if !tail.ends_with(char::is_whitespace) && !current.starts_with(char::is_whitespace) {
                combined.push(' ');
            }
        }
        combined.push_str(&current);
        overlapped.push(trim_start_to_budget(&combined, chunk_size).to_string());
        previous = current;
    }

    overlapped
}

/// Last `limit` characters of `text`, respecting char boundaries.
fn tail_chars(text: &str, limit: usize) -> &str {
    if limit == 0 {
        return "";
    }
    match text.char_indices().rev().nth(limit - 1) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}

/// Drop characters from the start of `text` until it fits the budget.
fn trim_start_to_budget(text: &str, budget: usize) -> &str {
    let length = text.chars().count();
    if length <= budget {
        return text;
    }
    let excess = length - budget;
    match text.char_indices().nth(excess) {
        Some((index, _)) => text[index..].trim_start(),
        None => "",
    }
}
