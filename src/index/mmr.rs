//! Maximal marginal relevance selection over scored search hits.
//!
//! MMR re-ranks a wide candidate pool so the selected chunks balance
//! similarity to the question against similarity to each other, trading a
//! little relevance for coverage across the corpus.

use crate::index::types::ScoredChunk;

/// Select up to `k` candidates by maximal marginal relevance.
///
/// `lambda` weights relevance against diversity: 1.0 degenerates to plain
/// top-k, 0.0 picks maximally dissimilar chunks. Candidates without a stored
/// vector cannot participate in the diversity term and are skipped after the
/// first pick.
pub fn select_mmr(
    query: &[f32],
    candidates: Vec<ScoredChunk>,
    k: usize,
    lambda: f32,
) -> Vec<ScoredChunk> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let mut remaining: Vec<ScoredChunk> = candidates;
    let mut selected: Vec<ScoredChunk> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_index: Option<usize> = None;
        let mut best_score = f32::NEG_INFINITY;

        for (index, candidate) in remaining.iter().enumerate() {
            let Some(vector) = candidate.vector.as_deref() else {
                if selected.is_empty() {
                    // Without vectors we can still honor relevance order for
                    // the first pick.
                    if candidate.score > best_score {
                        best_score = candidate.score;
                        best_index = Some(index);
                    }
                }
                continue;
            };

            let relevance = cosine_similarity(query, vector);
            let redundancy = selected
                .iter()
                .filter_map(|chosen| chosen.vector.as_deref())
                .map(|chosen| cosine_similarity(vector, chosen))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if redundancy.is_finite() {
                redundancy
            } else {
                0.0
            };

            let marginal = lambda * relevance - (1.0 - lambda) * redundancy;
            if marginal > best_score {
                best_score = marginal;
                best_index = Some(index);
            }
        }

        match best_index {
            Some(index) => selected.push(remaining.swap_remove(index)),
            None => break,
        }
    }

    selected
}

/// Cosine similarity between two vectors; 0.0 when either has zero norm or
/// the dimensions disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
