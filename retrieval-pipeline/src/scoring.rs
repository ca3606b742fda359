use std::{cmp::Ordering, collections::HashMap};

use common::utils::config::FusionWeightsConfig;

use crate::candidate::{RetrievalCandidate, Scores};

pub fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Normalizes raw scores from one source into [0, 1] before fusion, so no
/// source dominates just because its raw scale is wider. A single-valued or
/// constant slice maps to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

/// Linear fusion of normalized subscores. The table weight deliberately
/// outweighs the others: an exact table hit should beat any prose paraphrase
/// of the same figure. Candidates corroborated by two or more sources get a
/// small bonus on top.
pub fn fuse_scores(scores: &Scores, weights: &FusionWeightsConfig) -> f32 {
    let vector = scores.vector.unwrap_or(0.0);
    let graph = scores.graph.unwrap_or(0.0);
    let table = scores.table.unwrap_or(0.0);

    let mut fused = vector * weights.vector + graph * weights.graph + table * weights.table;

    let signals_present = scores
        .vector
        .iter()
        .chain(scores.graph.iter())
        .chain(scores.table.iter())
        .count();
    if signals_present >= 2 {
        fused += weights.corroboration_bonus;
    }

    fused.max(0.0)
}

/// Dedups incoming candidates into the accumulator by chunk id. A chunk seen
/// by several retrievers keeps one entry carrying the union of source tags
/// and the best subscore per source.
pub fn merge_candidates(
    target: &mut HashMap<String, RetrievalCandidate>,
    incoming: Vec<RetrievalCandidate>,
) {
    for candidate in incoming {
        let id = candidate.chunk.id.clone();
        match target.entry(id) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if let Some(score) = candidate.scores.vector {
                    existing.scores.vector =
                        Some(existing.scores.vector.map_or(score, |s| s.max(score)));
                }
                if let Some(score) = candidate.scores.graph {
                    existing.scores.graph =
                        Some(existing.scores.graph.map_or(score, |s| s.max(score)));
                }
                if let Some(score) = candidate.scores.table {
                    existing.scores.table =
                        Some(existing.scores.table.map_or(score, |s| s.max(score)));
                }
                for source in candidate.sources {
                    existing.tag(source);
                }
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(candidate);
            }
        }
    }
}

/// Deterministic ranking: fused score, then vector similarity, then chunk id.
/// Equal inputs always produce the same order.
pub fn sort_candidates(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.scores
                    .vector
                    .unwrap_or(0.0)
                    .partial_cmp(&a.scores.vector.unwrap_or(0.0))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}
