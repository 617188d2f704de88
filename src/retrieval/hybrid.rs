//! Hybrid lexical + vector rank merging

use super::providers::TranscriptHit;
use crate::config::HybridWeights;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Join lexical and vector hits by item id and compute combined scores.
///
/// `combined = text_weight * text_rank + vector_weight * vector_similarity`
/// when both sides saw the item. One-sided items keep their single score.
/// Output is sorted by combined score descending, then vector similarity,
/// then lexical rank; the sort is stable so unscored items keep arrival
/// order.
pub fn merge_hybrid(
    text_hits: Vec<TranscriptHit>,
    vector_hits: Vec<TranscriptHit>,
    weights: HybridWeights,
) -> Vec<TranscriptHit> {
    let mut merged: Vec<TranscriptHit> = text_hits;
    let mut by_id: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, hit)| (hit.id.clone(), i))
        .collect();

    for vector_hit in vector_hits {
        match by_id.get(&vector_hit.id) {
            Some(&i) => {
                merged[i].vector_similarity = vector_hit.vector_similarity;
            }
            None => {
                by_id.insert(vector_hit.id.clone(), merged.len());
                merged.push(vector_hit);
            }
        }
    }

    sort_hits(&mut merged, weights);
    merged
}

/// Recompute combined scores and sort in place
pub fn sort_hits(hits: &mut [TranscriptHit], weights: HybridWeights) {
    for hit in hits.iter_mut() {
        if let (Some(rank), Some(similarity)) = (hit.text_rank, hit.vector_similarity) {
            hit.combined = Some(weights.text * rank + weights.vector * similarity);
        }
    }

    hits.sort_by(|a, b| compare_desc(score_key(b), score_key(a)));
}

fn score_key(hit: &TranscriptHit) -> (Option<f32>, Option<f32>, Option<f32>) {
    (
        hit.combined,
        hit.vector_similarity,
        hit.text_rank,
    )
}

fn compare_desc(
    a: (Option<f32>, Option<f32>, Option<f32>),
    b: (Option<f32>, Option<f32>, Option<f32>),
) -> Ordering {
    cmp_opt(a.0, b.0)
        .then_with(|| cmp_opt(a.1, b.1))
        .then_with(|| cmp_opt(a.2, b.2))
}

fn cmp_opt(a: Option<f32>, b: Option<f32>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Drop vector-similarity-only hits below the minimum similarity. Hits that
/// also carry a lexical rank survive regardless.
pub fn apply_similarity_threshold(hits: Vec<TranscriptHit>, threshold: f32) -> Vec<TranscriptHit> {
    hits.into_iter()
        .filter(|hit| match (hit.text_rank, hit.vector_similarity) {
            (None, Some(similarity)) => similarity >= threshold,
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, text_rank: Option<f32>, vector_similarity: Option<f32>) -> TranscriptHit {
        TranscriptHit {
            id: id.to_string(),
            title: format!("title-{}", id),
            snippet: "snippet".to_string(),
            text_rank,
            vector_similarity,
            combined: None,
        }
    }

    fn weights() -> HybridWeights {
        HybridWeights {
            text: 0.3,
            vector: 0.7,
        }
    }

    #[test]
    fn test_combined_score_ranks_vector_heavy_item_first() {
        let text = vec![hit("a", Some(0.9), None), hit("b", Some(0.1), None)];
        let vector = vec![hit("a", None, Some(0.1)), hit("b", None, Some(0.9))];

        let merged = merge_hybrid(text, vector, weights());

        // B combines to 0.66, A to 0.34
        assert_eq!(merged[0].id, "b");
        assert!((merged[0].combined.unwrap() - 0.66).abs() < 1e-6);
        assert!((merged[1].combined.unwrap() - 0.34).abs() < 1e-6);
    }

    #[test]
    fn test_one_sided_items_survive_merge() {
        let text = vec![hit("only-text", Some(0.8), None)];
        let vector = vec![hit("only-vector", None, Some(0.7))];

        let merged = merge_hybrid(text, vector, weights());
        assert_eq!(merged.len(), 2);
        // No combined score: vector similarity outranks text-only
        assert_eq!(merged[0].id, "only-vector");
    }

    #[test]
    fn test_combined_outranks_single_scores() {
        let text = vec![hit("both", Some(0.2), None), hit("text", Some(0.99), None)];
        let vector = vec![hit("both", None, Some(0.2)), hit("vec", None, Some(0.99))];

        let merged = merge_hybrid(text, vector, weights());
        assert_eq!(merged[0].id, "both");
    }

    #[test]
    fn test_similarity_threshold_drops_vector_only_noise() {
        let hits = vec![
            hit("keep", None, Some(0.8)),
            hit("drop", None, Some(0.3)),
            hit("lexical", Some(0.5), Some(0.3)),
        ];

        let kept = apply_similarity_threshold(hits, 0.55);
        let ids: Vec<&str> = kept.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["keep", "lexical"]);
    }
}
