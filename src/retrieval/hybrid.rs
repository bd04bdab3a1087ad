//! C12: Hybrid Retriever (§4.12).
//!
//! Reciprocal Rank Fusion is the default; `convex_fusion` offers a
//! min-max-normalized weighted-sum fusion as the alternate
//! `FusionStrategy::ConvexCombination`, an equally valid fusion law.

use std::collections::HashMap;

use uuid::Uuid;

use super::ScoredChunk;

/// `score(id) = Σ 1 / (rrf_k + rank + 1)` over whichever of `semantic`/
/// `keyword` the id appears in, rank 0-based. Ties broken by semantic rank
/// then keyword rank (§4.12).
pub fn reciprocal_rank_fusion(
    semantic: &[ScoredChunk],
    keyword: &[ScoredChunk],
    rrf_k: u32,
    top_k: usize,
) -> Vec<ScoredChunk> {
    let mut fused: HashMap<Uuid, f32> = HashMap::new();
    let mut semantic_rank: HashMap<Uuid, usize> = HashMap::new();
    let mut keyword_rank: HashMap<Uuid, usize> = HashMap::new();

    for (rank, item) in semantic.iter().enumerate() {
        *fused.entry(item.chunk_id).or_insert(0.0) += 1.0 / (rrf_k as f32 + rank as f32 + 1.0);
        semantic_rank.insert(item.chunk_id, rank);
    }
    for (rank, item) in keyword.iter().enumerate() {
        *fused.entry(item.chunk_id).or_insert(0.0) += 1.0 / (rrf_k as f32 + rank as f32 + 1.0);
        keyword_rank.insert(item.chunk_id, rank);
    }

    let mut results: Vec<ScoredChunk> = fused
        .into_iter()
        .map(|(chunk_id, score)| ScoredChunk { chunk_id, score })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_rank = semantic_rank.get(&a.chunk_id).copied().unwrap_or(usize::MAX);
                let b_rank = semantic_rank.get(&b.chunk_id).copied().unwrap_or(usize::MAX);
                a_rank.cmp(&b_rank)
            })
            .then_with(|| {
                let a_rank = keyword_rank.get(&a.chunk_id).copied().unwrap_or(usize::MAX);
                let b_rank = keyword_rank.get(&b.chunk_id).copied().unwrap_or(usize::MAX);
                a_rank.cmp(&b_rank)
            })
    });
    results.truncate(top_k);
    results
}

fn min_max_normalize(scores: &[ScoredChunk]) -> HashMap<Uuid, f32> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let min = scores.iter().map(|s| s.score).fold(f32::INFINITY, f32::min);
    let max = scores.iter().map(|s| s.score).fold(f32::NEG_INFINITY, f32::max);
    let range = (max - min).max(f32::EPSILON);
    scores
        .iter()
        .map(|s| (s.chunk_id, (s.score - min) / range))
        .collect()
}

/// Alternate fusion: weighted sum of min-max-normalized scores
/// (equal 0.5/0.5 weighting).
pub fn convex_fusion(semantic: &[ScoredChunk], keyword: &[ScoredChunk], top_k: usize) -> Vec<ScoredChunk> {
    let sem_norm = min_max_normalize(semantic);
    let kw_norm = min_max_normalize(keyword);
    let mut ids: Vec<Uuid> = sem_norm.keys().chain(kw_norm.keys()).copied().collect();
    ids.sort();
    ids.dedup();

    let mut results: Vec<ScoredChunk> = ids
        .into_iter()
        .map(|chunk_id| {
            let s = sem_norm.get(&chunk_id).copied().unwrap_or(0.0);
            let k = kw_norm.get(&chunk_id).copied().unwrap_or(0.0);
            ScoredChunk {
                chunk_id,
                score: 0.5 * s + 0.5 * k,
            }
        })
        .collect();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(top_k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_in_both_lists_outrank_single_list_items() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let semantic = vec![
            ScoredChunk { chunk_id: a, score: 0.9 },
            ScoredChunk { chunk_id: b, score: 0.8 },
        ];
        let keyword = vec![
            ScoredChunk { chunk_id: a, score: 5.0 },
            ScoredChunk { chunk_id: c, score: 4.0 },
        ];
        let fused = reciprocal_rank_fusion(&semantic, &keyword, 60, 10);
        assert_eq!(fused[0].chunk_id, a);
    }

    #[test]
    fn respects_top_k_truncation() {
        let items: Vec<ScoredChunk> = (0..10)
            .map(|i| ScoredChunk {
                chunk_id: Uuid::new_v4(),
                score: i as f32,
            })
            .collect();
        let fused = reciprocal_rank_fusion(&items, &[], 60, 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn convex_fusion_blends_normalized_scores() {
        let a = Uuid::new_v4();
        let semantic = vec![ScoredChunk { chunk_id: a, score: 1.0 }];
        let keyword = vec![ScoredChunk { chunk_id: a, score: 1.0 }];
        let fused = convex_fusion(&semantic, &keyword, 10);
        assert_eq!(fused[0].chunk_id, a);
    }
}
