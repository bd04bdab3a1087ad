//! C13: MMR Selector (§4.13).
//!
//! Pure vector arithmetic, no external calls: candidate vectors are
//! expected to already be in hand (via vector-store metadata or a bulk
//! `get_by_ids` fetch), never re-queried one at a time.

use uuid::Uuid;

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MmrSelection {
    pub chunk_id: Uuid,
    pub relevance: f32,
}

/// Selects up to `final_k` candidates maximizing relevance while
/// penalizing similarity to already-selected items. First pick is the
/// most relevant; each subsequent pick maximizes
/// `λ·cos(q,v) − (1−λ)·max_{selected} cos(v,v_j)`.
pub fn select(candidates: &[(Uuid, Vec<f32>)], query_vector: &[f32], lambda: f32, final_k: usize) -> Vec<MmrSelection> {
    if candidates.is_empty() || final_k == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates.iter().map(|(_, v)| cosine(query_vector, v)).collect();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::new();

    while !remaining.is_empty() && selected.len() < final_k {
        let best = if selected.is_empty() {
            remaining
                .iter()
                .copied()
                .max_by(|&a, &b| relevance[a].partial_cmp(&relevance[b]).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap()
        } else {
            remaining
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    let score_a = mmr_score(a, &selected, candidates, &relevance, lambda);
                    let score_b = mmr_score(b, &selected, candidates, &relevance, lambda);
                    score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap()
        };
        selected.push(best);
        remaining.retain(|&i| i != best);
    }

    selected
        .into_iter()
        .map(|i| MmrSelection {
            chunk_id: candidates[i].0,
            relevance: relevance[i],
        })
        .collect()
}

fn mmr_score(
    candidate: usize,
    selected: &[usize],
    candidates: &[(Uuid, Vec<f32>)],
    relevance: &[f32],
    lambda: f32,
) -> f32 {
    let max_sim = selected
        .iter()
        .map(|&j| cosine(&candidates[candidate].1, &candidates[j].1))
        .fold(f32::NEG_INFINITY, f32::max);
    lambda * relevance[candidate] - (1.0 - lambda) * max_sim
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pick_is_most_relevant() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let candidates = vec![(a, vec![1.0, 0.0]), (b, vec![0.0, 1.0])];
        let selection = select(&candidates, &[1.0, 0.0], 0.5, 2);
        assert_eq!(selection[0].chunk_id, a);
    }

    #[test]
    fn redundant_candidate_is_penalized() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        // b is a near-duplicate of a; c is distinct but slightly less relevant.
        let candidates = vec![
            (a, vec![1.0, 0.0]),
            (b, vec![0.99, 0.01]),
            (c, vec![0.6, 0.6]),
        ];
        let selection = select(&candidates, &[1.0, 0.0], 0.5, 2);
        assert_eq!(selection.len(), 2);
        assert_eq!(selection[0].chunk_id, a);
        assert_eq!(selection[1].chunk_id, c);
    }

    #[test]
    fn final_k_caps_selection_size() {
        let candidates: Vec<(Uuid, Vec<f32>)> = (0..5).map(|i| (Uuid::new_v4(), vec![i as f32, 1.0])).collect();
        let selection = select(&candidates, &[1.0, 0.0], 0.5, 2);
        assert_eq!(selection.len(), 2);
    }
}
