use ahash::{AHashMap, AHashSet};
use uuid::Uuid;

use crate::candidate::{Candidate, cmp_f64_desc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionAlgorithm {
	/// Rank-based fusion; needs no score normalization across retrievers.
	Rrf { k: f64 },
	/// Preserve stage order, drop duplicate ids, truncate.
	Concatenate,
}

/// Collapses duplicate ids within one stage, keeping the highest-scored
/// occurrence, and re-sorts descending so rank positions are well defined.
pub fn dedupe_stage(candidates: Vec<Candidate>) -> Vec<Candidate> {
	let mut best: AHashMap<Uuid, Candidate> = AHashMap::new();

	for candidate in candidates {
		match best.get(&candidate.id) {
			Some(existing) if existing.score >= candidate.score => {},
			_ => {
				best.insert(candidate.id, candidate);
			},
		}
	}

	let mut out: Vec<Candidate> = best.into_values().collect();

	out.sort_by(|left, right| {
		cmp_f64_desc(left.score, right.score).then_with(|| left.id.cmp(&right.id))
	});

	out
}

/// Merges per-retriever stage lists into one ranked list.
///
/// Fusion math depends only on each stage's final sorted order, so the output
/// is deterministic regardless of which concurrent retriever call finished
/// first.
pub fn fuse(stages: &[Vec<Candidate>], algorithm: FusionAlgorithm, top_k: usize) -> Vec<Candidate> {
	if top_k == 0 {
		return Vec::new();
	}

	match algorithm {
		FusionAlgorithm::Rrf { k } => fuse_rrf(stages, k, top_k),
		FusionAlgorithm::Concatenate => fuse_concatenate(stages, top_k),
	}
}

fn fuse_rrf(stages: &[Vec<Candidate>], rrf_k: f64, top_k: usize) -> Vec<Candidate> {
	struct Fused {
		candidate: Candidate,
		score: f64,
	}

	let mut by_id: AHashMap<Uuid, Fused> = AHashMap::new();

	for stage in stages {
		for (position, candidate) in stage.iter().enumerate() {
			let rank = position as f64 + 1.0;
			let contribution = 1.0 / (rrf_k + rank);

			match by_id.get_mut(&candidate.id) {
				Some(existing) => {
					existing.score += contribution;
				},
				None => {
					by_id.insert(
						candidate.id,
						Fused { candidate: candidate.clone(), score: contribution },
					);
				},
			}
		}
	}

	let mut merged: Vec<Fused> = by_id.into_values().collect();

	merged.sort_by(|left, right| {
		cmp_f64_desc(left.score, right.score).then_with(|| left.candidate.id.cmp(&right.candidate.id))
	});

	merged
		.into_iter()
		.take(top_k)
		.map(|fused| {
			let mut candidate = fused.candidate;

			candidate.score = fused.score;

			candidate
		})
		.collect()
}

fn fuse_concatenate(stages: &[Vec<Candidate>], top_k: usize) -> Vec<Candidate> {
	let mut seen = AHashSet::new();
	let mut out = Vec::new();

	for stage in stages {
		for candidate in stage {
			if out.len() >= top_k {
				return out;
			}
			if seen.insert(candidate.id) {
				out.push(candidate.clone());
			}
		}
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::candidate::{CandidateOrigin, RetrieverKind};

	fn candidate(id: u128, score: f64, kind: RetrieverKind) -> Candidate {
		Candidate {
			id: Uuid::from_u128(id),
			parent_document_id: Uuid::from_u128(id + 1_000),
			ordinal: 0,
			text: format!("chunk {id}"),
			score,
			origin: CandidateOrigin {
				retriever_kind: kind,
				embedding_version: "embed-v1".to_string(),
			},
		}
	}

	#[test]
	fn stage_dedupe_keeps_highest_score() {
		let stage = vec![
			candidate(1, 0.4, RetrieverKind::Dense),
			candidate(2, 0.9, RetrieverKind::Dense),
			candidate(1, 0.7, RetrieverKind::Dense),
		];
		let deduped = dedupe_stage(stage);

		assert_eq!(deduped.len(), 2);
		assert_eq!(deduped[0].id, Uuid::from_u128(2));
		assert_eq!(deduped[1].id, Uuid::from_u128(1));
		assert_eq!(deduped[1].score, 0.7);
	}

	#[test]
	fn rrf_is_independent_of_stage_arrival_order() {
		let dense = vec![
			candidate(1, 0.9, RetrieverKind::Dense),
			candidate(2, 0.8, RetrieverKind::Dense),
			candidate(3, 0.7, RetrieverKind::Dense),
		];
		let lexical = vec![
			candidate(3, 12.0, RetrieverKind::Lexical),
			candidate(4, 8.0, RetrieverKind::Lexical),
		];
		let forward = fuse(&[dense.clone(), lexical.clone()], FusionAlgorithm::Rrf { k: 60.0 }, 10);
		let reversed = fuse(&[lexical, dense], FusionAlgorithm::Rrf { k: 60.0 }, 10);
		let forward_ids: Vec<Uuid> = forward.iter().map(|c| c.id).collect();
		let reversed_ids: Vec<Uuid> = reversed.iter().map(|c| c.id).collect();

		assert_eq!(forward_ids, reversed_ids);
		// Id 3 appears in both stages and must outrank every single-stage id.
		assert_eq!(forward_ids[0], Uuid::from_u128(3));
	}

	#[test]
	fn rrf_scores_follow_the_reciprocal_rank_formula() {
		let dense = vec![candidate(1, 0.9, RetrieverKind::Dense)];
		let lexical = vec![
			candidate(2, 3.0, RetrieverKind::Lexical),
			candidate(1, 2.0, RetrieverKind::Lexical),
		];
		let fused = fuse(&[dense, lexical], FusionAlgorithm::Rrf { k: 60.0 }, 10);
		let top = fused.iter().find(|c| c.id == Uuid::from_u128(1)).expect("id 1 fused");
		let expected = 1.0 / 61.0 + 1.0 / 62.0;

		assert!((top.score - expected).abs() < 1e-12);
	}

	#[test]
	fn rrf_ties_break_by_id_deterministically() {
		let stage_a = vec![candidate(9, 0.5, RetrieverKind::Dense)];
		let stage_b = vec![candidate(4, 0.5, RetrieverKind::Lexical)];
		let fused = fuse(&[stage_a, stage_b], FusionAlgorithm::Rrf { k: 60.0 }, 10);

		assert_eq!(fused[0].id, Uuid::from_u128(4));
		assert_eq!(fused[1].id, Uuid::from_u128(9));
	}

	#[test]
	fn concatenate_preserves_stage_order_and_truncates() {
		let stage_a = vec![
			candidate(1, 0.2, RetrieverKind::Dense),
			candidate(2, 0.1, RetrieverKind::Dense),
		];
		let stage_b = vec![
			candidate(2, 9.0, RetrieverKind::Lexical),
			candidate(3, 5.0, RetrieverKind::Lexical),
		];
		let fused = fuse(&[stage_a, stage_b], FusionAlgorithm::Concatenate, 2);
		let ids: Vec<Uuid> = fused.iter().map(|c| c.id).collect();

		assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);
	}
}
