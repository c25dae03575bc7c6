use ahash::{AHashMap, AHashSet};
use uuid::Uuid;

use crate::candidate::{Candidate, cmp_f64_desc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RerankStrategy {
	/// Maximal marginal relevance; trades pure relevance for diversity.
	Mmr { lambda: f64 },
	/// Cheap cross-score proxy: cosine blended with token overlap.
	Hybrid { alpha: f64 },
	None,
}

pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> Option<f64> {
	if lhs.is_empty() || lhs.len() != rhs.len() {
		return None;
	}

	let mut dot = 0.0_f64;
	let mut lhs_norm = 0.0_f64;
	let mut rhs_norm = 0.0_f64;

	for (l, r) in lhs.iter().zip(rhs.iter()) {
		dot += f64::from(*l) * f64::from(*r);
		lhs_norm += f64::from(*l) * f64::from(*l);
		rhs_norm += f64::from(*r) * f64::from(*r);
	}

	if lhs_norm <= f64::EPSILON || rhs_norm <= f64::EPSILON {
		return None;
	}

	Some((dot / (lhs_norm.sqrt() * rhs_norm.sqrt())).clamp(-1.0, 1.0))
}

/// Share of the query's unique terms that also occur in the text.
pub fn token_overlap(query: &str, text: &str) -> f64 {
	let query_terms: AHashSet<String> = terms(query).collect();

	if query_terms.is_empty() {
		return 0.0;
	}

	let text_terms: AHashSet<String> = terms(text).collect();
	let matched = query_terms.iter().filter(|term| text_terms.contains(*term)).count();

	matched as f64 / query_terms.len() as f64
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
	text.split(|ch: char| !ch.is_alphanumeric())
		.filter(|term| !term.is_empty())
		.map(|term| term.to_lowercase())
}

/// Iteratively selects the candidate maximizing
/// `lambda * relevance - (1 - lambda) * max_similarity_to_selected`.
///
/// Relevance is query-candidate cosine; candidates whose embedding is missing
/// fall back to their rank-normalized retrieval position so they are not
/// silently dropped.
pub fn mmr_select(
	query_vector: &[f32],
	candidates: Vec<Candidate>,
	vectors: &AHashMap<Uuid, Vec<f32>>,
	lambda: f64,
	top_k: usize,
) -> Vec<Candidate> {
	if candidates.is_empty() || top_k == 0 {
		return Vec::new();
	}

	let total = candidates.len();
	let relevance: Vec<f64> = candidates
		.iter()
		.enumerate()
		.map(|(position, candidate)| {
			vectors
				.get(&candidate.id)
				.and_then(|vec| cosine_similarity(query_vector, vec))
				.unwrap_or_else(|| rank_normalize(position + 1, total))
		})
		.collect();
	let mut remaining: Vec<usize> = (0..candidates.len()).collect();
	let mut selected: Vec<usize> = Vec::new();

	while selected.len() < top_k && !remaining.is_empty() {
		let mut best_pos = 0;
		let mut best_score = f64::NEG_INFINITY;

		for (pos, idx) in remaining.iter().copied().enumerate() {
			let redundancy = selected
				.iter()
				.filter_map(|selected_idx| {
					let lhs = vectors.get(&candidates[idx].id)?;
					let rhs = vectors.get(&candidates[*selected_idx].id)?;

					cosine_similarity(lhs, rhs)
				})
				.fold(0.0_f64, f64::max);
			let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;

			if score > best_score {
				best_score = score;
				best_pos = pos;
			}
		}

		let idx = remaining.remove(best_pos);

		selected.push(idx);
	}

	selected
		.into_iter()
		.map(|idx| {
			let mut candidate = candidates[idx].clone();

			candidate.score = relevance[idx];

			candidate
		})
		.collect()
}

/// Reorders by `alpha * cosine(query, candidate) + (1 - alpha) * token_overlap`.
pub fn hybrid_rerank(
	query_vector: &[f32],
	query_text: &str,
	candidates: Vec<Candidate>,
	vectors: &AHashMap<Uuid, Vec<f32>>,
	alpha: f64,
	top_k: usize,
) -> Vec<Candidate> {
	let mut rescored: Vec<Candidate> = candidates
		.into_iter()
		.map(|mut candidate| {
			let cosine = vectors
				.get(&candidate.id)
				.and_then(|vec| cosine_similarity(query_vector, vec))
				.unwrap_or(0.0);
			let overlap = token_overlap(query_text, &candidate.text);

			candidate.score = alpha * cosine + (1.0 - alpha) * overlap;

			candidate
		})
		.collect();

	rescored.sort_by(|left, right| {
		cmp_f64_desc(left.score, right.score).then_with(|| left.id.cmp(&right.id))
	});
	rescored.truncate(top_k);

	rescored
}

fn rank_normalize(rank: usize, total: usize) -> f64 {
	if total <= 1 {
		return 1.0;
	}

	let denom = (total - 1) as f64;
	let pos = rank.saturating_sub(1) as f64;

	(1.0 - pos / denom).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::candidate::{CandidateOrigin, RetrieverKind};

	fn candidate(id: u128, text: &str) -> Candidate {
		Candidate {
			id: Uuid::from_u128(id),
			parent_document_id: Uuid::from_u128(id + 1_000),
			ordinal: 0,
			text: text.to_string(),
			score: 0.0,
			origin: CandidateOrigin {
				retriever_kind: RetrieverKind::Dense,
				embedding_version: "embed-v1".to_string(),
			},
		}
	}

	#[test]
	fn cosine_rejects_mismatched_or_zero_vectors() {
		assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).is_none());
		assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());

		let same = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).expect("cosine");

		assert!((same - 1.0).abs() < 1e-9);
	}

	#[test]
	fn token_overlap_counts_unique_query_terms() {
		let overlap = token_overlap("shard routing latency", "latency budget for shard fan-out");

		assert!((overlap - 2.0 / 3.0).abs() < 1e-9);
		assert_eq!(token_overlap("", "anything"), 0.0);
	}

	#[test]
	fn mmr_prefers_diversity_over_near_duplicates() {
		let query = vec![1.0_f32, 0.0];
		let mut vectors = AHashMap::new();

		// Id 1 and id 2 are nearly identical; id 3 is orthogonal but relevant
		// enough to beat a redundant second pick at lambda 0.5.
		vectors.insert(Uuid::from_u128(1), vec![1.0_f32, 0.0]);
		vectors.insert(Uuid::from_u128(2), vec![0.999_f32, 0.01]);
		vectors.insert(Uuid::from_u128(3), vec![0.6_f32, 0.8]);

		let candidates =
			vec![candidate(1, "alpha"), candidate(2, "alpha prime"), candidate(3, "beta")];
		let picked = mmr_select(&query, candidates, &vectors, 0.5, 2);
		let ids: Vec<Uuid> = picked.iter().map(|c| c.id).collect();

		assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(3)]);
	}

	#[test]
	fn mmr_returns_at_most_top_k() {
		let query = vec![1.0_f32, 0.0];
		let vectors = AHashMap::new();
		let candidates = vec![candidate(1, "a"), candidate(2, "b"), candidate(3, "c")];
		let picked = mmr_select(&query, candidates, &vectors, 0.75, 2);

		assert_eq!(picked.len(), 2);
	}

	#[test]
	fn hybrid_blends_cosine_and_overlap() {
		let query = vec![1.0_f32, 0.0];
		let mut vectors = AHashMap::new();

		vectors.insert(Uuid::from_u128(1), vec![1.0_f32, 0.0]);
		vectors.insert(Uuid::from_u128(2), vec![0.0_f32, 1.0]);

		let candidates =
			vec![candidate(2, "shard routing shard"), candidate(1, "unrelated words")];
		let reranked = hybrid_rerank(&query, "shard routing", candidates, &vectors, 0.7, 2);

		// Id 1: 0.7 * 1.0 + 0.3 * 0.0 = 0.70; id 2: 0.7 * 0.0 + 0.3 * 1.0 = 0.30.
		assert_eq!(reranked[0].id, Uuid::from_u128(1));
		assert!((reranked[0].score - 0.7).abs() < 1e-9);
		assert!((reranked[1].score - 0.3).abs() < 1e-9);
	}
}
