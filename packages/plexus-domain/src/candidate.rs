use std::cmp::Ordering;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverKind {
	Dense,
	Lexical,
}

impl RetrieverKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Dense => "dense",
			Self::Lexical => "lexical",
		}
	}
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CandidateOrigin {
	pub retriever_kind: RetrieverKind,
	pub embedding_version: String,
}

/// A retrieved chunk. Produced fresh per retriever call and rescored in place
/// by fusion and reranking; never persisted.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candidate {
	pub id: Uuid,
	pub parent_document_id: Uuid,
	pub ordinal: i32,
	pub text: String,
	pub score: f64,
	pub origin: CandidateOrigin,
}

/// Descending float ordering that sinks NaN below every real score.
pub fn cmp_f64_desc(a: f64, b: f64) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn nan_scores_sort_last() {
		let mut scores = vec![0.2, f64::NAN, 0.9, 0.5];

		scores.sort_by(|a, b| cmp_f64_desc(*a, *b));

		assert_eq!(scores[0], 0.9);
		assert_eq!(scores[1], 0.5);
		assert_eq!(scores[2], 0.2);
		assert!(scores[3].is_nan());
	}
}
