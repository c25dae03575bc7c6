use ahash::AHashMap;
use uuid::Uuid;

use plexus_domain::{
	Candidate, CandidateOrigin, FusionAlgorithm, RetrieverKind, RollingSloWindow, dedupe_stage,
	fuse, mmr_select,
};

fn candidate(id: u128, score: f64, kind: RetrieverKind) -> Candidate {
	Candidate {
		id: Uuid::from_u128(id),
		parent_document_id: Uuid::from_u128(id + 1_000),
		ordinal: id as i32,
		text: format!("retrieval chunk {id}"),
		score,
		origin: CandidateOrigin { retriever_kind: kind, embedding_version: "embed-v1".to_string() },
	}
}

#[test]
fn fused_output_is_stable_across_repeated_runs() {
	let dense = dedupe_stage(vec![
		candidate(1, 0.91, RetrieverKind::Dense),
		candidate(2, 0.88, RetrieverKind::Dense),
		candidate(3, 0.70, RetrieverKind::Dense),
		candidate(2, 0.40, RetrieverKind::Dense),
	]);
	let lexical = dedupe_stage(vec![
		candidate(4, 11.0, RetrieverKind::Lexical),
		candidate(2, 9.0, RetrieverKind::Lexical),
	]);
	let first = fuse(&[dense.clone(), lexical.clone()], FusionAlgorithm::Rrf { k: 60.0 }, 8);

	for _ in 0..16 {
		let again = fuse(&[dense.clone(), lexical.clone()], FusionAlgorithm::Rrf { k: 60.0 }, 8);

		assert_eq!(first, again);
	}

	assert_eq!(first[0].id, Uuid::from_u128(2));
}

#[test]
fn fusion_then_mmr_keeps_top_k_bounded_and_diverse() {
	let stage = dedupe_stage(vec![
		candidate(1, 0.95, RetrieverKind::Dense),
		candidate(2, 0.94, RetrieverKind::Dense),
		candidate(3, 0.60, RetrieverKind::Dense),
	]);
	let fused = fuse(&[stage], FusionAlgorithm::Rrf { k: 60.0 }, 8);
	let mut vectors = AHashMap::new();

	vectors.insert(Uuid::from_u128(1), vec![1.0_f32, 0.0]);
	vectors.insert(Uuid::from_u128(2), vec![1.0_f32, 0.001]);
	vectors.insert(Uuid::from_u128(3), vec![0.0_f32, 1.0]);

	let picked = mmr_select(&[1.0_f32, 0.0], fused, &vectors, 0.5, 2);
	let ids: Vec<Uuid> = picked.iter().map(|c| c.id).collect();

	assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(3)]);
}

#[test]
fn slo_window_reflects_mixed_outcomes() {
	let window = RollingSloWindow::new(64);

	for _ in 0..30 {
		window.observe(45.0, false, false);
	}

	window.observe(400.0, true, false);
	window.observe(5.0, false, true);

	let snapshot = window.snapshot();

	assert_eq!(snapshot.sample_count, 32);
	assert!(snapshot.error_rate > 0.0);
	assert!(snapshot.unknown_rate > 0.0);
	assert!(snapshot.p95_latency_ms >= 45.0);
}
