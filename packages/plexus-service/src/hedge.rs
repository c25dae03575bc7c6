use std::{future::Future, time::Duration};

use plexus_domain::Candidate;

/// Tail-latency hedging for a single-shard stage.
///
/// The secondary request starts only after `hedge_after`; whichever request
/// completes first wins. This bounds the damage a single slow shard does to
/// p99 at the cost of at most one extra request per stage, and only applies
/// when exactly one shard is targeted while more than one exists (with a
/// larger fan-out, ordinary redundancy already covers the tail).
pub async fn race_hedged<P, S>(primary: P, secondary: S, hedge_after: Duration) -> Vec<Candidate>
where
	P: Future<Output = Vec<Candidate>>,
	S: Future<Output = Vec<Candidate>>,
{
	let delayed_secondary = async {
		tokio::time::sleep(hedge_after).await;

		secondary.await
	};

	tokio::select! {
		candidates = primary => candidates,
		candidates = delayed_secondary => candidates,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use plexus_domain::{CandidateOrigin, RetrieverKind};
	use uuid::Uuid;

	fn candidate(id: u128) -> Candidate {
		Candidate {
			id: Uuid::from_u128(id),
			parent_document_id: Uuid::from_u128(id),
			ordinal: 0,
			text: format!("chunk {id}"),
			score: 1.0,
			origin: CandidateOrigin {
				retriever_kind: RetrieverKind::Dense,
				embedding_version: "embed-v1".to_string(),
			},
		}
	}

	async fn delayed(results: Vec<Candidate>, delay: Duration) -> Vec<Candidate> {
		tokio::time::sleep(delay).await;

		results
	}

	#[tokio::test(start_paused = true)]
	async fn slow_primary_is_beaten_by_the_hedge() {
		let started = tokio::time::Instant::now();
		let winner = race_hedged(
			delayed(vec![candidate(1)], Duration::from_millis(200)),
			delayed(vec![candidate(2)], Duration::from_millis(30)),
			Duration::from_millis(40),
		)
		.await;
		let elapsed = started.elapsed();

		// 40 ms hedge delay + 30 ms secondary, far below the 200 ms primary.
		assert_eq!(winner[0].id, Uuid::from_u128(2));
		assert!(elapsed >= Duration::from_millis(70));
		assert!(elapsed < Duration::from_millis(200), "elapsed {elapsed:?}");
	}

	#[tokio::test(start_paused = true)]
	async fn fast_primary_wins_before_the_hedge_fires() {
		let started = tokio::time::Instant::now();
		let winner = race_hedged(
			delayed(vec![candidate(1)], Duration::from_millis(10)),
			delayed(vec![candidate(2)], Duration::from_millis(10)),
			Duration::from_millis(40),
		)
		.await;
		let elapsed = started.elapsed();

		assert_eq!(winner[0].id, Uuid::from_u128(1));
		assert!(elapsed < Duration::from_millis(40));
	}
}
