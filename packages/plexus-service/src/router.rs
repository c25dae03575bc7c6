use rand::Rng;

use plexus_storage::state::ShardStateStore;

use crate::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
	All,
	SubsetByRendezvous,
	Adaptive,
}

impl RoutingStrategy {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"all" => Some(Self::All),
			"subset-by-rendezvous" => Some(Self::SubsetByRendezvous),
			"adaptive" => Some(Self::Adaptive),
			_ => None,
		}
	}
}

/// Computed once per request and discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
	pub shard_addresses: Vec<String>,
	pub consistency_error: Option<String>,
	pub shard_generations: Option<Vec<u64>>,
}

/// Decides which shards to consult for one query.
///
/// Rendezvous (highest-random-weight) hashing gives deterministic, stable
/// shard affinity per query without a central coordinator and spreads
/// distinct queries roughly evenly. The adaptive strategy adds a small
/// bounded reshuffle so skewed query distributions cannot permanently
/// hot-path one shard; true load-aware selection is an extension point.
pub struct ShardRouter {
	shard_names: Vec<String>,
	strategy: RoutingStrategy,
	fanout: u32,
	strict_consistency: bool,
	reshuffle_probability: f64,
}

impl ShardRouter {
	pub fn new(
		shard_names: Vec<String>,
		strategy: RoutingStrategy,
		fanout: u32,
		strict_consistency: bool,
		reshuffle_probability: f64,
	) -> Self {
		Self { shard_names, strategy, fanout, strict_consistency, reshuffle_probability }
	}

	pub fn shard_count(&self) -> usize {
		self.shard_names.len()
	}

	/// All shards ordered by descending rendezvous score for this query.
	pub fn ranked(&self, tenant_id: &str, normalized_query: &str) -> Vec<String> {
		let query_key = format!("{tenant_id}:{normalized_query}");
		let mut scored: Vec<(u64, &String)> = self
			.shard_names
			.iter()
			.map(|shard| (rendezvous_score(&query_key, shard), shard))
			.collect();

		scored.sort_by(|left, right| right.0.cmp(&left.0).then_with(|| left.1.cmp(right.1)));

		scored.into_iter().map(|(_, shard)| shard.clone()).collect()
	}

	/// The shard that owns a document's chunks, for backfill writes.
	pub fn shard_for_document(&self, document_key: &str) -> Option<String> {
		let mut best: Option<(u64, &String)> = None;

		for shard in &self.shard_names {
			let score = rendezvous_score(document_key, shard);

			if best.map(|(current, _)| score > current).unwrap_or(true) {
				best = Some((score, shard));
			}
		}

		best.map(|(_, shard)| shard.clone())
	}

	pub fn select(&self, tenant_id: &str, normalized_query: &str, fanout: u32) -> Vec<String> {
		if self.shard_names.len() <= 1 {
			return self.shard_names.clone();
		}

		match self.strategy {
			RoutingStrategy::All => self.shard_names.clone(),
			RoutingStrategy::SubsetByRendezvous => {
				let ranked = self.ranked(tenant_id, normalized_query);

				ranked.into_iter().take(fanout.max(1) as usize).collect()
			},
			RoutingStrategy::Adaptive => {
				let ranked = self.ranked(tenant_id, normalized_query);
				let take = fanout.max(1) as usize;
				let mut selected: Vec<String> = ranked.iter().take(take).cloned().collect();

				if ranked.len() > take
					&& rand::rng().random_bool(self.reshuffle_probability.clamp(0.0, 0.5))
					&& let Some(last) = selected.last_mut()
				{
					*last = ranked[take].clone();
				}

				selected
			},
		}
	}

	/// Routes one request, optionally verifying cross-shard generation
	/// agreement. On disagreement the decision carries no addresses; the
	/// pipeline must answer with an empty, flagged result rather than merge
	/// data from different index snapshots.
	pub async fn route(
		&self,
		tenant_id: &str,
		normalized_query: &str,
		fanout: u32,
		shard_states: &dyn ShardStateStore,
	) -> ServiceResult<RoutingDecision> {
		let selected = self.select(tenant_id, normalized_query, fanout);

		if selected.len() <= 1 || !self.strict_consistency {
			return Ok(RoutingDecision {
				shard_addresses: selected,
				consistency_error: None,
				shard_generations: None,
			});
		}

		let mut generations = Vec::with_capacity(selected.len());

		for shard in &selected {
			let generation = shard_states
				.generation(shard, tenant_id)
				.await
				.map_err(ServiceError::from)?;

			generations.push(generation);
		}

		let first = generations[0];

		if generations.iter().any(|generation| *generation != first) {
			let message = format!(
				"Selected shards disagree on index generation: {generations:?} for shards {selected:?}."
			);

			tracing::warn!(tenant_id, %message, "Strict consistency check failed.");

			return Ok(RoutingDecision {
				shard_addresses: Vec::new(),
				consistency_error: Some(message),
				shard_generations: Some(generations),
			});
		}

		Ok(RoutingDecision {
			shard_addresses: selected,
			consistency_error: None,
			shard_generations: Some(generations),
		})
	}
}

pub fn rendezvous_score(query_key: &str, shard: &str) -> u64 {
	let mut hasher = blake3::Hasher::new();

	hasher.update(query_key.as_bytes());
	hasher.update(b"\0");
	hasher.update(shard.as_bytes());

	let digest = hasher.finalize();
	let bytes: [u8; 8] = digest.as_bytes()[..8].try_into().unwrap_or([0; 8]);

	u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn router(strategy: RoutingStrategy, shards: &[&str], fanout: u32) -> ShardRouter {
		ShardRouter::new(
			shards.iter().map(|s| s.to_string()).collect(),
			strategy,
			fanout,
			false,
			0.0,
		)
	}

	#[test]
	fn single_shard_short_circuits_every_strategy() {
		for strategy in
			[RoutingStrategy::All, RoutingStrategy::SubsetByRendezvous, RoutingStrategy::Adaptive]
		{
			let router = router(strategy, &["only"], 3);

			assert_eq!(router.select("tenant-a", "query", 3), vec!["only".to_string()]);
		}
	}

	#[test]
	fn all_strategy_returns_every_shard() {
		let router = router(RoutingStrategy::All, &["a", "b", "c"], 1);

		assert_eq!(router.select("tenant-a", "query", 1).len(), 3);
	}

	#[test]
	fn rendezvous_is_deterministic_and_bounded_by_fanout() {
		let router = router(RoutingStrategy::SubsetByRendezvous, &["a", "b", "c", "d"], 2);
		let first = router.select("tenant-a", "shard routing latency", 2);
		let second = router.select("tenant-a", "shard routing latency", 2);

		assert_eq!(first, second);
		assert_eq!(first.len(), 2);
	}

	#[test]
	fn distinct_queries_spread_across_shards() {
		let router = router(RoutingStrategy::SubsetByRendezvous, &["a", "b", "c", "d"], 1);
		let mut seen = std::collections::HashSet::new();

		for i in 0..64 {
			let picked = router.select("tenant-a", &format!("query number {i}"), 1);

			seen.insert(picked[0].clone());
		}

		assert!(seen.len() >= 3, "rendezvous stuck on {seen:?}");
	}

	#[test]
	fn removing_a_shard_only_moves_its_own_queries() {
		let full = router(RoutingStrategy::SubsetByRendezvous, &["a", "b", "c", "d"], 1);
		let reduced = router(RoutingStrategy::SubsetByRendezvous, &["a", "b", "c"], 1);

		for i in 0..64 {
			let query = format!("query number {i}");
			let before = full.select("tenant-a", &query, 1);

			if before[0] != "d" {
				let after = reduced.select("tenant-a", &query, 1);

				assert_eq!(before, after, "query {query} moved without its shard disappearing");
			}
		}
	}

	#[test]
	fn adaptive_with_zero_probability_matches_rendezvous() {
		let rendezvous = router(RoutingStrategy::SubsetByRendezvous, &["a", "b", "c"], 2);
		let adaptive = router(RoutingStrategy::Adaptive, &["a", "b", "c"], 2);

		for i in 0..16 {
			let query = format!("query number {i}");

			assert_eq!(
				rendezvous.select("tenant-a", &query, 2),
				adaptive.select("tenant-a", &query, 2)
			);
		}
	}

	#[test]
	fn document_placement_is_stable() {
		let router = router(RoutingStrategy::SubsetByRendezvous, &["a", "b", "c"], 1);
		let first = router.shard_for_document("doc-123");
		let second = router.shard_for_document("doc-123");

		assert_eq!(first, second);
		assert!(first.is_some());
	}
}
