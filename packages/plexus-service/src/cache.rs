use std::{
	collections::VecDeque,
	sync::Mutex,
	time::{Duration, Instant},
};

use ahash::AHashMap;
use uuid::Uuid;

use plexus_domain::Candidate;

/// Everything that distinguishes one pipeline run's result from another.
///
/// `index_generation` is part of the key on purpose: a promotion changes the
/// generation, so stale entries simply stop matching; no purge needed.
#[derive(Debug, Clone)]
pub struct ResultCacheKey<'a> {
	pub tenant_id: &'a str,
	pub experiment: &'a str,
	pub embedding_version: &'a str,
	pub index_generation: u64,
	pub top_k: u32,
	pub rerank_candidates: u32,
	pub normalized_query: &'a str,
}

pub fn normalize_query(raw: &str) -> String {
	raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn result_cache_key(parts: &ResultCacheKey<'_>) -> String {
	let payload = serde_json::json!({
		"tenant_id": parts.tenant_id,
		"experiment": parts.experiment,
		"embedding_version": parts.embedding_version,
		"index_generation": parts.index_generation,
		"top_k": parts.top_k,
		"rerank_candidates": parts.rerank_candidates,
		"query": parts.normalized_query,
	});
	let raw = payload.to_string();

	blake3::hash(raw.as_bytes()).to_hex().to_string()
}

struct ResultEntry {
	candidates: Vec<Candidate>,
	inserted_at: Instant,
}

struct ResultCacheInner {
	entries: AHashMap<String, ResultEntry>,
	order: VecDeque<String>,
}

/// Bounded, TTL'd memo of whole pipeline runs.
///
/// Advisory: callers treat any miss identically, and concurrent duplicate
/// writes are harmless (last write wins).
pub struct ResultCache {
	capacity: usize,
	ttl: Duration,
	inner: Mutex<ResultCacheInner>,
}

impl ResultCache {
	pub fn new(capacity: usize, ttl: Duration) -> Self {
		Self {
			capacity: capacity.max(1),
			ttl,
			inner: Mutex::new(ResultCacheInner {
				entries: AHashMap::new(),
				order: VecDeque::new(),
			}),
		}
	}

	pub fn get(&self, key: &str) -> Option<Vec<Candidate>> {
		let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
		let entry = inner.entries.get(key)?;

		if entry.inserted_at.elapsed() > self.ttl {
			return None;
		}

		Some(entry.candidates.clone())
	}

	pub fn put(&self, key: String, candidates: Vec<Candidate>) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		if !inner.entries.contains_key(&key) {
			inner.order.push_back(key.clone());
		}
		inner.entries.insert(key, ResultEntry { candidates, inserted_at: Instant::now() });

		while inner.entries.len() > self.capacity {
			let Some(evicted) = inner.order.pop_front() else { break };

			inner.entries.remove(&evicted);
		}
	}
}

struct EmbeddingCacheInner {
	entries: AHashMap<(String, Uuid), Vec<f32>>,
	order: VecDeque<(String, Uuid)>,
}

/// Bounded per-process cache of candidate embedding vectors.
///
/// Vectors are immutable once written under a given version, so entries never
/// need invalidation beyond the LRU bound.
pub struct EmbeddingCache {
	capacity: usize,
	inner: Mutex<EmbeddingCacheInner>,
}

impl EmbeddingCache {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			inner: Mutex::new(EmbeddingCacheInner {
				entries: AHashMap::new(),
				order: VecDeque::new(),
			}),
		}
	}

	/// Returns the cached subset and the ids still missing.
	pub fn get_many(
		&self,
		embedding_version: &str,
		ids: &[Uuid],
	) -> (AHashMap<Uuid, Vec<f32>>, Vec<Uuid>) {
		let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
		let mut found = AHashMap::new();
		let mut missing = Vec::new();

		for id in ids {
			match inner.entries.get(&(embedding_version.to_string(), *id)) {
				Some(vec) => {
					found.insert(*id, vec.clone());
				},
				None => missing.push(*id),
			}
		}

		(found, missing)
	}

	pub fn put_many(&self, embedding_version: &str, vectors: &[(Uuid, Vec<f32>)]) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		for (id, vec) in vectors {
			let key = (embedding_version.to_string(), *id);

			if !inner.entries.contains_key(&key) {
				inner.order.push_back(key.clone());
			}
			inner.entries.insert(key, vec.clone());
		}

		while inner.entries.len() > self.capacity {
			let Some(evicted) = inner.order.pop_front() else { break };

			inner.entries.remove(&evicted);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use plexus_domain::{CandidateOrigin, RetrieverKind};

	fn candidate(id: u128) -> Candidate {
		Candidate {
			id: Uuid::from_u128(id),
			parent_document_id: Uuid::from_u128(id),
			ordinal: 0,
			text: "text".to_string(),
			score: 1.0,
			origin: CandidateOrigin {
				retriever_kind: RetrieverKind::Dense,
				embedding_version: "embed-v1".to_string(),
			},
		}
	}

	fn key_parts(generation: u64) -> String {
		result_cache_key(&ResultCacheKey {
			tenant_id: "tenant-a",
			experiment: "control",
			embedding_version: "embed-v1",
			index_generation: generation,
			top_k: 8,
			rerank_candidates: 32,
			normalized_query: "shard routing",
		})
	}

	#[test]
	fn generation_is_part_of_the_key() {
		assert_ne!(key_parts(3), key_parts(4));
	}

	#[test]
	fn round_trips_within_ttl() {
		let cache = ResultCache::new(8, Duration::from_secs(60));
		let key = key_parts(1);

		cache.put(key.clone(), vec![candidate(1)]);

		let hit = cache.get(&key).expect("expected a cache hit");

		assert_eq!(hit.len(), 1);
	}

	#[test]
	fn expired_entries_miss() {
		let cache = ResultCache::new(8, Duration::ZERO);
		let key = key_parts(1);

		cache.put(key.clone(), vec![candidate(1)]);

		assert!(cache.get(&key).is_none());
	}

	#[test]
	fn capacity_bound_evicts_oldest() {
		let cache = ResultCache::new(2, Duration::from_secs(60));

		cache.put("a".to_string(), vec![candidate(1)]);
		cache.put("b".to_string(), vec![candidate(2)]);
		cache.put("c".to_string(), vec![candidate(3)]);

		assert!(cache.get("a").is_none());
		assert!(cache.get("b").is_some());
		assert!(cache.get("c").is_some());
	}

	#[test]
	fn embedding_cache_reports_missing_ids() {
		let cache = EmbeddingCache::new(8);
		let first = Uuid::from_u128(1);
		let second = Uuid::from_u128(2);

		cache.put_many("embed-v1", &[(first, vec![1.0, 0.0])]);

		let (found, missing) = cache.get_many("embed-v1", &[first, second]);

		assert_eq!(found.len(), 1);
		assert_eq!(missing, vec![second]);

		// Another version never sees v1 vectors.
		let (found_v2, missing_v2) = cache.get_many("embed-v2", &[first]);

		assert!(found_v2.is_empty());
		assert_eq!(missing_v2, vec![first]);
	}

	#[test]
	fn query_normalization_collapses_whitespace_and_case() {
		assert_eq!(normalize_query("  Shard   ROUTING\tlatency "), "shard routing latency");
	}
}
