use std::{
	collections::{HashMap, HashSet},
	hash::{Hash, Hasher},
	sync::Mutex,
	time::Duration,
};

use uuid::Uuid;

use plexus_domain::{
	Candidate, CandidateOrigin, RetrieverKind, cmp_f64_desc, cosine_similarity, token_overlap,
};
use plexus_service::{BoxFuture, EmbeddingProvider, ShardBackend};
use plexus_storage::models::ChunkRecord;

#[derive(Default)]
struct ScriptedInner {
	canned: HashMap<(String, RetrieverKind), Vec<Candidate>>,
	delays: HashMap<String, Duration>,
	failing: HashSet<String>,
	indexed: HashMap<(String, Uuid), (ChunkRecord, Vec<f32>)>,
	queries: u64,
}

/// Deterministic shard backend for tests.
///
/// Shards can serve canned candidate lists, answer from chunks indexed
/// through `index_chunks` (dense scored by cosine, lexical by token
/// overlap), be delayed to model a slow shard, or fail outright.
#[derive(Default)]
pub struct ScriptedShardBackend {
	inner: Mutex<ScriptedInner>,
}

impl ScriptedShardBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_dense(&self, shard: &str, candidates: Vec<Candidate>) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		inner.canned.insert((shard.to_string(), RetrieverKind::Dense), candidates);
	}

	pub fn set_lexical(&self, shard: &str, candidates: Vec<Candidate>) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		inner.canned.insert((shard.to_string(), RetrieverKind::Lexical), candidates);
	}

	pub fn set_delay(&self, shard: &str, delay: Duration) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		inner.delays.insert(shard.to_string(), delay);
	}

	pub fn fail_shard(&self, shard: &str) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		inner.failing.insert(shard.to_string());
	}

	pub fn indexed_count(&self, shard: &str) -> usize {
		let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		inner.indexed.keys().filter(|(name, _)| name == shard).count()
	}

	pub fn query_count(&self) -> u64 {
		self.inner.lock().unwrap_or_else(|err| err.into_inner()).queries
	}

	fn answer(
		&self,
		shard: &str,
		tenant_id: &str,
		kind: RetrieverKind,
		query: &str,
		query_vector: Option<&[f32]>,
		k: u32,
		embedding_version: &str,
	) -> color_eyre::Result<(Option<Duration>, Vec<Candidate>)> {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		inner.queries += 1;

		if inner.failing.contains(shard) {
			return Err(color_eyre::eyre::eyre!("Injected failure for shard {shard}."));
		}

		let delay = inner.delays.get(shard).copied();

		if let Some(canned) = inner.canned.get(&(shard.to_string(), kind)) {
			return Ok((delay, canned.iter().take(k as usize).cloned().collect()));
		}

		let mut scored: Vec<Candidate> = inner
			.indexed
			.iter()
			.filter(|((name, _), (record, _))| {
				name == shard
					&& record.tenant_id == tenant_id
					&& record.embedding_version == embedding_version
			})
			.map(|(_, (record, vector))| {
				let score = match kind {
					RetrieverKind::Dense => query_vector
						.and_then(|qv| cosine_similarity(qv, vector))
						.unwrap_or(0.0),
					RetrieverKind::Lexical => token_overlap(query, &record.text),
				};

				Candidate {
					id: record.chunk_id,
					parent_document_id: record.document_id,
					ordinal: record.chunk_index,
					text: record.text.clone(),
					score,
					origin: CandidateOrigin {
						retriever_kind: kind,
						embedding_version: embedding_version.to_string(),
					},
				}
			})
			.filter(|candidate| candidate.score > 0.0)
			.collect();

		scored.sort_by(|left, right| {
			cmp_f64_desc(left.score, right.score).then_with(|| left.id.cmp(&right.id))
		});
		scored.truncate(k as usize);

		Ok((delay, scored))
	}
}

impl ShardBackend for ScriptedShardBackend {
	fn query_dense<'a>(
		&'a self,
		shard: &'a str,
		tenant_id: &'a str,
		query_vector: &'a [f32],
		k: u32,
		embedding_version: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<Candidate>>> {
		Box::pin(async move {
			let (delay, candidates) = self.answer(
				shard,
				tenant_id,
				RetrieverKind::Dense,
				"",
				Some(query_vector),
				k,
				embedding_version,
			)?;

			if let Some(delay) = delay {
				tokio::time::sleep(delay).await;
			}

			Ok(candidates)
		})
	}

	fn query_lexical<'a>(
		&'a self,
		shard: &'a str,
		tenant_id: &'a str,
		query: &'a str,
		k: u32,
		embedding_version: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<Candidate>>> {
		Box::pin(async move {
			let (delay, candidates) = self.answer(
				shard,
				tenant_id,
				RetrieverKind::Lexical,
				query,
				None,
				k,
				embedding_version,
			)?;

			if let Some(delay) = delay {
				tokio::time::sleep(delay).await;
			}

			Ok(candidates)
		})
	}

	fn index_chunks<'a>(
		&'a self,
		shard: &'a str,
		records: &'a [ChunkRecord],
		vectors: &'a [Vec<f32>],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

			if inner.failing.contains(shard) {
				return Err(color_eyre::eyre::eyre!("Injected failure for shard {shard}."));
			}

			for (record, vector) in records.iter().zip(vectors.iter()) {
				inner.indexed.insert(
					(shard.to_string(), record.chunk_id),
					(record.clone(), vector.clone()),
				);
			}

			Ok(())
		})
	}
}

/// Deterministic embedding provider: the same text always maps to the same
/// unit vector, so indexed chunks score cosine 1.0 against themselves.
pub struct StaticEmbedding {
	dimensions: usize,
	fail_remaining: Mutex<u32>,
}

impl StaticEmbedding {
	pub fn new(dimensions: usize) -> Self {
		Self { dimensions: dimensions.max(2), fail_remaining: Mutex::new(0) }
	}

	pub fn fail_next(&self, count: u32) {
		*self.fail_remaining.lock().unwrap_or_else(|err| err.into_inner()) = count;
	}

	pub fn vector_for(&self, text: &str) -> Vec<f32> {
		let mut out = Vec::with_capacity(self.dimensions);

		for salt in 0..self.dimensions {
			let mut hasher = std::collections::hash_map::DefaultHasher::new();

			salt.hash(&mut hasher);
			text.hash(&mut hasher);

			let raw = hasher.finish();

			out.push(((raw % 2_000) as f32 / 1_000.0) - 1.0);
		}

		let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();

		if norm > f32::EPSILON {
			for value in &mut out {
				*value /= norm;
			}
		} else {
			out[0] = 1.0;
		}

		out
	}
}

impl EmbeddingProvider for StaticEmbedding {
	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			{
				let mut fail = self.fail_remaining.lock().unwrap_or_else(|err| err.into_inner());

				if *fail > 0 {
					*fail -= 1;

					return Err(color_eyre::eyre::eyre!("Injected embedding failure."));
				}
			}

			Ok(texts.iter().map(|text| self.vector_for(text)).collect())
		})
	}
}
