use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use tokio::task::JoinSet;
use uuid::Uuid;

use plexus_domain::{
	Candidate, LatencyBudget, RerankStrategy, RetrieverKind, dedupe_stage, fuse, hybrid_rerank,
	mmr_select,
};

use crate::{
	CONTROL_EXPERIMENT, ExperimentParams, PlexusService, ServiceError, ServiceResult,
	ShardBackend,
	cache::{ResultCacheKey, normalize_query, result_cache_key},
	hedge,
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchRequest {
	pub tenant_id: String,
	pub query: String,
	#[serde(default)]
	pub query_vector: Option<Vec<f32>>,
	pub top_k: Option<u32>,
	pub rerank_candidates: Option<u32>,
	#[serde(default)]
	pub experiment: Option<String>,
	/// Canary-only; never honored without the matching admin credential.
	#[serde(default)]
	pub embedding_version_override: Option<String>,
	#[serde(default)]
	pub admin_token: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchResponse {
	pub candidates: Vec<Candidate>,
	pub latency_ms: f64,
	pub experiment: String,
	pub embedding_version: String,
	pub index_generation: u64,
	pub consistency_error: Option<String>,
	pub from_cache: bool,
	pub budget_exhausted: bool,
	pub reranked: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PipelineOptions {
	pub observe: bool,
	pub enforce_limit: bool,
	pub use_cache: bool,
	/// Canary validation reads every shard; serving traffic keeps the
	/// experiment's fan-out.
	pub fanout_override: Option<u32>,
}

impl PipelineOptions {
	pub(crate) fn serving() -> Self {
		Self { observe: true, enforce_limit: true, use_cache: true, fanout_override: None }
	}

	pub(crate) fn canary(fanout: u32) -> Self {
		Self {
			observe: false,
			enforce_limit: false,
			use_cache: false,
			fanout_override: Some(fanout),
		}
	}
}

impl PlexusService {
	/// One full pipeline run: admission, lifecycle read, experiment
	/// resolution, cache probe, routing, concurrent retrieval, fusion,
	/// budget-gated rerank.
	pub async fn search(&self, req: SearchRequest) -> ServiceResult<SearchResponse> {
		self.search_with_options(req, PipelineOptions::serving()).await
	}

	pub(crate) async fn search_with_options(
		&self,
		req: SearchRequest,
		options: PipelineOptions,
	) -> ServiceResult<SearchResponse> {
		let budget = LatencyBudget::from_millis(self.cfg.retrieval.budget_ms);
		let result = self.run_pipeline(&req, &budget, options).await;

		if options.observe {
			match &result {
				Ok(response) => {
					self.slo.observe(budget.elapsed_ms(), false, response.candidates.is_empty());
				},
				Err(
					ServiceError::Overload { .. }
					| ServiceError::InvalidRequest { .. }
					| ServiceError::ScopeDenied { .. },
				) => {},
				Err(_) => {
					self.slo.observe(budget.elapsed_ms(), true, true);
				},
			}
		}

		result
	}

	async fn run_pipeline(
		&self,
		req: &SearchRequest,
		budget: &LatencyBudget,
		options: PipelineOptions,
	) -> ServiceResult<SearchResponse> {
		let tenant_id = req.tenant_id.trim();

		if tenant_id.is_empty() {
			return Err(ServiceError::InvalidRequest {
				message: "tenant_id is required.".to_string(),
			});
		}
		if req.query.trim().is_empty() {
			return Err(ServiceError::InvalidRequest { message: "query is required.".to_string() });
		}
		if options.enforce_limit && !self.limiter.allow(tenant_id) {
			return Err(ServiceError::Overload { tenant_id: tenant_id.to_string() });
		}

		let state = self.lifecycle.get_state(tenant_id).await?;
		let embedding_version = match req.embedding_version_override.as_deref() {
			Some(version) => {
				self.verify_admin_token(req.admin_token.as_deref())?;

				version.to_string()
			},
			None => state.active_embedding_version.clone(),
		};
		let params = self.resolve_experiment(req.experiment.as_deref()).await;
		let top_k = req.top_k.unwrap_or(params.top_k).max(1);
		let rerank_candidates = req.rerank_candidates.unwrap_or(params.rerank_candidates).max(top_k);
		let normalized_query = normalize_query(&req.query);
		let cache_key = result_cache_key(&ResultCacheKey {
			tenant_id,
			experiment: &params.name,
			embedding_version: &embedding_version,
			index_generation: state.index_generation,
			top_k,
			rerank_candidates,
			normalized_query: &normalized_query,
		});

		if options.use_cache
			&& let Some(candidates) = self.results.get(&cache_key)
		{
			return Ok(SearchResponse {
				candidates,
				latency_ms: budget.elapsed_ms(),
				experiment: params.name,
				embedding_version,
				index_generation: state.index_generation,
				consistency_error: None,
				from_cache: true,
				budget_exhausted: false,
				reranked: false,
			});
		}

		let fanout = options.fanout_override.unwrap_or(params.fanout);
		let decision = self
			.router
			.route(tenant_id, &normalized_query, fanout, &*self.stores.shard_states)
			.await?;

		if let Some(consistency_error) = decision.consistency_error {
			return Ok(SearchResponse {
				candidates: Vec::new(),
				latency_ms: budget.elapsed_ms(),
				experiment: params.name,
				embedding_version,
				index_generation: state.index_generation,
				consistency_error: Some(consistency_error),
				from_cache: false,
				budget_exhausted: false,
				reranked: false,
			});
		}

		let stages_allowed = budget.allows_ms(self.cfg.retrieval.stage_cost_ms);
		let query_vector = self.resolve_query_vector(req, budget).await;
		let hedge_secondary = self.hedge_secondary(tenant_id, &normalized_query, &decision.shard_addresses);
		let (dense, lexical) = tokio::join!(
			self.run_stage(
				RetrieverKind::Dense,
				tenant_id,
				&normalized_query,
				query_vector.as_deref(),
				&decision.shard_addresses,
				hedge_secondary.as_deref(),
				rerank_candidates,
				&embedding_version,
				budget,
			),
			self.run_stage(
				RetrieverKind::Lexical,
				tenant_id,
				&normalized_query,
				None,
				&decision.shard_addresses,
				hedge_secondary.as_deref(),
				rerank_candidates,
				&embedding_version,
				budget,
			),
		);
		let stages = [dense, lexical];
		let pool = fuse(&stages, params.fusion, rerank_candidates as usize);
		let budget_exhausted = !stages_allowed || budget.exhausted();
		let (candidates, reranked) = self
			.maybe_rerank(
				&params,
				tenant_id,
				&normalized_query,
				query_vector.as_deref(),
				&embedding_version,
				pool,
				top_k,
				budget,
			)
			.await;

		if options.use_cache && !candidates.is_empty() {
			self.results.put(cache_key, candidates.clone());
		}

		Ok(SearchResponse {
			candidates,
			latency_ms: budget.elapsed_ms(),
			experiment: params.name,
			embedding_version,
			index_generation: state.index_generation,
			consistency_error: None,
			from_cache: false,
			budget_exhausted,
			reranked,
		})
	}

	fn verify_admin_token(&self, presented: Option<&str>) -> ServiceResult<()> {
		let Some(expected) = self.cfg.security.admin_auth_token.as_deref() else {
			return Err(ServiceError::ScopeDenied {
				message: "No admin credential is configured; version overrides are disabled."
					.to_string(),
			});
		};

		if presented != Some(expected) {
			return Err(ServiceError::ScopeDenied {
				message: "Embedding version override requires the admin credential.".to_string(),
			});
		}

		Ok(())
	}

	async fn resolve_experiment(&self, requested: Option<&str>) -> ExperimentParams {
		let forced = match self.stores.overrides.get().await {
			Ok(override_row) => override_row.map(|row| row.forced_experiment),
			Err(err) => {
				tracing::warn!(error = %err, "Override read failed; using normal routing.");

				None
			},
		};
		let name = forced
			.as_deref()
			.or(requested)
			.unwrap_or(CONTROL_EXPERIMENT)
			.to_string();

		match self.experiments.resolve(&name) {
			Some(params) => params,
			None => {
				tracing::warn!(experiment = name.as_str(), "Unknown experiment; using control.");

				self.experiments.base()
			},
		}
	}

	async fn resolve_query_vector(
		&self,
		req: &SearchRequest,
		budget: &LatencyBudget,
	) -> Option<Vec<f32>> {
		if let Some(vector) = req.query_vector.as_ref() {
			return Some(vector.clone());
		}
		if !budget.allows_ms(self.cfg.retrieval.stage_cost_ms) {
			tracing::debug!("Budget too low to embed the query; dense stage will be skipped.");

			return None;
		}

		match self.backends.embedding.embed(std::slice::from_ref(&req.query)).await {
			Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
			Ok(_) => {
				tracing::warn!("Embedding provider returned no vectors for the query.");

				None
			},
			Err(err) => {
				tracing::warn!(error = %err, "Query embedding failed; degrading to lexical only.");

				None
			},
		}
	}

	fn hedge_secondary(
		&self,
		tenant_id: &str,
		normalized_query: &str,
		selected: &[String],
	) -> Option<String> {
		if selected.len() != 1 || self.router.shard_count() < 2 {
			return None;
		}

		self.router
			.ranked(tenant_id, normalized_query)
			.into_iter()
			.find(|shard| !selected.contains(shard))
	}

	#[allow(clippy::too_many_arguments)]
	async fn run_stage(
		&self,
		kind: RetrieverKind,
		tenant_id: &str,
		query: &str,
		query_vector: Option<&[f32]>,
		shards: &[String],
		hedge_secondary: Option<&str>,
		k: u32,
		embedding_version: &str,
		budget: &LatencyBudget,
	) -> Vec<Candidate> {
		if shards.is_empty() {
			return Vec::new();
		}
		if kind == RetrieverKind::Dense && query_vector.is_none() {
			return Vec::new();
		}
		if !budget.allows_ms(self.cfg.retrieval.stage_cost_ms) {
			tracing::debug!(kind = kind.as_str(), "Budget exhausted; skipping retrieval stage.");

			return Vec::new();
		}

		let timeout = Duration::from_millis(self.cfg.routing.shard_timeout_ms);
		let vector = query_vector.map(|v| v.to_vec());

		if let [primary] = shards
			&& let Some(secondary) = hedge_secondary
		{
			let hedge_after = Duration::from_millis(self.cfg.routing.hedge_after_ms);
			let primary_fut = retrieve_on_shard(
				self.backends.shards.clone(),
				kind,
				primary.clone(),
				tenant_id.to_string(),
				query.to_string(),
				vector.clone(),
				k,
				embedding_version.to_string(),
				timeout,
			);
			let secondary_fut = retrieve_on_shard(
				self.backends.shards.clone(),
				kind,
				secondary.to_string(),
				tenant_id.to_string(),
				query.to_string(),
				vector,
				k,
				embedding_version.to_string(),
				timeout,
			);

			return dedupe_stage(hedge::race_hedged(primary_fut, secondary_fut, hedge_after).await);
		}

		let mut set = JoinSet::new();

		for shard in shards {
			set.spawn(retrieve_on_shard(
				self.backends.shards.clone(),
				kind,
				shard.clone(),
				tenant_id.to_string(),
				query.to_string(),
				vector.clone(),
				k,
				embedding_version.to_string(),
				timeout,
			));
		}

		let mut merged = Vec::new();

		while let Some(joined) = set.join_next().await {
			match joined {
				Ok(candidates) => merged.extend(candidates),
				Err(err) => {
					tracing::warn!(error = %err, kind = kind.as_str(), "Stage task panicked.");
				},
			}
		}

		dedupe_stage(merged)
	}

	#[allow(clippy::too_many_arguments)]
	async fn maybe_rerank(
		&self,
		params: &ExperimentParams,
		tenant_id: &str,
		query: &str,
		query_vector: Option<&[f32]>,
		embedding_version: &str,
		pool: Vec<Candidate>,
		top_k: u32,
		budget: &LatencyBudget,
	) -> (Vec<Candidate>, bool) {
		let top_k = top_k as usize;

		if params.rerank == RerankStrategy::None || pool.is_empty() {
			return (truncated(pool, top_k), false);
		}
		if !budget.allows_ms(self.cfg.retrieval.rerank_cost_ms) {
			tracing::debug!("Budget exhausted; returning fused results un-reranked.");

			return (truncated(pool, top_k), false);
		}

		let Some(query_vector) = query_vector else {
			return (truncated(pool, top_k), false);
		};
		let ids: Vec<Uuid> = pool.iter().map(|candidate| candidate.id).collect();
		let vectors = self.candidate_vectors(tenant_id, embedding_version, &ids).await;
		let reranked = match params.rerank {
			RerankStrategy::Mmr { lambda } => {
				mmr_select(query_vector, pool, &vectors, lambda, top_k)
			},
			RerankStrategy::Hybrid { alpha } => {
				hybrid_rerank(query_vector, query, pool, &vectors, alpha, top_k)
			},
			RerankStrategy::None => unreachable!("handled above"),
		};

		(reranked, true)
	}

	/// Batch-fetches candidate embeddings through the per-process LRU.
	async fn candidate_vectors(
		&self,
		tenant_id: &str,
		embedding_version: &str,
		ids: &[Uuid],
	) -> AHashMap<Uuid, Vec<f32>> {
		let (mut found, missing) = self.vectors.get_many(embedding_version, ids);

		if missing.is_empty() {
			return found;
		}

		match self.stores.chunks.fetch_embeddings(tenant_id, embedding_version, &missing).await {
			Ok(fetched) => {
				self.vectors.put_many(embedding_version, &fetched);

				for (id, vec) in fetched {
					found.insert(id, vec);
				}
			},
			Err(err) => {
				tracing::warn!(error = %err, "Embedding fetch failed; reranking with partial vectors.");
			},
		}

		found
	}
}

fn truncated(mut pool: Vec<Candidate>, top_k: usize) -> Vec<Candidate> {
	pool.truncate(top_k);

	pool
}

#[allow(clippy::too_many_arguments)]
async fn retrieve_on_shard(
	backend: Arc<dyn ShardBackend>,
	kind: RetrieverKind,
	shard: String,
	tenant_id: String,
	query: String,
	query_vector: Option<Vec<f32>>,
	k: u32,
	embedding_version: String,
	timeout: Duration,
) -> Vec<Candidate> {
	let call = async {
		match kind {
			RetrieverKind::Dense => {
				let Some(vector) = query_vector.as_deref() else {
					return Ok(Vec::new());
				};

				backend.query_dense(&shard, &tenant_id, vector, k, &embedding_version).await
			},
			RetrieverKind::Lexical => {
				backend.query_lexical(&shard, &tenant_id, &query, k, &embedding_version).await
			},
		}
	};

	match tokio::time::timeout(timeout, call).await {
		Ok(Ok(candidates)) => candidates,
		Ok(Err(err)) => {
			tracing::warn!(
				error = %err,
				shard = shard.as_str(),
				kind = kind.as_str(),
				"Shard retrieval failed; treating the stage as empty.",
			);

			Vec::new()
		},
		Err(_) => {
			tracing::warn!(
				shard = shard.as_str(),
				kind = kind.as_str(),
				timeout_ms = timeout.as_millis() as u64,
				"Shard retrieval timed out; treating the stage as empty.",
			);

			Vec::new()
		},
	}
}
