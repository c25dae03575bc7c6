pub mod cache;
pub mod experiments;
pub mod hedge;
pub mod lifecycle;
pub mod pipeline;
pub mod reindex;
pub mod remediation;
pub mod router;

use std::{future::Future, pin::Pin, sync::Arc};

use plexus_config::Config;
use plexus_domain::{RateLimiter, RollingSloWindow};
use plexus_storage::{
	chunks::ChunkStore,
	jobs::ReindexJobStore,
	models::ChunkRecord,
	overrides::OverrideStore,
	shard::QdrantShardReader,
	state::{IndexStateStore, ShardStateStore},
};

pub use plexus_domain::{Candidate, SloSnapshot};

pub use cache::{EmbeddingCache, ResultCache, normalize_query};
pub use experiments::{ConfigExperimentSource, ExperimentParams, ExperimentSource};
pub use lifecycle::IndexLifecycleManager;
pub use pipeline::{SearchRequest, SearchResponse};
pub use reindex::{CanaryReport, ReindexReport};
pub use remediation::{RemediationController, RemediationSettings};
pub use router::{RoutingDecision, RoutingStrategy, ShardRouter};

pub type ServiceResult<T> = Result<T, ServiceError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const CONTROL_EXPERIMENT: &str = "control";

/// Embedding seam; the default implementation wraps the HTTP client with its
/// retry and circuit-breaker behavior.
pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}

/// Shard query seam. Dense and lexical retrieval are functionally
/// interchangeable from the pipeline's perspective; both answer one shard and
/// return scored candidates.
pub trait ShardBackend
where
	Self: Send + Sync,
{
	fn query_dense<'a>(
		&'a self,
		shard: &'a str,
		tenant_id: &'a str,
		query_vector: &'a [f32],
		k: u32,
		embedding_version: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<Candidate>>>;

	fn query_lexical<'a>(
		&'a self,
		shard: &'a str,
		tenant_id: &'a str,
		query: &'a str,
		k: u32,
		embedding_version: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<Candidate>>>;

	fn index_chunks<'a>(
		&'a self,
		shard: &'a str,
		records: &'a [ChunkRecord],
		vectors: &'a [Vec<f32>],
	) -> BoxFuture<'a, color_eyre::Result<()>>;
}

#[derive(Debug)]
pub enum ServiceError {
	InvalidRequest { message: String },
	Overload { tenant_id: String },
	ScopeDenied { message: String },
	Conflict { message: String },
	ReindexFailed { message: String },
	Provider { message: String },
	Storage { message: String },
}

impl std::fmt::Display for ServiceError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::InvalidRequest { message } => write!(f, "Invalid request: {message}"),
			Self::Overload { tenant_id } => {
				write!(f, "Tenant {tenant_id} is over its request rate; back off.")
			},
			Self::ScopeDenied { message } => write!(f, "Scope denied: {message}"),
			Self::Conflict { message } => write!(f, "Conflict: {message}"),
			Self::ReindexFailed { message } => write!(f, "Reindex failed: {message}"),
			Self::Provider { message } => write!(f, "Provider error: {message}"),
			Self::Storage { message } => write!(f, "Storage error: {message}"),
		}
	}
}

impl std::error::Error for ServiceError {}

impl From<plexus_storage::Error> for ServiceError {
	fn from(err: plexus_storage::Error) -> Self {
		match err {
			plexus_storage::Error::Conflict(message) => Self::Conflict { message },
			other => Self::Storage { message: other.to_string() },
		}
	}
}

impl From<color_eyre::Report> for ServiceError {
	fn from(err: color_eyre::Report) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

#[derive(Clone)]
pub struct Stores {
	pub states: Arc<dyn IndexStateStore>,
	pub shard_states: Arc<dyn ShardStateStore>,
	pub overrides: Arc<dyn OverrideStore>,
	pub chunks: Arc<dyn ChunkStore>,
	pub jobs: Arc<dyn ReindexJobStore>,
}

#[derive(Clone)]
pub struct Backends {
	pub shards: Arc<dyn ShardBackend>,
	pub embedding: Arc<dyn EmbeddingProvider>,
}

pub struct PlexusService {
	pub cfg: Config,
	pub stores: Stores,
	pub backends: Backends,
	pub experiments: Arc<dyn ExperimentSource>,
	pub lifecycle: IndexLifecycleManager,
	pub router: ShardRouter,
	pub results: ResultCache,
	pub vectors: EmbeddingCache,
	pub limiter: RateLimiter,
	pub slo: Arc<RollingSloWindow>,
}

impl PlexusService {
	pub fn new(cfg: Config, stores: Stores, backends: Backends) -> Self {
		let experiments: Arc<dyn ExperimentSource> = Arc::new(ConfigExperimentSource::new(&cfg));
		let shard_names: Vec<String> = cfg.shards.iter().map(|shard| shard.name.clone()).collect();
		let lifecycle = IndexLifecycleManager::new(
			stores.states.clone(),
			stores.shard_states.clone(),
			shard_names.clone(),
			cfg.lifecycle.baseline_version.clone(),
			std::time::Duration::from_millis(cfg.lifecycle.state_ttl_ms),
		);
		let router = ShardRouter::new(
			shard_names,
			RoutingStrategy::parse(&cfg.routing.strategy).unwrap_or(RoutingStrategy::All),
			cfg.routing.fanout,
			cfg.routing.strict_consistency,
			cfg.routing.reshuffle_probability,
		);
		let results = ResultCache::new(
			cfg.cache.result_capacity,
			std::time::Duration::from_millis(cfg.cache.result_ttl_ms),
		);
		let vectors = EmbeddingCache::new(cfg.cache.embedding_capacity);
		let limiter = RateLimiter::new(cfg.limits.rate_capacity, cfg.limits.rate_per_sec);
		let slo = Arc::new(RollingSloWindow::new(cfg.slo.window));

		Self {
			cfg,
			stores,
			backends,
			experiments,
			lifecycle,
			router,
			results,
			vectors,
			limiter,
			slo,
		}
	}

	pub fn remediation_controller(
		&self,
		lock: Arc<dyn plexus_storage::lock::DistributedLock>,
	) -> RemediationController {
		RemediationController::new(
			RemediationSettings::from_config(&self.cfg.slo),
			lock,
			self.stores.overrides.clone(),
			self.slo.clone(),
		)
	}
}

/// Default shard backend over per-shard Qdrant collections.
pub struct QdrantShardBackend {
	reader: QdrantShardReader,
}

impl QdrantShardBackend {
	pub fn new(shards: &[plexus_config::Shard]) -> plexus_storage::Result<Self> {
		Ok(Self { reader: QdrantShardReader::new(shards)? })
	}
}

impl ShardBackend for QdrantShardBackend {
	fn query_dense<'a>(
		&'a self,
		shard: &'a str,
		tenant_id: &'a str,
		query_vector: &'a [f32],
		k: u32,
		embedding_version: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Vec<Candidate>>> {
		Box::pin(async move {
			self.reader
				.query_dense(shard, tenant_id, query_vector, k, embedding_version)
				.await
				.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))
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
			self.reader
				.query_lexical(shard, tenant_id, query, k, embedding_version)
				.await
				.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))
		})
	}

	fn index_chunks<'a>(
		&'a self,
		shard: &'a str,
		records: &'a [ChunkRecord],
		vectors: &'a [Vec<f32>],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			self.reader
				.index_chunks(shard, records, vectors)
				.await
				.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))
		})
	}
}

/// Default embedding provider over the retrying, circuit-broken HTTP client.
pub struct HttpEmbeddingProvider {
	client: plexus_providers::EmbeddingClient,
}

impl HttpEmbeddingProvider {
	pub fn new(cfg: plexus_config::EmbeddingProviderConfig) -> plexus_providers::Result<Self> {
		Ok(Self { client: plexus_providers::EmbeddingClient::new(cfg)? })
	}
}

impl EmbeddingProvider for HttpEmbeddingProvider {
	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			self.client
				.embed_batch(texts)
				.await
				.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))
		})
	}
}
