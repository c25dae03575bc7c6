use std::sync::Arc;

use plexus_service::{Backends, HttpEmbeddingProvider, PlexusService, QdrantShardBackend, Stores};
use plexus_storage::{
	chunks::PgChunkStore,
	db::Db,
	jobs::PgReindexJobStore,
	lock::{DistributedLock, PgAdvisoryLock},
	overrides::PgOverrideStore,
	state::{PgIndexStateStore, PgShardStateStore},
};

const LEADER_LOCK_KEY: i64 = 7_523_991;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<PlexusService>,
	pub lock: Arc<dyn DistributedLock>,
}

impl AppState {
	pub async fn new(config: plexus_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres)
			.await
			.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?;

		db.ensure_schema().await.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?;

		let stores = Stores {
			states: Arc::new(PgIndexStateStore::new(db.clone())),
			shard_states: Arc::new(PgShardStateStore::new(db.clone())),
			overrides: Arc::new(PgOverrideStore::new(db.clone())),
			chunks: Arc::new(PgChunkStore::new(db.clone())),
			jobs: Arc::new(PgReindexJobStore::new(db)),
		};
		let backends = Backends {
			shards: Arc::new(
				QdrantShardBackend::new(&config.shards)
					.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?,
			),
			embedding: Arc::new(
				HttpEmbeddingProvider::new(config.providers.embedding.clone())
					.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?,
			),
		};
		let lock: Arc<dyn DistributedLock> =
			Arc::new(PgAdvisoryLock::new(&config.storage.postgres.dsn, LEADER_LOCK_KEY));
		let service = PlexusService::new(config, stores, backends);

		Ok(Self { service: Arc::new(service), lock })
	}
}
