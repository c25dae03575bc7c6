pub mod worker;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use plexus_service::{Backends, HttpEmbeddingProvider, PlexusService, QdrantShardBackend, Stores};
use plexus_storage::{
	chunks::PgChunkStore,
	db::Db,
	docs::PgDocumentSource,
	jobs::PgReindexJobStore,
	overrides::PgOverrideStore,
	state::{PgIndexStateStore, PgShardStateStore},
};

#[derive(Debug, Parser)]
#[command(
	version = plexus_cli::VERSION,
	rename_all = "kebab",
	styles = plexus_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: std::path::PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = plexus_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());
	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Db::connect(&config.storage.postgres)
		.await
		.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?;

	db.ensure_schema().await.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?;

	let stores = Stores {
		states: Arc::new(PgIndexStateStore::new(db.clone())),
		shard_states: Arc::new(PgShardStateStore::new(db.clone())),
		overrides: Arc::new(PgOverrideStore::new(db.clone())),
		chunks: Arc::new(PgChunkStore::new(db.clone())),
		jobs: Arc::new(PgReindexJobStore::new(db.clone())),
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
	let service = Arc::new(PlexusService::new(config, stores, backends));
	let state = worker::WorkerState { service, documents: Arc::new(PgDocumentSource::new(db)) };

	worker::run_worker(state).await
}
