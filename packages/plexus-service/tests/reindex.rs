use uuid::Uuid;

use plexus_service::{PlexusService, ServiceError};
use plexus_storage::chunks::ChunkStore;
use plexus_storage::models::DocumentInput;
use plexus_testkit::{InMemoryDocumentSource, TestBackends, TestStores, sample_config};

fn documents() -> Vec<DocumentInput> {
	vec![
		DocumentInput {
			document_id: Uuid::from_u128(1),
			chunks: vec![
				"shard routing under strict latency budgets".to_string(),
				"hedged retrieval bounds tail latency".to_string(),
			],
		},
		DocumentInput {
			document_id: Uuid::from_u128(2),
			chunks: vec!["reciprocal rank fusion merges ranked lists".to_string()],
		},
	]
}

fn harness() -> (PlexusService, TestStores, TestBackends, InMemoryDocumentSource) {
	let stores = TestStores::new();
	let backends = TestBackends::new(4);
	let service = PlexusService::new(sample_config(&["shard-a", "shard-b"]), stores.stores(), backends.backends());
	let source = InMemoryDocumentSource::new();

	source.put("tenant-a", documents());

	(service, stores, backends, source)
}

#[tokio::test]
async fn successful_reindex_backfills_and_promotes() {
	let (service, stores, _backends, source) = harness();
	let report = service.run_reindex("tenant-a", "embed-v2", &source).await.expect("reindex");

	assert!(report.promoted);
	assert_eq!(report.documents, 2);
	assert_eq!(report.chunks_written, 3);

	let canary = report.canary.expect("canary report");

	assert!(canary.passed);
	assert_eq!(canary.error_rate, 0.0);

	let state = service.lifecycle.fresh_state("tenant-a").await.expect("state");

	assert_eq!(state.active_embedding_version, "embed-v2");
	assert_eq!(state.index_generation, 1);

	let count = stores.chunks.count_chunks("tenant-a", "embed-v2").await.expect("count");

	assert_eq!(count, 3);
}

#[tokio::test]
async fn rerunning_a_failed_backfill_leaves_no_duplicate_chunks() {
	let (service, stores, _backends, source) = harness();

	// Two consecutive failures exhaust the two configured attempts for the
	// first chunk write, failing the whole reindex.
	stores.chunks.fail_next_upserts(2);

	match service.run_reindex("tenant-a", "embed-v2", &source).await {
		Err(ServiceError::ReindexFailed { .. }) => {},
		other => panic!("Expected ReindexFailed, got {other:?}"),
	}

	let state = service.lifecycle.fresh_state("tenant-a").await.expect("state");

	// Rolled back, never partially promoted.
	assert_eq!(state.active_embedding_version, "embed-v1");
	assert_eq!(state.index_generation, 0);
	assert!(state.target_embedding_version.is_none());

	let report = service.run_reindex("tenant-a", "embed-v2", &source).await.expect("rerun");

	assert!(report.promoted);

	let count = stores.chunks.count_chunks("tenant-a", "embed-v2").await.expect("count");
	let ids = stores.chunks.chunk_ids("embed-v2");

	assert_eq!(count, 3);
	assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn transient_write_failures_are_retried_within_the_bound() {
	let (service, stores, _backends, source) = harness();

	// One failure, two allowed attempts: the retry absorbs it.
	stores.chunks.fail_next_upserts(1);

	let report = service.run_reindex("tenant-a", "embed-v2", &source).await.expect("reindex");

	assert!(report.promoted);
	assert_eq!(report.chunks_written, 3);
}

#[tokio::test]
async fn failed_canary_rolls_back_instead_of_promoting() {
	let (service, _stores, backends, source) = harness();

	// Shards answer every canary query with nothing, which the canary treats
	// as breakage under the target version.
	backends.shards.set_dense("shard-a", Vec::new());
	backends.shards.set_lexical("shard-a", Vec::new());
	backends.shards.set_dense("shard-b", Vec::new());
	backends.shards.set_lexical("shard-b", Vec::new());

	let report = service.run_reindex("tenant-a", "embed-v2", &source).await.expect("reindex");

	assert!(!report.promoted);

	let canary = report.canary.expect("canary report");

	assert!(!canary.passed);
	assert!(canary.error_rate > 0.9);

	let state = service.lifecycle.fresh_state("tenant-a").await.expect("state");

	assert_eq!(state.active_embedding_version, "embed-v1");
	assert_eq!(state.index_generation, 0);
	assert!(state.target_embedding_version.is_none());
}

#[tokio::test]
async fn empty_tenant_promotes_without_a_canary() {
	let (service, _stores, _backends, source) = harness();

	source.put("tenant-b", Vec::new());

	let report = service.run_reindex("tenant-b", "embed-v2", &source).await.expect("reindex");

	assert!(report.promoted);
	assert!(report.canary.is_none());
	assert_eq!(report.chunks_written, 0);
}

#[tokio::test]
async fn canary_queries_are_served_from_the_target_version() {
	let (service, _stores, backends, source) = harness();
	let report = service.run_reindex("tenant-a", "embed-v2", &source).await.expect("reindex");

	assert!(report.promoted);

	// The backfill placed every chunk on its rendezvous-selected shard.
	let total_indexed =
		backends.shards.indexed_count("shard-a") + backends.shards.indexed_count("shard-b");

	assert_eq!(total_indexed, 3);
}
