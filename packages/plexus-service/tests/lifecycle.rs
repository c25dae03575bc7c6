use std::{sync::Arc, time::Duration};

use plexus_service::{IndexLifecycleManager, ServiceError};
use plexus_testkit::{InMemoryIndexStateStore, InMemoryShardStateStore};

fn manager(ttl: Duration) -> IndexLifecycleManager {
	IndexLifecycleManager::new(
		Arc::new(InMemoryIndexStateStore::new()),
		Arc::new(InMemoryShardStateStore::new()),
		vec!["shard-a".to_string(), "shard-b".to_string()],
		"embed-v1".to_string(),
		ttl,
	)
}

#[tokio::test]
async fn first_read_creates_the_baseline_state() {
	let manager = manager(Duration::ZERO);
	let state = manager.get_state("tenant-a").await.expect("get_state");

	assert_eq!(state.active_embedding_version, "embed-v1");
	assert_eq!(state.index_generation, 0);
	assert!(state.target_embedding_version.is_none());
}

#[tokio::test]
async fn set_target_promote_walks_the_state_machine() {
	let manager = manager(Duration::ZERO);

	let reindexing = manager.set_target("tenant-a", "embed-v2").await.expect("set_target");

	assert_eq!(reindexing.target_embedding_version.as_deref(), Some("embed-v2"));
	assert_eq!(reindexing.index_generation, 0);

	let promoted = manager.promote("tenant-a").await.expect("promote");

	assert_eq!(promoted.active_embedding_version, "embed-v2");
	assert!(promoted.target_embedding_version.is_none());
	assert_eq!(promoted.index_generation, 1);
}

#[tokio::test]
async fn rollback_restores_the_previous_version_without_bumping_the_generation() {
	let manager = manager(Duration::ZERO);

	manager.set_target("tenant-a", "embed-v2").await.expect("set_target");

	let rolled_back = manager.rollback("tenant-a").await.expect("rollback");

	assert_eq!(rolled_back.active_embedding_version, "embed-v1");
	assert!(rolled_back.target_embedding_version.is_none());
	assert_eq!(rolled_back.index_generation, 0);
}

#[tokio::test]
async fn set_target_requires_a_stable_state() {
	let manager = manager(Duration::ZERO);

	manager.set_target("tenant-a", "embed-v2").await.expect("set_target");

	match manager.set_target("tenant-a", "embed-v3").await {
		Err(ServiceError::Conflict { .. }) => {},
		other => panic!("Expected Conflict, got {other:?}"),
	}
}

#[tokio::test]
async fn promote_requires_a_reindex_in_flight() {
	let manager = manager(Duration::ZERO);

	manager.get_state("tenant-a").await.expect("init");

	match manager.promote("tenant-a").await {
		Err(ServiceError::InvalidRequest { .. }) => {},
		other => panic!("Expected InvalidRequest, got {other:?}"),
	}
}

#[tokio::test]
async fn concurrent_promotions_resolve_to_exactly_one_winner() {
	let manager = Arc::new(manager(Duration::ZERO));

	for round in 1..=4_u64 {
		let target = format!("embed-v{}", round + 1);

		manager.set_target("tenant-a", &target).await.expect("set_target");

		let mut handles = Vec::new();

		for _ in 0..8 {
			let manager = manager.clone();

			handles.push(tokio::spawn(async move { manager.promote("tenant-a").await }));
		}

		let mut winners = 0;
		let mut conflicts = 0;

		for handle in handles {
			match handle.await.expect("join") {
				Ok(_) => winners += 1,
				Err(ServiceError::Conflict { .. } | ServiceError::InvalidRequest { .. }) => {
					conflicts += 1;
				},
				Err(other) => panic!("Unexpected error: {other}"),
			}
		}

		assert_eq!(winners, 1, "round {round} had {winners} winners");
		assert_eq!(conflicts, 7);

		let state = manager.get_state("tenant-a").await.expect("get_state");

		// Generation equals the number of successful promotions, exactly.
		assert_eq!(state.index_generation, round);
		assert_eq!(state.active_embedding_version, target);
	}
}

#[tokio::test]
async fn promotion_invalidates_the_state_cache_synchronously() {
	// A long TTL would happily serve stale state; promotion must bust it.
	let manager = manager(Duration::from_secs(3_600));

	let before = manager.get_state("tenant-a").await.expect("get_state");

	assert_eq!(before.index_generation, 0);

	manager.set_target("tenant-a", "embed-v2").await.expect("set_target");
	manager.promote("tenant-a").await.expect("promote");

	let after = manager.get_state("tenant-a").await.expect("get_state");

	assert_eq!(after.index_generation, 1);
	assert_eq!(after.active_embedding_version, "embed-v2");
}
