use std::{
	sync::{Arc, Mutex},
	time::{Duration, Instant},
};

use ahash::AHashMap;
use time::OffsetDateTime;

use plexus_storage::{
	models::WorkspaceIndexState,
	state::{IndexStateStore, ShardStateStore},
};

use crate::{ServiceError, ServiceResult};

struct CachedState {
	state: WorkspaceIndexState,
	fetched_at: Instant,
}

/// Tracks each tenant's active and target embedding version and the
/// monotonically increasing index generation.
///
/// State is created lazily at the configured baseline. Reads go through a
/// short per-process TTL cache that is invalidated synchronously on every
/// local mutation; mutations are compare-and-swap against the generation the
/// caller observed, so concurrent writers resolve to exactly one winner.
pub struct IndexLifecycleManager {
	store: Arc<dyn IndexStateStore>,
	shard_states: Arc<dyn ShardStateStore>,
	shard_names: Vec<String>,
	baseline_version: String,
	ttl: Duration,
	cached: Mutex<AHashMap<String, CachedState>>,
}

impl IndexLifecycleManager {
	pub fn new(
		store: Arc<dyn IndexStateStore>,
		shard_states: Arc<dyn ShardStateStore>,
		shard_names: Vec<String>,
		baseline_version: String,
		ttl: Duration,
	) -> Self {
		Self {
			store,
			shard_states,
			shard_names,
			baseline_version,
			ttl,
			cached: Mutex::new(AHashMap::new()),
		}
	}

	pub async fn get_state(&self, tenant_id: &str) -> ServiceResult<WorkspaceIndexState> {
		{
			let cached = self.cached.lock().unwrap_or_else(|err| err.into_inner());

			if let Some(entry) = cached.get(tenant_id)
				&& entry.fetched_at.elapsed() <= self.ttl
			{
				return Ok(entry.state.clone());
			}
		}

		let state = self.fresh_state(tenant_id).await?;
		let mut cached = self.cached.lock().unwrap_or_else(|err| err.into_inner());

		cached.insert(
			tenant_id.to_string(),
			CachedState { state: state.clone(), fetched_at: Instant::now() },
		);

		Ok(state)
	}

	/// Reads through to the store, creating the baseline row on first touch.
	pub async fn fresh_state(&self, tenant_id: &str) -> ServiceResult<WorkspaceIndexState> {
		if let Some(state) = self.store.get(tenant_id).await? {
			return Ok(state);
		}

		let baseline = WorkspaceIndexState::baseline(
			tenant_id,
			&self.baseline_version,
			OffsetDateTime::now_utc(),
		);

		Ok(self.store.init_baseline(baseline).await?)
	}

	pub fn invalidate(&self, tenant_id: &str) {
		let mut cached = self.cached.lock().unwrap_or_else(|err| err.into_inner());

		cached.remove(tenant_id);
	}

	/// `stable -> reindexing`. Valid only when no reindex is in flight.
	pub async fn set_target(
		&self,
		tenant_id: &str,
		target_version: &str,
	) -> ServiceResult<WorkspaceIndexState> {
		let current = self.fresh_state(tenant_id).await?;

		if current.is_reindexing() {
			return Err(ServiceError::Conflict {
				message: format!(
					"Tenant {tenant_id} already has a reindex in flight toward {}.",
					current.target_embedding_version.as_deref().unwrap_or_default()
				),
			});
		}
		if current.active_embedding_version == target_version {
			return Err(ServiceError::InvalidRequest {
				message: format!("Tenant {tenant_id} is already serving {target_version}."),
			});
		}

		let updated = self
			.store
			.set_target(
				tenant_id,
				target_version,
				current.index_generation,
				OffsetDateTime::now_utc(),
			)
			.await?;

		self.invalidate(tenant_id);

		if !updated {
			return Err(ServiceError::Conflict {
				message: format!("Concurrent lifecycle write for tenant {tenant_id}; re-read and retry."),
			});
		}

		self.fresh_state(tenant_id).await
	}

	/// `reindexing -> stable` with `active := target` and `generation += 1`,
	/// as one conditional write. A losing concurrent promote observes a
	/// conflict instead of double-incrementing.
	pub async fn promote(&self, tenant_id: &str) -> ServiceResult<WorkspaceIndexState> {
		let current = self.fresh_state(tenant_id).await?;

		if !current.is_reindexing() {
			return Err(ServiceError::InvalidRequest {
				message: format!("Tenant {tenant_id} has no reindex in flight to promote."),
			});
		}

		let updated = self
			.store
			.promote(tenant_id, current.index_generation, OffsetDateTime::now_utc())
			.await?;

		self.invalidate(tenant_id);

		if !updated {
			return Err(ServiceError::Conflict {
				message: format!("Concurrent promotion for tenant {tenant_id}; re-read and retry."),
			});
		}

		let promoted = self.fresh_state(tenant_id).await?;

		self.publish_shard_generations(tenant_id, promoted.index_generation).await;

		Ok(promoted)
	}

	/// `reindexing -> stable` restoring the recorded previous active version.
	/// The generation is unchanged: no data was ever served from the target.
	pub async fn rollback(&self, tenant_id: &str) -> ServiceResult<WorkspaceIndexState> {
		let current = self.fresh_state(tenant_id).await?;

		if !current.is_reindexing() {
			return Err(ServiceError::InvalidRequest {
				message: format!("Tenant {tenant_id} has no reindex in flight to roll back."),
			});
		}

		let updated = self
			.store
			.rollback(tenant_id, current.index_generation, OffsetDateTime::now_utc())
			.await?;

		self.invalidate(tenant_id);

		if !updated {
			return Err(ServiceError::Conflict {
				message: format!("Concurrent rollback for tenant {tenant_id}; re-read and retry."),
			});
		}

		self.fresh_state(tenant_id).await
	}

	/// Publishes the new generation to every shard's state row. A shard left
	/// behind by a partial failure is exactly what the strict consistency
	/// check exists to catch, so failures here degrade to a warning.
	async fn publish_shard_generations(&self, tenant_id: &str, generation: u64) {
		let now = OffsetDateTime::now_utc();

		for shard in &self.shard_names {
			if let Err(err) =
				self.shard_states.set_generation(shard, tenant_id, generation, now).await
			{
				tracing::warn!(
					error = %err,
					shard = shard.as_str(),
					tenant_id,
					generation,
					"Failed to publish shard generation after promotion.",
				);
			}
		}
	}
}
