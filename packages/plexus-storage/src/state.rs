use sqlx::Row;
use time::OffsetDateTime;

use crate::{BoxFuture, Result, db::Db, models::WorkspaceIndexState};

/// Per-tenant index state with atomic conditional updates.
///
/// Every mutation is keyed on the generation the caller last observed, so a
/// read-modify-write race resolves to exactly one winner; the loser sees
/// `false` and surfaces a conflict instead of double-applying.
pub trait IndexStateStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, tenant_id: &'a str)
	-> BoxFuture<'a, Result<Option<WorkspaceIndexState>>>;

	/// Inserts the baseline row if the tenant has none, then returns whatever
	/// row is current (another replica may have won the insert).
	fn init_baseline<'a>(
		&'a self,
		state: WorkspaceIndexState,
	) -> BoxFuture<'a, Result<WorkspaceIndexState>>;

	fn set_target<'a>(
		&'a self,
		tenant_id: &'a str,
		target_version: &'a str,
		expected_generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>>;

	fn promote<'a>(
		&'a self,
		tenant_id: &'a str,
		expected_generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>>;

	fn rollback<'a>(
		&'a self,
		tenant_id: &'a str,
		expected_generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>>;
}

/// Per-shard reported generation, used by the strict consistency check.
pub trait ShardStateStore
where
	Self: Send + Sync,
{
	fn generation<'a>(&'a self, shard: &'a str, tenant_id: &'a str) -> BoxFuture<'a, Result<u64>>;

	fn set_generation<'a>(
		&'a self,
		shard: &'a str,
		tenant_id: &'a str,
		generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;
}

pub struct PgIndexStateStore {
	db: Db,
}

impl PgIndexStateStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}
}

fn row_to_state(row: &sqlx::postgres::PgRow) -> Result<WorkspaceIndexState> {
	Ok(WorkspaceIndexState {
		tenant_id: row.try_get("tenant_id")?,
		active_embedding_version: row.try_get("active_embedding_version")?,
		target_embedding_version: row.try_get("target_embedding_version")?,
		previous_embedding_version: row.try_get("previous_embedding_version")?,
		index_generation: row.try_get::<i64, _>("index_generation")?.max(0) as u64,
		updated_at: row.try_get("updated_at")?,
	})
}

impl IndexStateStore for PgIndexStateStore {
	fn get<'a>(
		&'a self,
		tenant_id: &'a str,
	) -> BoxFuture<'a, Result<Option<WorkspaceIndexState>>> {
		Box::pin(async move {
			let row = sqlx::query(
				"\
SELECT tenant_id, active_embedding_version, target_embedding_version,
	previous_embedding_version, index_generation, updated_at
FROM index_states
WHERE tenant_id = $1",
			)
			.bind(tenant_id)
			.fetch_optional(&self.db.pool)
			.await?;

			row.as_ref().map(row_to_state).transpose()
		})
	}

	fn init_baseline<'a>(
		&'a self,
		state: WorkspaceIndexState,
	) -> BoxFuture<'a, Result<WorkspaceIndexState>> {
		Box::pin(async move {
			sqlx::query(
				"\
INSERT INTO index_states (
	tenant_id,
	active_embedding_version,
	target_embedding_version,
	previous_embedding_version,
	index_generation,
	updated_at
)
VALUES ($1, $2, NULL, NULL, $3, $4)
ON CONFLICT (tenant_id) DO NOTHING",
			)
			.bind(state.tenant_id.as_str())
			.bind(state.active_embedding_version.as_str())
			.bind(state.index_generation as i64)
			.bind(state.updated_at)
			.execute(&self.db.pool)
			.await?;

			let current = self.get(&state.tenant_id).await?;

			current.ok_or_else(|| {
				crate::Error::NotFound(format!("index state for tenant {}", state.tenant_id))
			})
		})
	}

	fn set_target<'a>(
		&'a self,
		tenant_id: &'a str,
		target_version: &'a str,
		expected_generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let result = sqlx::query(
				"\
UPDATE index_states
SET target_embedding_version = $2,
	previous_embedding_version = active_embedding_version,
	updated_at = $4
WHERE tenant_id = $1
	AND index_generation = $3
	AND target_embedding_version IS NULL",
			)
			.bind(tenant_id)
			.bind(target_version)
			.bind(expected_generation as i64)
			.bind(now)
			.execute(&self.db.pool)
			.await?;

			Ok(result.rows_affected() == 1)
		})
	}

	fn promote<'a>(
		&'a self,
		tenant_id: &'a str,
		expected_generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let result = sqlx::query(
				"\
UPDATE index_states
SET active_embedding_version = target_embedding_version,
	target_embedding_version = NULL,
	index_generation = index_generation + 1,
	updated_at = $3
WHERE tenant_id = $1
	AND index_generation = $2
	AND target_embedding_version IS NOT NULL",
			)
			.bind(tenant_id)
			.bind(expected_generation as i64)
			.bind(now)
			.execute(&self.db.pool)
			.await?;

			Ok(result.rows_affected() == 1)
		})
	}

	fn rollback<'a>(
		&'a self,
		tenant_id: &'a str,
		expected_generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			// Restore the explicitly recorded previous version; the target may
			// have been partially promoted by a failed canary.
			let result = sqlx::query(
				"\
UPDATE index_states
SET active_embedding_version = COALESCE(previous_embedding_version, active_embedding_version),
	target_embedding_version = NULL,
	updated_at = $3
WHERE tenant_id = $1
	AND index_generation = $2
	AND target_embedding_version IS NOT NULL",
			)
			.bind(tenant_id)
			.bind(expected_generation as i64)
			.bind(now)
			.execute(&self.db.pool)
			.await?;

			Ok(result.rows_affected() == 1)
		})
	}
}

pub struct PgShardStateStore {
	db: Db,
}

impl PgShardStateStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}
}

impl ShardStateStore for PgShardStateStore {
	fn generation<'a>(&'a self, shard: &'a str, tenant_id: &'a str) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let row = sqlx::query(
				"SELECT index_generation FROM shard_generations WHERE shard_name = $1 AND tenant_id = $2",
			)
			.bind(shard)
			.bind(tenant_id)
			.fetch_optional(&self.db.pool)
			.await?;

			Ok(row
				.map(|row| row.try_get::<i64, _>("index_generation").map(|v| v.max(0) as u64))
				.transpose()?
				.unwrap_or(0))
		})
	}

	fn set_generation<'a>(
		&'a self,
		shard: &'a str,
		tenant_id: &'a str,
		generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query(
				"\
INSERT INTO shard_generations (shard_name, tenant_id, index_generation, updated_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (shard_name, tenant_id) DO UPDATE
SET index_generation = EXCLUDED.index_generation,
	updated_at = EXCLUDED.updated_at",
			)
			.bind(shard)
			.bind(tenant_id)
			.bind(generation as i64)
			.bind(now)
			.execute(&self.db.pool)
			.await?;

			Ok(())
		})
	}
}
