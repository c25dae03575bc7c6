use time::OffsetDateTime;
use uuid::Uuid;

use crate::{BoxFuture, Result, db::Db, models::ChunkRecord};

/// Chunk/embedding rows written by the reindex backfill and read by the
/// reranker's batch embedding fetch.
///
/// Upserts are idempotent per `(document_id, chunk_index, embedding_version)`
/// so reruns after a partial failure are safe. Embedding vectors are
/// immutable once written under a given version.
pub trait ChunkStore
where
	Self: Send + Sync,
{
	fn upsert_chunk<'a>(
		&'a self,
		record: &'a ChunkRecord,
		vector: &'a [f32],
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;

	fn fetch_embeddings<'a>(
		&'a self,
		tenant_id: &'a str,
		embedding_version: &'a str,
		chunk_ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<(Uuid, Vec<f32>)>>>;

	fn count_chunks<'a>(
		&'a self,
		tenant_id: &'a str,
		embedding_version: &'a str,
	) -> BoxFuture<'a, Result<u64>>;
}

pub struct PgChunkStore {
	db: Db,
}

impl PgChunkStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}
}

impl ChunkStore for PgChunkStore {
	fn upsert_chunk<'a>(
		&'a self,
		record: &'a ChunkRecord,
		vector: &'a [f32],
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query(
				"\
INSERT INTO document_chunks (
	chunk_id,
	document_id,
	tenant_id,
	chunk_index,
	text,
	embedding_version,
	vec,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (document_id, chunk_index, embedding_version) DO UPDATE
SET text = EXCLUDED.text,
	vec = EXCLUDED.vec",
			)
			.bind(record.chunk_id)
			.bind(record.document_id)
			.bind(record.tenant_id.as_str())
			.bind(record.chunk_index)
			.bind(record.text.as_str())
			.bind(record.embedding_version.as_str())
			.bind(vector)
			.bind(now)
			.execute(&self.db.pool)
			.await?;

			Ok(())
		})
	}

	fn fetch_embeddings<'a>(
		&'a self,
		tenant_id: &'a str,
		embedding_version: &'a str,
		chunk_ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<(Uuid, Vec<f32>)>>> {
		Box::pin(async move {
			if chunk_ids.is_empty() {
				return Ok(Vec::new());
			}

			let rows = sqlx::query_as::<_, (Uuid, Vec<f32>)>(
				"\
SELECT chunk_id, vec
FROM document_chunks
WHERE tenant_id = $1 AND embedding_version = $2 AND chunk_id = ANY($3)",
			)
			.bind(tenant_id)
			.bind(embedding_version)
			.bind(chunk_ids)
			.fetch_all(&self.db.pool)
			.await?;

			Ok(rows)
		})
	}

	fn count_chunks<'a>(
		&'a self,
		tenant_id: &'a str,
		embedding_version: &'a str,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let count: i64 = sqlx::query_scalar(
				"SELECT COUNT(*) FROM document_chunks WHERE tenant_id = $1 AND embedding_version = $2",
			)
			.bind(tenant_id)
			.bind(embedding_version)
			.fetch_one(&self.db.pool)
			.await?;

			Ok(count.max(0) as u64)
		})
	}
}
