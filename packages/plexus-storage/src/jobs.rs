use sqlx::Row;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{BoxFuture, Result, db::Db, models::ReindexJob};

const MAX_JOB_ERROR_CHARS: usize = 1_024;

/// Queue of pending reindex runs, claimed by worker replicas with a lease.
pub trait ReindexJobStore
where
	Self: Send + Sync,
{
	fn enqueue<'a>(
		&'a self,
		tenant_id: &'a str,
		target_version: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Uuid>>;

	/// Claims the oldest runnable job and pushes its `available_at` forward by
	/// the lease so other replicas skip it while this one works.
	fn claim<'a>(
		&'a self,
		now: OffsetDateTime,
		lease: Duration,
	) -> BoxFuture<'a, Result<Option<ReindexJob>>>;

	fn mark_done<'a>(&'a self, job_id: Uuid, now: OffsetDateTime) -> BoxFuture<'a, Result<()>>;

	fn mark_failed<'a>(
		&'a self,
		job_id: Uuid,
		attempts: i32,
		error: &'a str,
		available_at: OffsetDateTime,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;
}

/// Trims oversized error text and redacts obvious credential material before
/// it lands in a shared table.
pub fn sanitize_job_error(text: &str) -> String {
	let mut parts = Vec::new();
	let mut redact_next = false;

	for raw in text.split_whitespace() {
		let mut word = raw.to_string();

		if redact_next {
			word = "[REDACTED]".to_string();
			redact_next = false;
		}
		if raw.eq_ignore_ascii_case("bearer") {
			redact_next = true;
		}

		let lowered = raw.to_ascii_lowercase();

		for key in ["api_key", "apikey", "password", "secret", "token"] {
			if lowered.contains(key) && (lowered.contains('=') || lowered.contains(':')) {
				let sep = if raw.contains('=') { '=' } else { ':' };
				let prefix = match raw.split(sep).next() {
					Some(prefix) => prefix,
					None => raw,
				};

				word = format!("{prefix}{sep}[REDACTED]");

				break;
			}
		}

		parts.push(word);
	}

	let mut out = parts.join(" ");

	if out.chars().count() > MAX_JOB_ERROR_CHARS {
		out = out.chars().take(MAX_JOB_ERROR_CHARS).collect();
		out.push_str("...");
	}

	out
}

pub struct PgReindexJobStore {
	db: Db,
}

impl PgReindexJobStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<ReindexJob> {
	Ok(ReindexJob {
		job_id: row.try_get("job_id")?,
		tenant_id: row.try_get("tenant_id")?,
		target_version: row.try_get("target_version")?,
		status: row.try_get("status")?,
		attempts: row.try_get("attempts")?,
		last_error: row.try_get("last_error")?,
		available_at: row.try_get("available_at")?,
		created_at: row.try_get("created_at")?,
		updated_at: row.try_get("updated_at")?,
	})
}

impl ReindexJobStore for PgReindexJobStore {
	fn enqueue<'a>(
		&'a self,
		tenant_id: &'a str,
		target_version: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Uuid>> {
		Box::pin(async move {
			let job_id = Uuid::new_v4();

			sqlx::query(
				"\
INSERT INTO reindex_jobs (
	job_id,
	tenant_id,
	target_version,
	status,
	attempts,
	available_at,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, 'PENDING', 0, $4, $5, $6)",
			)
			.bind(job_id)
			.bind(tenant_id)
			.bind(target_version)
			.bind(now)
			.bind(now)
			.bind(now)
			.execute(&self.db.pool)
			.await?;

			Ok(job_id)
		})
	}

	fn claim<'a>(
		&'a self,
		now: OffsetDateTime,
		lease: Duration,
	) -> BoxFuture<'a, Result<Option<ReindexJob>>> {
		Box::pin(async move {
			let mut tx = self.db.pool.begin().await?;
			let row = sqlx::query(
				"\
SELECT job_id, tenant_id, target_version, status, attempts, last_error,
	available_at, created_at, updated_at
FROM reindex_jobs
WHERE status IN ('PENDING', 'FAILED') AND available_at <= $1
ORDER BY available_at ASC
LIMIT 1
FOR UPDATE SKIP LOCKED",
			)
			.bind(now)
			.fetch_optional(&mut *tx)
			.await?;
			let job = if let Some(row) = row {
				let mut job = row_to_job(&row)?;
				let lease_until = now + lease;

				sqlx::query(
					"UPDATE reindex_jobs SET available_at = $1, updated_at = $2 WHERE job_id = $3",
				)
				.bind(lease_until)
				.bind(now)
				.bind(job.job_id)
				.execute(&mut *tx)
				.await?;

				job.available_at = lease_until;
				job.updated_at = now;

				Some(job)
			} else {
				None
			};

			tx.commit().await?;

			Ok(job)
		})
	}

	fn mark_done<'a>(&'a self, job_id: Uuid, now: OffsetDateTime) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query("UPDATE reindex_jobs SET status = 'DONE', updated_at = $1 WHERE job_id = $2")
				.bind(now)
				.bind(job_id)
				.execute(&self.db.pool)
				.await?;

			Ok(())
		})
	}

	fn mark_failed<'a>(
		&'a self,
		job_id: Uuid,
		attempts: i32,
		error: &'a str,
		available_at: OffsetDateTime,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let error_text = sanitize_job_error(error);

			sqlx::query(
				"\
UPDATE reindex_jobs
SET status = 'FAILED',
	attempts = $1,
	last_error = $2,
	available_at = $3,
	updated_at = $4
WHERE job_id = $5",
			)
			.bind(attempts)
			.bind(error_text.as_str())
			.bind(available_at)
			.bind(now)
			.bind(job_id)
			.execute(&self.db.pool)
			.await?;

			Ok(())
		})
	}
}
