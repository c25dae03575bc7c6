use std::{sync::Arc, time::Duration as StdDuration};

use time::{Duration, OffsetDateTime};

use plexus_service::{PlexusService, ServiceError};
use plexus_storage::{docs::DocumentSource, models::ReindexJob};

const BASE_BACKOFF_MS: i64 = 500;
const MAX_BACKOFF_MS: i64 = 30_000;

pub struct WorkerState {
	pub service: Arc<PlexusService>,
	pub documents: Arc<dyn DocumentSource>,
}

/// Claims queued reindex jobs and drives the backfill -> canary ->
/// promote/rollback sequence for each. Failed jobs are retried with
/// exponential backoff; a rolled-back canary is a completed job, not a
/// failure.
pub async fn run_worker(state: WorkerState) -> color_eyre::Result<()> {
	let poll_interval = StdDuration::from_millis(state.service.cfg.reindex.poll_interval_ms);

	loop {
		if let Err(err) = process_one_job(&state).await {
			tracing::error!(error = %err, "Reindex job processing failed.");
		}

		tokio::time::sleep(poll_interval).await;
	}
}

/// Processes at most one claimed job. Returns whether a job was found.
pub async fn process_one_job(state: &WorkerState) -> color_eyre::Result<bool> {
	let now = OffsetDateTime::now_utc();
	let lease = Duration::seconds(state.service.cfg.reindex.claim_lease_s);
	let job = state
		.service
		.stores
		.jobs
		.claim(now, lease)
		.await
		.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?;
	let Some(job) = job else {
		return Ok(false);
	};

	tracing::info!(
		job_id = %job.job_id,
		tenant_id = job.tenant_id.as_str(),
		target_version = job.target_version.as_str(),
		attempts = job.attempts,
		"Claimed reindex job.",
	);

	match state
		.service
		.run_reindex(&job.tenant_id, &job.target_version, &*state.documents)
		.await
	{
		Ok(report) => {
			tracing::info!(
				job_id = %job.job_id,
				promoted = report.promoted,
				documents = report.documents,
				chunks_written = report.chunks_written,
				"Reindex job finished.",
			);
			state
				.service
				.stores
				.jobs
				.mark_done(job.job_id, OffsetDateTime::now_utc())
				.await
				.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?;
		},
		Err(err) => {
			mark_job_failed(state, &job, &err).await?;
		},
	}

	Ok(true)
}

async fn mark_job_failed(
	state: &WorkerState,
	job: &ReindexJob,
	err: &ServiceError,
) -> color_eyre::Result<()> {
	let next_attempts = job.attempts.saturating_add(1);
	let backoff = backoff_for_attempt(next_attempts);
	let now = OffsetDateTime::now_utc();
	let available_at = now + backoff;

	tracing::error!(
		error = %err,
		job_id = %job.job_id,
		attempts = next_attempts,
		backoff_ms = backoff.whole_milliseconds() as i64,
		"Reindex job failed.",
	);
	state
		.service
		.stores
		.jobs
		.mark_failed(job.job_id, next_attempts, &err.to_string(), available_at, now)
		.await
		.map_err(|err| color_eyre::eyre::eyre!(err.to_string()))?;

	Ok(())
}

fn backoff_for_attempt(attempt: i32) -> Duration {
	let attempts = attempt.max(1) as u32;
	let exp = attempts.saturating_sub(1).min(6);
	let base = BASE_BACKOFF_MS.saturating_mul(1 << exp);
	let capped = base.min(MAX_BACKOFF_MS);

	Duration::milliseconds(capped)
}
