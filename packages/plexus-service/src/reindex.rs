use std::time::Duration;

use time::OffsetDateTime;

use plexus_domain::RollingSloWindow;
use plexus_providers::RetryPolicy;
use plexus_storage::{
	docs::DocumentSource,
	models::{ChunkRecord, DocumentInput},
};

use crate::{
	PlexusService, ServiceError, ServiceResult,
	pipeline::{PipelineOptions, SearchRequest},
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CanaryReport {
	pub queries: u32,
	pub p95_latency_ms: f64,
	pub error_rate: f64,
	pub passed: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReindexReport {
	pub tenant_id: String,
	pub target_version: String,
	pub promoted: bool,
	pub documents: usize,
	pub chunks_written: usize,
	pub canary: Option<CanaryReport>,
}

impl PlexusService {
	/// Drives one full reindex: `set_target` -> idempotent backfill ->
	/// bounded canary -> promote or rollback. Never promotes partially: a
	/// failed backfill or canary rolls the lifecycle state back to the
	/// previous active version.
	pub async fn run_reindex(
		&self,
		tenant_id: &str,
		target_version: &str,
		source: &dyn DocumentSource,
	) -> ServiceResult<ReindexReport> {
		self.begin_reindex(tenant_id, target_version).await?;

		let documents = match source.documents(tenant_id).await {
			Ok(documents) => documents,
			Err(err) => {
				return self.fail_reindex(tenant_id, target_version, &err.to_string()).await;
			},
		};
		let mut chunks_written = 0_usize;
		let mut canary_queries: Vec<String> = Vec::new();

		for document in &documents {
			match self.backfill_document(tenant_id, target_version, document).await {
				Ok(written) => {
					chunks_written += written;

					for text in &document.chunks {
						if canary_queries.len() < self.cfg.reindex.canary_queries as usize {
							canary_queries.push(text.clone());
						}
					}
				},
				Err(err) => {
					return self.fail_reindex(tenant_id, target_version, &err.to_string()).await;
				},
			}
		}

		if canary_queries.is_empty() {
			// Nothing to validate against; an empty tenant promotes directly.
			self.lifecycle.promote(tenant_id).await?;

			return Ok(ReindexReport {
				tenant_id: tenant_id.to_string(),
				target_version: target_version.to_string(),
				promoted: true,
				documents: documents.len(),
				chunks_written,
				canary: None,
			});
		}

		let canary = self.run_canary(tenant_id, target_version, &canary_queries).await;

		if canary.passed {
			self.lifecycle.promote(tenant_id).await?;
		} else {
			tracing::warn!(
				tenant_id,
				target_version,
				p95_latency_ms = canary.p95_latency_ms,
				error_rate = canary.error_rate,
				"Canary thresholds violated; rolling back.",
			);
			self.lifecycle.rollback(tenant_id).await?;
		}

		Ok(ReindexReport {
			tenant_id: tenant_id.to_string(),
			target_version: target_version.to_string(),
			promoted: canary.passed,
			documents: documents.len(),
			chunks_written,
			canary: Some(canary),
		})
	}

	/// Enters the `reindexing` state, tolerating a rerun that targets the
	/// same version after a partial failure.
	async fn begin_reindex(&self, tenant_id: &str, target_version: &str) -> ServiceResult<()> {
		match self.lifecycle.set_target(tenant_id, target_version).await {
			Ok(_) => Ok(()),
			Err(ServiceError::Conflict { message }) => {
				let current = self.lifecycle.fresh_state(tenant_id).await?;

				if current.target_embedding_version.as_deref() == Some(target_version) {
					tracing::info!(tenant_id, target_version, "Resuming an in-flight reindex.");

					Ok(())
				} else {
					Err(ServiceError::Conflict { message })
				}
			},
			Err(err) => Err(err),
		}
	}

	/// Embeds and writes one document's chunks under the target version.
	/// Transient failures retry with exponential backoff and jitter; writes
	/// are keyed `(document_id, chunk_index, version)` so reruns are safe.
	async fn backfill_document(
		&self,
		tenant_id: &str,
		target_version: &str,
		document: &DocumentInput,
	) -> ServiceResult<usize> {
		if document.chunks.is_empty() {
			return Ok(0);
		}

		let policy = RetryPolicy::new(
			self.cfg.reindex.max_retries,
			Duration::from_millis(self.cfg.reindex.base_backoff_ms),
			Duration::from_millis(self.cfg.reindex.max_backoff_ms),
		);
		let vectors = self
			.with_backfill_retry(&policy, || self.backends.embedding.embed(&document.chunks))
			.await?;

		if vectors.len() != document.chunks.len() {
			return Err(ServiceError::Provider {
				message: format!(
					"Embedding provider returned {} vectors for {} chunks.",
					vectors.len(),
					document.chunks.len()
				),
			});
		}

		let records: Vec<ChunkRecord> = document
			.chunks
			.iter()
			.enumerate()
			.map(|(index, text)| ChunkRecord {
				chunk_id: ChunkRecord::id_for(document.document_id, index as i32, target_version),
				document_id: document.document_id,
				tenant_id: tenant_id.to_string(),
				chunk_index: index as i32,
				text: text.clone(),
				embedding_version: target_version.to_string(),
			})
			.collect();
		let now = OffsetDateTime::now_utc();

		for (record, vector) in records.iter().zip(vectors.iter()) {
			let mut attempt = 0_u32;

			loop {
				attempt += 1;

				match self.stores.chunks.upsert_chunk(record, vector, now).await {
					Ok(()) => break,
					Err(err) if attempt >= policy.max_attempts => {
						return Err(ServiceError::Storage { message: err.to_string() });
					},
					Err(err) => {
						let backoff = policy.backoff_for_attempt(attempt);

						tracing::warn!(
							error = %err,
							chunk_id = %record.chunk_id,
							attempt,
							"Chunk write failed; backing off.",
						);
						tokio::time::sleep(backoff).await;
					},
				}
			}
		}

		let shard_key = document.document_id.to_string();
		let Some(shard) = self.router.shard_for_document(&shard_key) else {
			return Err(ServiceError::Storage {
				message: "No shard is configured to own this document.".to_string(),
			});
		};

		self.with_backfill_retry(&policy, || {
			self.backends.shards.index_chunks(&shard, &records, &vectors)
		})
		.await?;

		Ok(records.len())
	}

	async fn with_backfill_retry<T, F>(
		&self,
		policy: &RetryPolicy,
		mut operation: impl FnMut() -> F,
	) -> ServiceResult<T>
	where
		F: std::future::Future<Output = color_eyre::Result<T>>,
	{
		let mut attempt = 0_u32;

		loop {
			attempt += 1;

			match operation().await {
				Ok(value) => return Ok(value),
				Err(err) if attempt >= policy.max_attempts => {
					return Err(ServiceError::Provider { message: err.to_string() });
				},
				Err(err) => {
					let backoff = policy.backoff_for_attempt(attempt);

					tracing::warn!(
						error = %err,
						attempt,
						backoff_ms = backoff.as_millis() as u64,
						"Backfill step failed; backing off.",
					);
					tokio::time::sleep(backoff).await;
				},
			}
		}
	}

	/// Directs a bounded batch of traffic through the real pipeline under the
	/// target version via the admin override, then judges p95 and error rate
	/// against the configured thresholds.
	async fn run_canary(
		&self,
		tenant_id: &str,
		target_version: &str,
		queries: &[String],
	) -> CanaryReport {
		let window = RollingSloWindow::new(queries.len().max(1));
		let admin_token = self.cfg.security.admin_auth_token.clone();

		for query in queries {
			let request = SearchRequest {
				tenant_id: tenant_id.to_string(),
				query: query.clone(),
				query_vector: None,
				top_k: None,
				rerank_candidates: None,
				experiment: None,
				embedding_version_override: Some(target_version.to_string()),
				admin_token: admin_token.clone(),
			};
			let started = std::time::Instant::now();
			let canary_fanout = self.router.shard_count() as u32;
			let outcome =
				self.search_with_options(request, PipelineOptions::canary(canary_fanout)).await;
			let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

			match outcome {
				Ok(response) => {
					// Canary queries are chunk texts that exist under the
					// target version; an empty answer means the new index is
					// not serving them.
					let empty = response.candidates.is_empty();

					window.observe(latency_ms, empty, empty);
				},
				Err(err) => {
					tracing::warn!(error = %err, "Canary query failed.");
					window.observe(latency_ms, true, true);
				},
			}
		}

		let snapshot = window.snapshot();
		let passed = snapshot.p95_latency_ms <= self.cfg.reindex.canary_max_p95_ms
			&& snapshot.error_rate <= self.cfg.reindex.canary_max_error_rate;

		CanaryReport {
			queries: queries.len() as u32,
			p95_latency_ms: snapshot.p95_latency_ms,
			error_rate: snapshot.error_rate,
			passed,
		}
	}

	/// Rolls back after a failed backfill and surfaces the failure.
	async fn fail_reindex(
		&self,
		tenant_id: &str,
		target_version: &str,
		message: &str,
	) -> ServiceResult<ReindexReport> {
		tracing::error!(tenant_id, target_version, error = message, "Reindex backfill failed.");

		if let Err(err) = self.lifecycle.rollback(tenant_id).await {
			tracing::error!(error = %err, tenant_id, "Rollback after failed backfill also failed.");
		}

		Err(ServiceError::ReindexFailed { message: message.to_string() })
	}
}
