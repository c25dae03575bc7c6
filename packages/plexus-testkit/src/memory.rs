use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex,
		atomic::{AtomicU64, Ordering},
	},
};

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use plexus_storage::{
	BoxFuture, Error, Result,
	chunks::ChunkStore,
	docs::DocumentSource,
	jobs::ReindexJobStore,
	lock::DistributedLock,
	models::{ChunkRecord, DocumentInput, ReindexJob, RemediationOverride, WorkspaceIndexState},
	overrides::OverrideStore,
	state::{IndexStateStore, ShardStateStore},
};

/// In-memory index state rows with the same compare-and-swap semantics as the
/// Postgres store: every mutation is serialized through one mutex and keyed
/// on the caller's observed generation.
#[derive(Default)]
pub struct InMemoryIndexStateStore {
	states: Mutex<HashMap<String, WorkspaceIndexState>>,
}

impl InMemoryIndexStateStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl IndexStateStore for InMemoryIndexStateStore {
	fn get<'a>(
		&'a self,
		tenant_id: &'a str,
	) -> BoxFuture<'a, Result<Option<WorkspaceIndexState>>> {
		Box::pin(async move {
			let states = self.states.lock().unwrap_or_else(|err| err.into_inner());

			Ok(states.get(tenant_id).cloned())
		})
	}

	fn init_baseline<'a>(
		&'a self,
		state: WorkspaceIndexState,
	) -> BoxFuture<'a, Result<WorkspaceIndexState>> {
		Box::pin(async move {
			let mut states = self.states.lock().unwrap_or_else(|err| err.into_inner());

			Ok(states.entry(state.tenant_id.clone()).or_insert(state).clone())
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
			let mut states = self.states.lock().unwrap_or_else(|err| err.into_inner());
			let Some(state) = states.get_mut(tenant_id) else { return Ok(false) };

			if state.index_generation != expected_generation
				|| state.target_embedding_version.is_some()
			{
				return Ok(false);
			}

			state.previous_embedding_version = Some(state.active_embedding_version.clone());
			state.target_embedding_version = Some(target_version.to_string());
			state.updated_at = now;

			Ok(true)
		})
	}

	fn promote<'a>(
		&'a self,
		tenant_id: &'a str,
		expected_generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut states = self.states.lock().unwrap_or_else(|err| err.into_inner());
			let Some(state) = states.get_mut(tenant_id) else { return Ok(false) };

			if state.index_generation != expected_generation {
				return Ok(false);
			}

			let Some(target) = state.target_embedding_version.take() else { return Ok(false) };

			state.active_embedding_version = target;
			state.index_generation += 1;
			state.updated_at = now;

			Ok(true)
		})
	}

	fn rollback<'a>(
		&'a self,
		tenant_id: &'a str,
		expected_generation: u64,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut states = self.states.lock().unwrap_or_else(|err| err.into_inner());
			let Some(state) = states.get_mut(tenant_id) else { return Ok(false) };

			if state.index_generation != expected_generation
				|| state.target_embedding_version.is_none()
			{
				return Ok(false);
			}
			if let Some(previous) = state.previous_embedding_version.clone() {
				state.active_embedding_version = previous;
			}

			state.target_embedding_version = None;
			state.updated_at = now;

			Ok(true)
		})
	}
}

#[derive(Default)]
pub struct InMemoryShardStateStore {
	generations: Mutex<HashMap<(String, String), u64>>,
}

impl InMemoryShardStateStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl ShardStateStore for InMemoryShardStateStore {
	fn generation<'a>(&'a self, shard: &'a str, tenant_id: &'a str) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let generations = self.generations.lock().unwrap_or_else(|err| err.into_inner());

			Ok(generations.get(&(shard.to_string(), tenant_id.to_string())).copied().unwrap_or(0))
		})
	}

	fn set_generation<'a>(
		&'a self,
		shard: &'a str,
		tenant_id: &'a str,
		generation: u64,
		_now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut generations = self.generations.lock().unwrap_or_else(|err| err.into_inner());

			generations.insert((shard.to_string(), tenant_id.to_string()), generation);

			Ok(())
		})
	}
}

#[derive(Default)]
pub struct InMemoryOverrideStore {
	current: Mutex<Option<RemediationOverride>>,
}

impl InMemoryOverrideStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl OverrideStore for InMemoryOverrideStore {
	fn get<'a>(&'a self) -> BoxFuture<'a, Result<Option<RemediationOverride>>> {
		Box::pin(async move {
			Ok(self.current.lock().unwrap_or_else(|err| err.into_inner()).clone())
		})
	}

	fn set<'a>(
		&'a self,
		forced_experiment: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut current = self.current.lock().unwrap_or_else(|err| err.into_inner());

			*current = Some(RemediationOverride {
				forced_experiment: forced_experiment.to_string(),
				applied_at: now,
			});

			Ok(())
		})
	}

	fn clear<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			*self.current.lock().unwrap_or_else(|err| err.into_inner()) = None;

			Ok(())
		})
	}
}

/// Shared state for a simulated cluster lock; each replica gets its own
/// handle, and exactly one handle can hold the lock at a time.
#[derive(Clone, Default)]
pub struct LockGroup {
	holder: Arc<Mutex<Option<u64>>>,
	next_id: Arc<AtomicU64>,
}

impl LockGroup {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn handle(&self) -> InMemoryLock {
		InMemoryLock {
			holder: self.holder.clone(),
			id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
		}
	}

	/// Simulates another replica seizing the lock out from under every
	/// existing handle.
	pub fn preempt(&self) {
		*self.holder.lock().unwrap_or_else(|err| err.into_inner()) = Some(u64::MAX);
	}

	pub fn release_all(&self) {
		*self.holder.lock().unwrap_or_else(|err| err.into_inner()) = None;
	}
}

pub struct InMemoryLock {
	holder: Arc<Mutex<Option<u64>>>,
	id: u64,
}

impl DistributedLock for InMemoryLock {
	fn try_acquire<'a>(&'a self) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut holder = self.holder.lock().unwrap_or_else(|err| err.into_inner());

			match *holder {
				None => {
					*holder = Some(self.id);

					Ok(true)
				},
				Some(current) => Ok(current == self.id),
			}
		})
	}

	fn release<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut holder = self.holder.lock().unwrap_or_else(|err| err.into_inner());

			if *holder == Some(self.id) {
				*holder = None;
			}

			Ok(())
		})
	}
}

/// In-memory chunk rows keyed `(document_id, chunk_index, embedding_version)`
/// with optional injected write failures for retry tests.
#[derive(Default)]
pub struct InMemoryChunkStore {
	chunks: Mutex<HashMap<(Uuid, i32, String), (ChunkRecord, Vec<f32>)>>,
	fail_upserts: Mutex<u32>,
}

impl InMemoryChunkStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail_next_upserts(&self, count: u32) {
		*self.fail_upserts.lock().unwrap_or_else(|err| err.into_inner()) = count;
	}

	pub fn chunk_ids(&self, embedding_version: &str) -> Vec<Uuid> {
		let chunks = self.chunks.lock().unwrap_or_else(|err| err.into_inner());
		let mut ids: Vec<Uuid> = chunks
			.values()
			.filter(|(record, _)| record.embedding_version == embedding_version)
			.map(|(record, _)| record.chunk_id)
			.collect();

		ids.sort();

		ids
	}
}

impl ChunkStore for InMemoryChunkStore {
	fn upsert_chunk<'a>(
		&'a self,
		record: &'a ChunkRecord,
		vector: &'a [f32],
		_now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			{
				let mut fail = self.fail_upserts.lock().unwrap_or_else(|err| err.into_inner());

				if *fail > 0 {
					*fail -= 1;

					return Err(Error::InvalidArgument("Injected chunk write failure.".to_string()));
				}
			}

			let mut chunks = self.chunks.lock().unwrap_or_else(|err| err.into_inner());

			chunks.insert(
				(record.document_id, record.chunk_index, record.embedding_version.clone()),
				(record.clone(), vector.to_vec()),
			);

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
			let chunks = self.chunks.lock().unwrap_or_else(|err| err.into_inner());
			let out = chunks
				.values()
				.filter(|(record, _)| {
					record.tenant_id == tenant_id
						&& record.embedding_version == embedding_version
						&& chunk_ids.contains(&record.chunk_id)
				})
				.map(|(record, vector)| (record.chunk_id, vector.clone()))
				.collect();

			Ok(out)
		})
	}

	fn count_chunks<'a>(
		&'a self,
		tenant_id: &'a str,
		embedding_version: &'a str,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let chunks = self.chunks.lock().unwrap_or_else(|err| err.into_inner());
			let count = chunks
				.values()
				.filter(|(record, _)| {
					record.tenant_id == tenant_id && record.embedding_version == embedding_version
				})
				.count();

			Ok(count as u64)
		})
	}
}

#[derive(Default)]
pub struct InMemoryReindexJobStore {
	jobs: Mutex<Vec<ReindexJob>>,
}

impl InMemoryReindexJobStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn jobs(&self) -> Vec<ReindexJob> {
		self.jobs.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}

impl ReindexJobStore for InMemoryReindexJobStore {
	fn enqueue<'a>(
		&'a self,
		tenant_id: &'a str,
		target_version: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Uuid>> {
		Box::pin(async move {
			let mut jobs = self.jobs.lock().unwrap_or_else(|err| err.into_inner());
			let job_id = Uuid::new_v4();

			jobs.push(ReindexJob {
				job_id,
				tenant_id: tenant_id.to_string(),
				target_version: target_version.to_string(),
				status: "PENDING".to_string(),
				attempts: 0,
				last_error: None,
				available_at: now,
				created_at: now,
				updated_at: now,
			});

			Ok(job_id)
		})
	}

	fn claim<'a>(
		&'a self,
		now: OffsetDateTime,
		lease: Duration,
	) -> BoxFuture<'a, Result<Option<ReindexJob>>> {
		Box::pin(async move {
			let mut jobs = self.jobs.lock().unwrap_or_else(|err| err.into_inner());
			let mut runnable: Vec<&mut ReindexJob> = jobs
				.iter_mut()
				.filter(|job| {
					matches!(job.status.as_str(), "PENDING" | "FAILED") && job.available_at <= now
				})
				.collect();

			runnable.sort_by_key(|job| job.available_at);

			let Some(job) = runnable.into_iter().next() else { return Ok(None) };

			job.available_at = now + lease;
			job.updated_at = now;

			Ok(Some(job.clone()))
		})
	}

	fn mark_done<'a>(&'a self, job_id: Uuid, now: OffsetDateTime) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut jobs = self.jobs.lock().unwrap_or_else(|err| err.into_inner());

			for job in jobs.iter_mut() {
				if job.job_id == job_id {
					job.status = "DONE".to_string();
					job.updated_at = now;
				}
			}

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
			let mut jobs = self.jobs.lock().unwrap_or_else(|err| err.into_inner());

			for job in jobs.iter_mut() {
				if job.job_id == job_id {
					job.status = "FAILED".to_string();
					job.attempts = attempts;
					job.last_error = Some(error.to_string());
					job.available_at = available_at;
					job.updated_at = now;
				}
			}

			Ok(())
		})
	}
}

#[derive(Default)]
pub struct InMemoryDocumentSource {
	documents: Mutex<HashMap<String, Vec<DocumentInput>>>,
}

impl InMemoryDocumentSource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn put(&self, tenant_id: &str, documents: Vec<DocumentInput>) {
		let mut map = self.documents.lock().unwrap_or_else(|err| err.into_inner());

		map.insert(tenant_id.to_string(), documents);
	}
}

impl DocumentSource for InMemoryDocumentSource {
	fn documents<'a>(&'a self, tenant_id: &'a str) -> BoxFuture<'a, Result<Vec<DocumentInput>>> {
		Box::pin(async move {
			let map = self.documents.lock().unwrap_or_else(|err| err.into_inner());

			Ok(map.get(tenant_id).cloned().unwrap_or_default())
		})
	}
}
