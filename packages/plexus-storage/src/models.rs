use time::OffsetDateTime;
use uuid::Uuid;

/// Per-tenant index lifecycle state.
///
/// `index_generation` increases by exactly one on every promotion and never
/// decreases. `target_embedding_version` is non-null only while a reindex is
/// in flight; `previous_embedding_version` records what rollback restores.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorkspaceIndexState {
	pub tenant_id: String,
	pub active_embedding_version: String,
	pub target_embedding_version: Option<String>,
	pub previous_embedding_version: Option<String>,
	pub index_generation: u64,
	pub updated_at: OffsetDateTime,
}

impl WorkspaceIndexState {
	pub fn baseline(tenant_id: &str, version: &str, now: OffsetDateTime) -> Self {
		Self {
			tenant_id: tenant_id.to_string(),
			active_embedding_version: version.to_string(),
			target_embedding_version: None,
			previous_embedding_version: None,
			index_generation: 0,
			updated_at: now,
		}
	}

	pub fn is_reindexing(&self) -> bool {
		self.target_embedding_version.is_some()
	}
}

/// Cluster-wide forced routing decision written by the remediation controller.
/// Presence takes precedence over any per-request experiment assignment.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RemediationOverride {
	pub forced_experiment: String,
	pub applied_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReindexJob {
	pub job_id: Uuid,
	pub tenant_id: String,
	pub target_version: String,
	pub status: String,
	pub attempts: i32,
	pub last_error: Option<String>,
	pub available_at: OffsetDateTime,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub tenant_id: String,
	pub chunk_index: i32,
	pub text: String,
	pub embedding_version: String,
}

impl ChunkRecord {
	/// Deterministic chunk id so reruns of the same backfill upsert in place.
	pub fn id_for(document_id: Uuid, chunk_index: i32, embedding_version: &str) -> Uuid {
		let name = format!("{document_id}:{chunk_index}:{embedding_version}");

		Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
	}
}

/// One backfill input: a document already split into chunk texts by the
/// upstream ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInput {
	pub document_id: Uuid,
	pub chunks: Vec<String>,
}
