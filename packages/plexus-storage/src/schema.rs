/// Idempotent schema for the shared relational store.
pub fn render_schema() -> String {
	r#"
CREATE TABLE IF NOT EXISTS index_states (
	tenant_id TEXT PRIMARY KEY,
	active_embedding_version TEXT NOT NULL,
	target_embedding_version TEXT,
	previous_embedding_version TEXT,
	index_generation BIGINT NOT NULL DEFAULT 0,
	updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS shard_generations (
	shard_name TEXT NOT NULL,
	tenant_id TEXT NOT NULL,
	index_generation BIGINT NOT NULL DEFAULT 0,
	updated_at TIMESTAMPTZ NOT NULL,
	PRIMARY KEY (shard_name, tenant_id)
);

CREATE TABLE IF NOT EXISTS remediation_overrides (
	singleton BOOLEAN PRIMARY KEY DEFAULT TRUE,
	forced_experiment TEXT NOT NULL,
	applied_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
	document_id UUID NOT NULL,
	tenant_id TEXT NOT NULL,
	chunks JSONB NOT NULL,
	PRIMARY KEY (tenant_id, document_id)
);

CREATE TABLE IF NOT EXISTS document_chunks (
	chunk_id UUID PRIMARY KEY,
	document_id UUID NOT NULL,
	tenant_id TEXT NOT NULL,
	chunk_index INTEGER NOT NULL,
	text TEXT NOT NULL,
	embedding_version TEXT NOT NULL,
	vec REAL[] NOT NULL,
	created_at TIMESTAMPTZ NOT NULL,
	UNIQUE (document_id, chunk_index, embedding_version)
);

CREATE INDEX IF NOT EXISTS document_chunks_version_idx
	ON document_chunks (tenant_id, embedding_version);

CREATE TABLE IF NOT EXISTS reindex_jobs (
	job_id UUID PRIMARY KEY,
	tenant_id TEXT NOT NULL,
	target_version TEXT NOT NULL,
	status TEXT NOT NULL,
	attempts INTEGER NOT NULL DEFAULT 0,
	last_error TEXT,
	available_at TIMESTAMPTZ NOT NULL,
	created_at TIMESTAMPTZ NOT NULL,
	updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS reindex_jobs_claim_idx
	ON reindex_jobs (status, available_at);
"#
	.to_string()
}
