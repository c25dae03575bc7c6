use std::collections::HashMap;

use qdrant_client::{
	Qdrant,
	client::Payload,
	qdrant::{
		Condition, Document, Filter, PointId, PointStruct, Query, QueryPointsBuilder, ScoredPoint,
		UpsertPointsBuilder, Value, Vector, point_id::PointIdOptions, value::Kind,
	},
};
use uuid::Uuid;

use plexus_domain::{Candidate, CandidateOrigin, RetrieverKind};

use crate::{Result, models::ChunkRecord};

pub const DENSE_VECTOR_NAME: &str = "dense";
pub const BM25_VECTOR_NAME: &str = "bm25";
pub const BM25_MODEL: &str = "qdrant/bm25";

struct ShardHandle {
	client: Qdrant,
	collection: String,
}

/// One Qdrant collection per shard; each answers nearest-vector and
/// full-text-rank queries scoped by tenant and embedding version.
pub struct QdrantShardReader {
	shards: HashMap<String, ShardHandle>,
}

impl QdrantShardReader {
	pub fn new(shards: &[plexus_config::Shard]) -> Result<Self> {
		let mut handles = HashMap::with_capacity(shards.len());

		for shard in shards {
			let client = Qdrant::from_url(&shard.url).build()?;

			handles.insert(
				shard.name.clone(),
				ShardHandle { client, collection: shard.collection.clone() },
			);
		}

		Ok(Self { shards: handles })
	}

	fn handle(&self, shard: &str) -> Result<&ShardHandle> {
		self.shards
			.get(shard)
			.ok_or_else(|| crate::Error::InvalidArgument(format!("Unknown shard {shard}.")))
	}

	pub async fn query_dense(
		&self,
		shard: &str,
		tenant_id: &str,
		query_vector: &[f32],
		k: u32,
		embedding_version: &str,
	) -> Result<Vec<Candidate>> {
		let handle = self.handle(shard)?;
		let search = QueryPointsBuilder::new(handle.collection.clone())
			.query(Query::new_nearest(query_vector.to_vec()))
			.using(DENSE_VECTOR_NAME)
			.filter(scope_filter(tenant_id, embedding_version))
			.limit(k as u64)
			.with_payload(true);
		let response = handle.client.query(search).await?;

		Ok(collect_candidates(&response.result, RetrieverKind::Dense, embedding_version))
	}

	pub async fn query_lexical(
		&self,
		shard: &str,
		tenant_id: &str,
		query_text: &str,
		k: u32,
		embedding_version: &str,
	) -> Result<Vec<Candidate>> {
		let handle = self.handle(shard)?;
		let search = QueryPointsBuilder::new(handle.collection.clone())
			.query(Query::new_nearest(Document::new(query_text.to_string(), BM25_MODEL)))
			.using(BM25_VECTOR_NAME)
			.filter(scope_filter(tenant_id, embedding_version))
			.limit(k as u64)
			.with_payload(true);
		let response = handle.client.query(search).await?;

		Ok(collect_candidates(&response.result, RetrieverKind::Lexical, embedding_version))
	}

	pub async fn index_chunks(
		&self,
		shard: &str,
		records: &[ChunkRecord],
		vectors: &[Vec<f32>],
	) -> Result<()> {
		let handle = self.handle(shard)?;
		let mut points = Vec::with_capacity(records.len());

		for (record, vec) in records.iter().zip(vectors.iter()) {
			let mut payload_map = HashMap::new();

			payload_map
				.insert("document_id".to_string(), Value::from(record.document_id.to_string()));
			payload_map.insert("chunk_id".to_string(), Value::from(record.chunk_id.to_string()));
			payload_map.insert("ordinal".to_string(), Value::from(record.chunk_index as i64));
			payload_map.insert("text".to_string(), Value::from(record.text.clone()));
			payload_map.insert("tenant_id".to_string(), Value::from(record.tenant_id.clone()));
			payload_map.insert(
				"embedding_version".to_string(),
				Value::from(record.embedding_version.clone()),
			);

			let payload = Payload::from(payload_map);
			let mut vector_map = HashMap::new();

			vector_map.insert(DENSE_VECTOR_NAME.to_string(), Vector::from(vec.to_vec()));
			vector_map.insert(
				BM25_VECTOR_NAME.to_string(),
				Vector::from(Document::new(record.text.clone(), BM25_MODEL)),
			);
			points.push(PointStruct::new(record.chunk_id.to_string(), vector_map, payload));
		}

		let upsert = UpsertPointsBuilder::new(handle.collection.clone(), points).wait(true);

		handle.client.upsert_points(upsert).await?;

		Ok(())
	}
}

fn scope_filter(tenant_id: &str, embedding_version: &str) -> Filter {
	Filter::must([
		Condition::matches("tenant_id", tenant_id.to_string()),
		Condition::matches("embedding_version", embedding_version.to_string()),
	])
}

fn collect_candidates(
	points: &[ScoredPoint],
	kind: RetrieverKind,
	embedding_version: &str,
) -> Vec<Candidate> {
	let mut out = Vec::with_capacity(points.len());

	for point in points {
		let chunk_id = point
			.id
			.as_ref()
			.and_then(point_id_to_uuid)
			.or_else(|| payload_uuid(&point.payload, "chunk_id"));
		let Some(chunk_id) = chunk_id else {
			tracing::warn!("Shard candidate missing chunk_id.");

			continue;
		};
		let Some(document_id) = payload_uuid(&point.payload, "document_id") else {
			tracing::warn!(chunk_id = %chunk_id, "Shard candidate missing document_id.");

			continue;
		};
		let Some(ordinal) = payload_i32(&point.payload, "ordinal") else {
			tracing::warn!(chunk_id = %chunk_id, "Shard candidate missing ordinal.");

			continue;
		};
		let text = payload_string(&point.payload, "text").unwrap_or_default();

		out.push(Candidate {
			id: chunk_id,
			parent_document_id: document_id,
			ordinal,
			text,
			score: f64::from(point.score),
			origin: CandidateOrigin {
				retriever_kind: kind,
				embedding_version: embedding_version.to_string(),
			},
		});
	}

	out
}

fn point_id_to_uuid(point_id: &PointId) -> Option<Uuid> {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => Uuid::parse_str(id).ok(),
		_ => None,
	}
}

fn payload_uuid(payload: &HashMap<String, Value>, key: &str) -> Option<Uuid> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::StringValue(text)) => Uuid::parse_str(text).ok(),
		_ => None,
	}
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::StringValue(text)) => Some(text.to_string()),
		_ => None,
	}
}

fn payload_i32(payload: &HashMap<String, Value>, key: &str) -> Option<i32> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::IntegerValue(value)) => i32::try_from(*value).ok(),
		Some(Kind::DoubleValue(value)) =>
			if value.fract() == 0.0 {
				i32::try_from(*value as i64).ok()
			} else {
				None
			},
		_ => None,
	}
}
