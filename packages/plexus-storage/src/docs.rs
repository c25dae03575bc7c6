use sqlx::Row;
use uuid::Uuid;

use crate::{BoxFuture, Result, db::Db, models::DocumentInput};

/// Read-only view of the upstream document store, scoped per tenant.
/// Documents arrive already chunked by the ingestion pipeline.
pub trait DocumentSource
where
	Self: Send + Sync,
{
	fn documents<'a>(&'a self, tenant_id: &'a str) -> BoxFuture<'a, Result<Vec<DocumentInput>>>;
}

pub struct PgDocumentSource {
	db: Db,
}

impl PgDocumentSource {
	pub fn new(db: Db) -> Self {
		Self { db }
	}
}

impl DocumentSource for PgDocumentSource {
	fn documents<'a>(&'a self, tenant_id: &'a str) -> BoxFuture<'a, Result<Vec<DocumentInput>>> {
		Box::pin(async move {
			let rows = sqlx::query(
				"SELECT document_id, chunks FROM documents WHERE tenant_id = $1 ORDER BY document_id",
			)
			.bind(tenant_id)
			.fetch_all(&self.db.pool)
			.await?;
			let mut out = Vec::with_capacity(rows.len());

			for row in rows {
				let document_id: Uuid = row.try_get("document_id")?;
				let chunks_json: serde_json::Value = row.try_get("chunks")?;
				let chunks: Vec<String> = serde_json::from_value(chunks_json).map_err(|err| {
					crate::Error::InvalidArgument(format!(
						"Document {document_id} chunk payload is not a string array: {err}"
					))
				})?;

				out.push(DocumentInput { document_id, chunks });
			}

			Ok(out)
		})
	}
}
