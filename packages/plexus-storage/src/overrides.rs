use time::OffsetDateTime;

use crate::{BoxFuture, Result, db::Db, models::RemediationOverride};

/// Shared-store record forcing all traffic onto a named safe configuration.
///
/// Written only by the remediation controller while it holds leadership;
/// cleared manually by an operator.
pub trait OverrideStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self) -> BoxFuture<'a, Result<Option<RemediationOverride>>>;

	fn set<'a>(
		&'a self,
		forced_experiment: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;

	fn clear<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}

pub struct PgOverrideStore {
	db: Db,
}

impl PgOverrideStore {
	pub fn new(db: Db) -> Self {
		Self { db }
	}
}

impl OverrideStore for PgOverrideStore {
	fn get<'a>(&'a self) -> BoxFuture<'a, Result<Option<RemediationOverride>>> {
		Box::pin(async move {
			let row = sqlx::query_as::<_, (String, OffsetDateTime)>(
				"SELECT forced_experiment, applied_at FROM remediation_overrides WHERE singleton",
			)
			.fetch_optional(&self.db.pool)
			.await?;

			Ok(row.map(|(forced_experiment, applied_at)| RemediationOverride {
				forced_experiment,
				applied_at,
			}))
		})
	}

	fn set<'a>(
		&'a self,
		forced_experiment: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query(
				"\
INSERT INTO remediation_overrides (singleton, forced_experiment, applied_at)
VALUES (TRUE, $1, $2)
ON CONFLICT (singleton) DO UPDATE
SET forced_experiment = EXCLUDED.forced_experiment,
	applied_at = EXCLUDED.applied_at",
			)
			.bind(forced_experiment)
			.bind(now)
			.execute(&self.db.pool)
			.await?;

			Ok(())
		})
	}

	fn clear<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query("DELETE FROM remediation_overrides WHERE singleton")
				.execute(&self.db.pool)
				.await?;

			Ok(())
		})
	}
}
