use sqlx::{Connection, postgres::PgConnection};
use tokio::sync::Mutex;

use crate::{BoxFuture, Result};

/// Cluster-wide mutual exclusion for the remediation controller.
///
/// The primitive must come from the shared store itself; no client-side
/// coordination.
pub trait DistributedLock
where
	Self: Send + Sync,
{
	/// Non-blocking acquisition attempt. Returns whether this process holds
	/// the lock after the call. Safe to call while already holding.
	fn try_acquire<'a>(&'a self) -> BoxFuture<'a, Result<bool>>;

	fn release<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}

/// Postgres session advisory lock.
///
/// Holds a dedicated connection for the lock's lifetime; losing the
/// connection releases the lock server-side, which the next `try_acquire`
/// observes and re-acquires through a fresh session.
pub struct PgAdvisoryLock {
	dsn: String,
	key: i64,
	session: Mutex<LockSession>,
}

#[derive(Default)]
struct LockSession {
	conn: Option<PgConnection>,
	held: bool,
}

impl PgAdvisoryLock {
	pub fn new(dsn: &str, key: i64) -> Self {
		Self { dsn: dsn.to_string(), key, session: Mutex::new(LockSession::default()) }
	}
}

impl DistributedLock for PgAdvisoryLock {
	fn try_acquire<'a>(&'a self) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut session = self.session.lock().await;

			if session.held
				&& let Some(conn) = session.conn.as_mut()
			{
				// The session already owns the lock; a liveness ping is enough.
				// Re-locking would stack acquisitions on the same session.
				match sqlx::query("SELECT 1").execute(&mut *conn).await {
					Ok(_) => return Ok(true),
					Err(err) => {
						tracing::warn!(error = %err, "Leader lock session lost.");
						session.conn = None;
						session.held = false;
					},
				}
			}

			if session.conn.is_none() {
				session.conn = Some(PgConnection::connect(&self.dsn).await?);
			}

			let Some(conn) = session.conn.as_mut() else { return Ok(false) };
			let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
				.bind(self.key)
				.fetch_one(&mut *conn)
				.await?;

			session.held = acquired;

			Ok(acquired)
		})
	}

	fn release<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut session = self.session.lock().await;

			if session.held
				&& let Some(conn) = session.conn.as_mut()
			{
				sqlx::query("SELECT pg_advisory_unlock($1)")
					.bind(self.key)
					.execute(&mut *conn)
					.await?;
			}

			session.held = false;

			Ok(())
		})
	}
}
