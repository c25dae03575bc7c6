use std::{future::Future, time::Duration};

use rand::Rng;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub base_backoff: Duration,
	pub max_backoff: Duration,
}

impl RetryPolicy {
	pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
		Self { max_attempts: max_attempts.max(1), base_backoff, max_backoff }
	}

	/// Exponential backoff for a 1-based attempt number, capped, with up to
	/// 25% additive jitter so synchronized retries fan out.
	pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
		let exp = attempt.saturating_sub(1).min(10);
		let base_ms = self.base_backoff.as_millis() as u64;
		let capped_ms = base_ms.saturating_mul(1 << exp).min(self.max_backoff.as_millis() as u64);
		let jitter_ms = if capped_ms == 0 {
			0
		} else {
			rand::rng().random_range(0..=capped_ms / 4)
		};

		Duration::from_millis(capped_ms.saturating_add(jitter_ms))
	}
}

/// Runs `operation` up to `policy.max_attempts` times, sleeping the backoff
/// between attempts. The final error is wrapped so callers can tell transient
/// exhaustion from a first-try failure.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt = 0_u32;

	loop {
		attempt += 1;

		match operation().await {
			Ok(value) => return Ok(value),
			Err(Error::CircuitOpen) => return Err(Error::CircuitOpen),
			Err(err) if attempt >= policy.max_attempts => {
				return Err(Error::RetriesExhausted { attempts: attempt, message: err.to_string() });
			},
			Err(err) => {
				let backoff = policy.backoff_for_attempt(attempt);

				tracing::warn!(
					error = %err,
					attempt,
					backoff_ms = backoff.as_millis() as u64,
					"Transient provider failure. Backing off.",
				);
				tokio::time::sleep(backoff).await;
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	fn policy() -> RetryPolicy {
		RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(800))
	}

	#[test]
	fn backoff_grows_exponentially_and_caps() {
		let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));

		let first = policy.backoff_for_attempt(1).as_millis() as u64;
		let second = policy.backoff_for_attempt(2).as_millis() as u64;
		let late = policy.backoff_for_attempt(6).as_millis() as u64;

		assert!((100..=125).contains(&first), "first backoff {first}");
		assert!((200..=250).contains(&second), "second backoff {second}");
		assert!((350..=438).contains(&late), "capped backoff {late}");
	}

	#[tokio::test(start_paused = true)]
	async fn eventually_succeeds_within_the_attempt_bound() {
		let calls = AtomicU32::new(0);
		let result = retry_with_backoff(&policy(), || {
			let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;

			async move {
				if attempt < 3 {
					Err(Error::InvalidResponse { message: "transient".to_string() })
				} else {
					Ok(attempt)
				}
			}
		})
		.await
		.expect("retry should succeed on the third attempt");

		assert_eq!(result, 3);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn exhaustion_reports_the_attempt_count() {
		let calls = AtomicU32::new(0);
		let result: Result<()> = retry_with_backoff(&policy(), || {
			calls.fetch_add(1, Ordering::SeqCst);

			async { Err(Error::InvalidResponse { message: "still failing".to_string() }) }
		})
		.await;

		match result {
			Err(Error::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
			other => panic!("Expected RetriesExhausted, got {other:?}"),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn open_circuit_short_circuits_retries() {
		let calls = AtomicU32::new(0);
		let result: Result<()> = retry_with_backoff(&policy(), || {
			calls.fetch_add(1, Ordering::SeqCst);

			async { Err(Error::CircuitOpen) }
		})
		.await;

		assert!(matches!(result, Err(Error::CircuitOpen)));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
