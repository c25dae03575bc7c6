use std::{
	sync::Mutex,
	time::Instant,
};

use ahash::AHashMap;

#[derive(Debug, Clone, Copy)]
struct Bucket {
	tokens: f64,
	last_refill: Instant,
}

/// Per-tenant token bucket guarding the service from overload.
///
/// `allow` refills proportionally to elapsed time, then consumes one token.
/// An empty bucket rejects immediately; the caller should retreat, not retry.
#[derive(Debug)]
pub struct RateLimiter {
	capacity: f64,
	refill_per_sec: f64,
	buckets: Mutex<AHashMap<String, Bucket>>,
}

impl RateLimiter {
	pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
		Self { capacity, refill_per_sec, buckets: Mutex::new(AHashMap::new()) }
	}

	pub fn allow(&self, tenant_id: &str) -> bool {
		let now = Instant::now();
		let mut buckets = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
		let bucket = buckets
			.entry(tenant_id.to_string())
			.or_insert(Bucket { tokens: self.capacity, last_refill: now });
		let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();

		bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
		bucket.last_refill = now;

		if bucket.tokens >= 1.0 {
			bucket.tokens -= 1.0;

			true
		} else {
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn burst_drains_exactly_the_capacity() {
		let limiter = RateLimiter::new(20.0, 10.0);
		let allowed = (0..25).filter(|_| limiter.allow("tenant-a")).count();

		assert_eq!(allowed, 20);
	}

	#[test]
	fn tenants_have_independent_buckets() {
		let limiter = RateLimiter::new(2.0, 1.0);

		assert!(limiter.allow("tenant-a"));
		assert!(limiter.allow("tenant-a"));
		assert!(!limiter.allow("tenant-a"));
		assert!(limiter.allow("tenant-b"));
	}

	#[test]
	fn refill_restores_tokens_over_time() {
		let limiter = RateLimiter::new(1.0, 1_000.0);

		assert!(limiter.allow("tenant-a"));
		assert!(!limiter.allow("tenant-a"));

		std::thread::sleep(std::time::Duration::from_millis(10));

		assert!(limiter.allow("tenant-a"));
	}
}
