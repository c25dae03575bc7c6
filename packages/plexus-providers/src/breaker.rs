use std::{
	sync::Mutex,
	time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
	state: BreakerState,
	consecutive_failures: u32,
	opened_at: Option<Instant>,
	probe_in_flight: bool,
}

/// Circuit breaker for an external dependency.
///
/// Closed until `failure_threshold` consecutive failures, then open for
/// `cooldown`; half-open admits exactly one trial request, whose outcome
/// either closes the circuit or reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
	failure_threshold: u32,
	cooldown: Duration,
	inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
	pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
		Self {
			failure_threshold: failure_threshold.max(1),
			cooldown,
			inner: Mutex::new(BreakerInner {
				state: BreakerState::Closed,
				consecutive_failures: 0,
				opened_at: None,
				probe_in_flight: false,
			}),
		}
	}

	pub fn state(&self) -> BreakerState {
		self.inner.lock().unwrap_or_else(|err| err.into_inner()).state
	}

	/// Whether a request may proceed right now.
	pub fn admit(&self) -> bool {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		match inner.state {
			BreakerState::Closed => true,
			BreakerState::Open => {
				let cooled = inner
					.opened_at
					.map(|opened| opened.elapsed() >= self.cooldown)
					.unwrap_or(true);

				if cooled {
					inner.state = BreakerState::HalfOpen;
					inner.probe_in_flight = true;

					true
				} else {
					false
				}
			},
			BreakerState::HalfOpen => {
				if inner.probe_in_flight {
					false
				} else {
					inner.probe_in_flight = true;

					true
				}
			},
		}
	}

	pub fn record_success(&self) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		inner.state = BreakerState::Closed;
		inner.consecutive_failures = 0;
		inner.opened_at = None;
		inner.probe_in_flight = false;
	}

	pub fn record_failure(&self) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		match inner.state {
			BreakerState::HalfOpen => {
				inner.state = BreakerState::Open;
				inner.opened_at = Some(Instant::now());
				inner.probe_in_flight = false;
			},
			_ => {
				inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

				if inner.consecutive_failures >= self.failure_threshold {
					inner.state = BreakerState::Open;
					inner.opened_at = Some(Instant::now());
				}
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opens_after_consecutive_failures() {
		let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

		assert!(breaker.admit());
		breaker.record_failure();
		breaker.record_failure();
		assert_eq!(breaker.state(), BreakerState::Closed);
		breaker.record_failure();
		assert_eq!(breaker.state(), BreakerState::Open);
		assert!(!breaker.admit());
	}

	#[test]
	fn success_resets_the_failure_count() {
		let breaker = CircuitBreaker::new(2, Duration::from_secs(60));

		breaker.record_failure();
		breaker.record_success();
		breaker.record_failure();

		assert_eq!(breaker.state(), BreakerState::Closed);
	}

	#[test]
	fn half_open_admits_exactly_one_probe() {
		let breaker = CircuitBreaker::new(1, Duration::ZERO);

		breaker.record_failure();
		assert_eq!(breaker.state(), BreakerState::Open);

		// Cooldown of zero: the next admit transitions to half-open.
		assert!(breaker.admit());
		assert_eq!(breaker.state(), BreakerState::HalfOpen);
		assert!(!breaker.admit());

		breaker.record_success();
		assert_eq!(breaker.state(), BreakerState::Closed);
	}

	#[test]
	fn failed_probe_reopens_the_circuit() {
		let breaker = CircuitBreaker::new(1, Duration::ZERO);

		breaker.record_failure();
		assert!(breaker.admit());
		breaker.record_failure();
		assert_eq!(breaker.state(), BreakerState::Open);
	}
}
