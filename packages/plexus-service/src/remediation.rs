use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::sync::watch;

use plexus_domain::{EwmaDetector, RollingSloWindow, SloSnapshot};
use plexus_storage::{lock::DistributedLock, overrides::OverrideStore};

use crate::{ServiceError, ServiceResult};

const ANOMALY_LOG_THRESHOLD: f64 = 3.0;

#[derive(Debug, Clone)]
pub struct RemediationSettings {
	pub check_every: Duration,
	pub lock_poll: Duration,
	pub violations_to_remediate: u32,
	pub max_p95_ms: f64,
	pub max_error_rate: f64,
	pub max_unknown_rate: f64,
	pub safe_experiment: String,
	pub ewma_alpha: f64,
}

impl RemediationSettings {
	pub fn from_config(slo: &plexus_config::Slo) -> Self {
		Self {
			check_every: Duration::from_secs(slo.check_every_s),
			lock_poll: Duration::from_secs(slo.lock_poll_s),
			violations_to_remediate: slo.violations_to_remediate,
			max_p95_ms: slo.max_p95_ms,
			max_error_rate: slo.max_error_rate,
			max_unknown_rate: slo.max_unknown_rate,
			safe_experiment: slo.safe_experiment.clone(),
			ewma_alpha: slo.ewma_alpha,
		}
	}
}

struct SignalDetectors {
	p95: EwmaDetector,
	error_rate: EwmaDetector,
	unknown_rate: EwmaDetector,
}

/// Leader-only control loop.
///
/// While this replica holds the cluster lock it reads the SLO snapshot every
/// `check_every`; a threshold violation increments a hysteresis counter and a
/// healthy check decrements it (floored at zero), debouncing transient blips.
/// Sustained violation writes a remediation override that forces all traffic
/// onto the safe configuration and stays until manually cleared; remediation
/// is monitor-and-flag, not auto-heal, to avoid flapping. Losing leadership
/// resets the counter.
pub struct RemediationController {
	settings: RemediationSettings,
	lock: Arc<dyn DistributedLock>,
	overrides: Arc<dyn OverrideStore>,
	slo: Arc<RollingSloWindow>,
	detectors: SignalDetectors,
	violated: u32,
	is_leader: bool,
}

impl RemediationController {
	pub fn new(
		settings: RemediationSettings,
		lock: Arc<dyn DistributedLock>,
		overrides: Arc<dyn OverrideStore>,
		slo: Arc<RollingSloWindow>,
	) -> Self {
		let alpha = settings.ewma_alpha;

		Self {
			settings,
			lock,
			overrides,
			slo,
			detectors: SignalDetectors {
				p95: EwmaDetector::new(alpha),
				error_rate: EwmaDetector::new(alpha),
				unknown_rate: EwmaDetector::new(alpha),
			},
			violated: 0,
			is_leader: false,
		}
	}

	pub fn is_leader(&self) -> bool {
		self.is_leader
	}

	pub fn violation_count(&self) -> u32 {
		self.violated
	}

	/// Runs until the shutdown channel flips to true. Leadership is re-checked
	/// on every cycle so a change is noticed within one poll interval.
	pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
		loop {
			let sleep_for = if self.is_leader {
				self.settings.check_every
			} else {
				self.settings.lock_poll
			};

			tokio::select! {
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break;
					}
				},
				_ = tokio::time::sleep(sleep_for) => {},
			}

			if let Err(err) = self.tick().await {
				tracing::warn!(error = %err, "Remediation check failed.");
			}
		}

		if self.is_leader
			&& let Err(err) = self.lock.release().await
		{
			tracing::warn!(error = %err, "Failed to release the leader lock on shutdown.");
		}

		tracing::info!("Remediation controller stopped.");
	}

	/// One leadership-plus-check cycle. Returns whether an override was
	/// written this cycle.
	pub async fn tick(&mut self) -> ServiceResult<bool> {
		let held = self.lock.try_acquire().await.map_err(ServiceError::from)?;

		if !held {
			if self.is_leader {
				tracing::info!("Leadership lost; resetting remediation hysteresis.");
			}
			self.is_leader = false;
			self.violated = 0;

			return Ok(false);
		}

		if !self.is_leader {
			tracing::info!("Leadership acquired; starting remediation checks.");
			self.is_leader = true;
		}

		let snapshot = self.slo.snapshot();

		self.score_signals(&snapshot);

		if !self.evaluate(&snapshot) {
			return Ok(false);
		}

		if self.overrides.get().await.map_err(ServiceError::from)?.is_some() {
			// Already remediated; the override stays until manually cleared.
			return Ok(false);
		}

		tracing::error!(
			p95_latency_ms = snapshot.p95_latency_ms,
			error_rate = snapshot.error_rate,
			unknown_rate = snapshot.unknown_rate,
			safe_experiment = self.settings.safe_experiment.as_str(),
			"Sustained SLO violation; forcing the safe configuration.",
		);
		self.overrides
			.set(&self.settings.safe_experiment, OffsetDateTime::now_utc())
			.await
			.map_err(ServiceError::from)?;

		Ok(true)
	}

	/// Pure threshold-plus-hysteresis step, exposed for deterministic tests.
	pub fn evaluate(&mut self, snapshot: &SloSnapshot) -> bool {
		let violation = snapshot.sample_count > 0
			&& (snapshot.p95_latency_ms > self.settings.max_p95_ms
				|| snapshot.error_rate > self.settings.max_error_rate
				|| snapshot.unknown_rate > self.settings.max_unknown_rate);

		if violation {
			self.violated = self.violated.saturating_add(1);
		} else {
			self.violated = self.violated.saturating_sub(1);
		}

		self.violated >= self.settings.violations_to_remediate
	}

	fn score_signals(&mut self, snapshot: &SloSnapshot) {
		if snapshot.sample_count == 0 {
			return;
		}

		for (signal, z) in [
			("p95_latency_ms", self.detectors.p95.score(snapshot.p95_latency_ms)),
			("error_rate", self.detectors.error_rate.score(snapshot.error_rate)),
			("unknown_rate", self.detectors.unknown_rate.score(snapshot.unknown_rate)),
		] {
			if z > ANOMALY_LOG_THRESHOLD {
				tracing::warn!(signal, z_score = z, "Statistically unusual SLO signal.");
			}
		}
	}
}
