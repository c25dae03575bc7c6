const VARIANCE_FLOOR: f64 = 1e-9;

/// Exponentially-weighted mean/variance tracker.
///
/// `mean' = alpha * x + (1 - alpha) * mean`,
/// `var'  = alpha * (x - mean)^2 + (1 - alpha) * var`,
/// anomaly score `z = |x - mean'| / sqrt(max(var', eps))`.
///
/// State lives only in-process; it resets on restart.
#[derive(Debug, Clone)]
pub struct EwmaDetector {
	alpha: f64,
	mean: f64,
	variance: f64,
	primed: bool,
}

impl EwmaDetector {
	pub fn new(alpha: f64) -> Self {
		Self { alpha, mean: 0.0, variance: 0.0, primed: false }
	}

	pub fn mean(&self) -> f64 {
		self.mean
	}

	/// Folds one observation in and returns its anomaly score.
	pub fn score(&mut self, x: f64) -> f64 {
		if !self.primed {
			self.mean = x;
			self.variance = 0.0;
			self.primed = true;

			return 0.0;
		}

		let deviation = x - self.mean;

		self.mean = self.alpha * x + (1.0 - self.alpha) * self.mean;
		self.variance = self.alpha * deviation * deviation + (1.0 - self.alpha) * self.variance;

		(x - self.mean).abs() / self.variance.max(VARIANCE_FLOOR).sqrt()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn steady_signal_scores_near_zero() {
		let mut detector = EwmaDetector::new(0.3);

		for _ in 0..50 {
			let z = detector.score(100.0);

			assert!(z < 1e-3, "steady signal produced z = {z}");
		}
	}

	#[test]
	fn spike_scores_high_after_noisy_baseline() {
		let mut detector = EwmaDetector::new(0.3);

		for i in 0..50 {
			let jitter = if i % 2 == 0 { 1.0 } else { -1.0 };

			detector.score(100.0 + jitter);
		}

		let z = detector.score(200.0);

		assert!(z > 10.0, "spike produced z = {z}");
	}

	#[test]
	fn mean_tracks_level_shifts() {
		let mut detector = EwmaDetector::new(0.5);

		for _ in 0..20 {
			detector.score(10.0);
		}
		for _ in 0..20 {
			detector.score(30.0);
		}

		assert!((detector.mean() - 30.0).abs() < 1.0);
	}
}
