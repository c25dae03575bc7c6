use std::{collections::VecDeque, sync::Mutex};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutcomeSample {
	pub latency_ms: f64,
	pub is_error: bool,
	pub is_unknown: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SloSnapshot {
	pub p95_latency_ms: f64,
	pub error_rate: f64,
	pub unknown_rate: f64,
	pub sample_count: usize,
}

impl SloSnapshot {
	pub fn empty() -> Self {
		Self { p95_latency_ms: 0.0, error_rate: 0.0, unknown_rate: 0.0, sample_count: 0 }
	}
}

/// Fixed-capacity rolling window of request outcomes.
///
/// One instance per process, never persisted. The snapshot is recomputed over
/// the full window on every observe; O(window) is fine at the sampling rate of
/// whole requests.
#[derive(Debug)]
pub struct RollingSloWindow {
	capacity: usize,
	samples: Mutex<VecDeque<OutcomeSample>>,
}

impl RollingSloWindow {
	pub fn new(capacity: usize) -> Self {
		Self { capacity: capacity.max(1), samples: Mutex::new(VecDeque::new()) }
	}

	pub fn observe(&self, latency_ms: f64, is_error: bool, is_unknown: bool) -> SloSnapshot {
		let mut samples = self.samples.lock().unwrap_or_else(|err| err.into_inner());

		if samples.len() == self.capacity {
			samples.pop_front();
		}
		samples.push_back(OutcomeSample { latency_ms, is_error, is_unknown });

		compute_snapshot(&samples)
	}

	pub fn snapshot(&self) -> SloSnapshot {
		let samples = self.samples.lock().unwrap_or_else(|err| err.into_inner());

		compute_snapshot(&samples)
	}
}

fn compute_snapshot(samples: &VecDeque<OutcomeSample>) -> SloSnapshot {
	if samples.is_empty() {
		return SloSnapshot::empty();
	}

	let mut latencies: Vec<f64> = samples.iter().map(|sample| sample.latency_ms).collect();

	latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

	let count = latencies.len();
	let p95_index = ((count as f64 * 0.95).ceil() as usize).clamp(1, count) - 1;
	let errors = samples.iter().filter(|sample| sample.is_error).count();
	let unknowns = samples.iter().filter(|sample| sample.is_unknown).count();

	SloSnapshot {
		p95_latency_ms: latencies[p95_index],
		error_rate: errors as f64 / count as f64,
		unknown_rate: unknowns as f64 / count as f64,
		sample_count: count,
	}
}
