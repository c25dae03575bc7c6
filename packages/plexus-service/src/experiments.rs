use std::collections::HashMap;

use plexus_config::{Config, ExperimentOverride, Retrieval};
use plexus_domain::{FusionAlgorithm, RerankStrategy};

use crate::CONTROL_EXPERIMENT;

/// Effective retrieval parameters for one request, after experiment
/// resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentParams {
	pub name: String,
	pub top_k: u32,
	pub rerank_candidates: u32,
	pub fusion: FusionAlgorithm,
	pub rerank: RerankStrategy,
	pub fanout: u32,
}

/// Versioned source of experiment configurations.
///
/// Decouples where configuration comes from (file, config service,
/// environment) from how the pipeline applies it.
pub trait ExperimentSource
where
	Self: Send + Sync,
{
	fn base(&self) -> ExperimentParams;

	fn resolve(&self, name: &str) -> Option<ExperimentParams>;

	fn version(&self) -> u64;
}

pub struct ConfigExperimentSource {
	base: ExperimentParams,
	experiments: HashMap<String, ExperimentParams>,
	version: u64,
}

impl ConfigExperimentSource {
	pub fn new(cfg: &Config) -> Self {
		let base = base_params(&cfg.retrieval, cfg.routing.fanout);
		let experiments = cfg
			.experiments
			.iter()
			.map(|(name, overrides)| (name.clone(), merge(name, &base, overrides)))
			.collect();

		Self { base, experiments, version: 1 }
	}
}

impl ExperimentSource for ConfigExperimentSource {
	fn base(&self) -> ExperimentParams {
		self.base.clone()
	}

	fn resolve(&self, name: &str) -> Option<ExperimentParams> {
		if name == CONTROL_EXPERIMENT {
			return Some(self.base.clone());
		}

		self.experiments.get(name).cloned()
	}

	fn version(&self) -> u64 {
		self.version
	}
}

fn base_params(retrieval: &Retrieval, fanout: u32) -> ExperimentParams {
	ExperimentParams {
		name: CONTROL_EXPERIMENT.to_string(),
		top_k: retrieval.top_k,
		rerank_candidates: retrieval.rerank_candidates,
		fusion: parse_fusion(&retrieval.fusion, retrieval.rrf_k),
		rerank: parse_rerank(&retrieval.rerank, retrieval.mmr_lambda, retrieval.hybrid_alpha),
		fanout,
	}
}

fn merge(name: &str, base: &ExperimentParams, overrides: &ExperimentOverride) -> ExperimentParams {
	let rrf_k = overrides.rrf_k.unwrap_or(match base.fusion {
		FusionAlgorithm::Rrf { k } => k,
		FusionAlgorithm::Concatenate => 60.0,
	});
	let (base_lambda, base_alpha) = match base.rerank {
		RerankStrategy::Mmr { lambda } => (lambda, 0.70),
		RerankStrategy::Hybrid { alpha } => (0.75, alpha),
		RerankStrategy::None => (0.75, 0.70),
	};
	let fusion = match overrides.fusion.as_deref() {
		Some(raw) => parse_fusion(raw, rrf_k),
		None => match base.fusion {
			FusionAlgorithm::Rrf { .. } => FusionAlgorithm::Rrf { k: rrf_k },
			FusionAlgorithm::Concatenate => FusionAlgorithm::Concatenate,
		},
	};
	let rerank = match overrides.rerank.as_deref() {
		Some(raw) => parse_rerank(
			raw,
			overrides.mmr_lambda.unwrap_or(base_lambda),
			overrides.hybrid_alpha.unwrap_or(base_alpha),
		),
		None => match base.rerank {
			RerankStrategy::Mmr { .. } => RerankStrategy::Mmr {
				lambda: overrides.mmr_lambda.unwrap_or(base_lambda),
			},
			RerankStrategy::Hybrid { .. } => RerankStrategy::Hybrid {
				alpha: overrides.hybrid_alpha.unwrap_or(base_alpha),
			},
			RerankStrategy::None => RerankStrategy::None,
		},
	};
	let top_k = overrides.top_k.unwrap_or(base.top_k);

	ExperimentParams {
		name: name.to_string(),
		top_k,
		rerank_candidates: overrides.rerank_candidates.unwrap_or(base.rerank_candidates).max(top_k),
		fusion,
		rerank,
		fanout: overrides.fanout.unwrap_or(base.fanout),
	}
}

fn parse_fusion(raw: &str, rrf_k: f64) -> FusionAlgorithm {
	match raw {
		"concatenate" => FusionAlgorithm::Concatenate,
		_ => FusionAlgorithm::Rrf { k: rrf_k },
	}
}

fn parse_rerank(raw: &str, lambda: f64, alpha: f64) -> RerankStrategy {
	match raw {
		"mmr" => RerankStrategy::Mmr { lambda },
		"hybrid" => RerankStrategy::Hybrid { alpha },
		_ => RerankStrategy::None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn retrieval() -> Retrieval {
		Retrieval {
			top_k: 8,
			rerank_candidates: 32,
			budget_ms: 220,
			fusion: "rrf".to_string(),
			rrf_k: 60.0,
			rerank: "mmr".to_string(),
			mmr_lambda: 0.75,
			hybrid_alpha: 0.70,
			stage_cost_ms: 60,
			rerank_cost_ms: 40,
		}
	}

	#[test]
	fn base_params_mirror_the_retrieval_section() {
		let base = base_params(&retrieval(), 2);

		assert_eq!(base.name, CONTROL_EXPERIMENT);
		assert_eq!(base.top_k, 8);
		assert_eq!(base.fusion, FusionAlgorithm::Rrf { k: 60.0 });
		assert_eq!(base.rerank, RerankStrategy::Mmr { lambda: 0.75 });
		assert_eq!(base.fanout, 2);
	}

	#[test]
	fn overrides_apply_on_top_of_the_base() {
		let base = base_params(&retrieval(), 2);
		let overrides = ExperimentOverride {
			fusion: Some("concatenate".to_string()),
			rerank: Some("none".to_string()),
			fanout: Some(1),
			top_k: Some(4),
			..ExperimentOverride::default()
		};
		let merged = merge("safe", &base, &overrides);

		assert_eq!(merged.name, "safe");
		assert_eq!(merged.fusion, FusionAlgorithm::Concatenate);
		assert_eq!(merged.rerank, RerankStrategy::None);
		assert_eq!(merged.fanout, 1);
		assert_eq!(merged.top_k, 4);
		assert!(merged.rerank_candidates >= merged.top_k);
	}

	#[test]
	fn unknown_experiments_resolve_to_none() {
		let cfg_retrieval = retrieval();
		let base = base_params(&cfg_retrieval, 1);
		let source = ConfigExperimentSource {
			base,
			experiments: HashMap::new(),
			version: 1,
		};

		assert!(source.resolve("missing").is_none());
		assert!(source.resolve(CONTROL_EXPERIMENT).is_some());
	}
}
