mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, Config, EmbeddingProviderConfig, ExperimentOverride, Lifecycle, Limits, Postgres,
	Providers, Reindex, Retrieval, Routing, Security, Service, Shard, Slo, Storage,
};

use std::{collections::HashSet, fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.service.admin_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.admin_bind must be non-empty.".to_string(),
		});
	}
	if cfg.shards.is_empty() {
		return Err(Error::Validation { message: "shards must be non-empty.".to_string() });
	}

	let mut seen_shards = HashSet::new();

	for shard in &cfg.shards {
		if shard.name.trim().is_empty() {
			return Err(Error::Validation { message: "shards.name must be non-empty.".to_string() });
		}
		if !seen_shards.insert(shard.name.as_str()) {
			return Err(Error::Validation {
				message: format!("Shard name {} is duplicated.", shard.name),
			});
		}
	}

	if !matches!(cfg.routing.strategy.as_str(), "all" | "subset-by-rendezvous" | "adaptive") {
		return Err(Error::Validation {
			message: "routing.strategy must be one of all, subset-by-rendezvous, or adaptive."
				.to_string(),
		});
	}
	if cfg.routing.fanout == 0 {
		return Err(Error::Validation {
			message: "routing.fanout must be greater than zero.".to_string(),
		});
	}
	if !(0.0..=0.5).contains(&cfg.routing.reshuffle_probability) {
		return Err(Error::Validation {
			message: "routing.reshuffle_probability must be in the range 0.0-0.5.".to_string(),
		});
	}
	if cfg.routing.shard_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "routing.shard_timeout_ms must be greater than zero.".to_string(),
		});
	}

	if cfg.retrieval.top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.rerank_candidates < cfg.retrieval.top_k {
		return Err(Error::Validation {
			message: "retrieval.rerank_candidates must be at least retrieval.top_k.".to_string(),
		});
	}
	if cfg.retrieval.budget_ms == 0 {
		return Err(Error::Validation {
			message: "retrieval.budget_ms must be greater than zero.".to_string(),
		});
	}

	validate_fusion("retrieval.fusion", &cfg.retrieval.fusion)?;
	validate_rerank("retrieval.rerank", &cfg.retrieval.rerank)?;
	validate_unit_ratio("retrieval.mmr_lambda", cfg.retrieval.mmr_lambda)?;
	validate_unit_ratio("retrieval.hybrid_alpha", cfg.retrieval.hybrid_alpha)?;

	if cfg.retrieval.rrf_k <= 0.0 || !cfg.retrieval.rrf_k.is_finite() {
		return Err(Error::Validation {
			message: "retrieval.rrf_k must be a positive finite number.".to_string(),
		});
	}

	for (name, experiment) in &cfg.experiments {
		if name.trim().is_empty() {
			return Err(Error::Validation {
				message: "Experiment names must be non-empty.".to_string(),
			});
		}
		if let Some(fusion) = experiment.fusion.as_deref() {
			validate_fusion(&format!("experiments.{name}.fusion"), fusion)?;
		}
		if let Some(rerank) = experiment.rerank.as_deref() {
			validate_rerank(&format!("experiments.{name}.rerank"), rerank)?;
		}
		if let Some(lambda) = experiment.mmr_lambda {
			validate_unit_ratio(&format!("experiments.{name}.mmr_lambda"), lambda)?;
		}
		if let Some(alpha) = experiment.hybrid_alpha {
			validate_unit_ratio(&format!("experiments.{name}.hybrid_alpha"), alpha)?;
		}
		if experiment.fanout == Some(0) {
			return Err(Error::Validation {
				message: format!("experiments.{name}.fanout must be greater than zero."),
			});
		}
	}

	if cfg.limits.rate_capacity <= 0.0 || !cfg.limits.rate_capacity.is_finite() {
		return Err(Error::Validation {
			message: "limits.rate_capacity must be a positive finite number.".to_string(),
		});
	}
	if cfg.limits.rate_per_sec <= 0.0 || !cfg.limits.rate_per_sec.is_finite() {
		return Err(Error::Validation {
			message: "limits.rate_per_sec must be a positive finite number.".to_string(),
		});
	}

	if cfg.lifecycle.baseline_version.trim().is_empty() {
		return Err(Error::Validation {
			message: "lifecycle.baseline_version must be non-empty.".to_string(),
		});
	}

	if cfg.reindex.max_retries == 0 {
		return Err(Error::Validation {
			message: "reindex.max_retries must be greater than zero.".to_string(),
		});
	}
	if cfg.reindex.canary_queries == 0 {
		return Err(Error::Validation {
			message: "reindex.canary_queries must be greater than zero.".to_string(),
		});
	}
	if cfg.reindex.canary_max_error_rate < 0.0 || cfg.reindex.canary_max_error_rate > 1.0 {
		return Err(Error::Validation {
			message: "reindex.canary_max_error_rate must be in the range 0.0-1.0.".to_string(),
		});
	}

	if cfg.slo.window == 0 {
		return Err(Error::Validation { message: "slo.window must be greater than zero.".to_string() });
	}
	if !(0.0..=1.0).contains(&cfg.slo.ewma_alpha) || cfg.slo.ewma_alpha == 0.0 {
		return Err(Error::Validation {
			message: "slo.ewma_alpha must be in the range (0.0, 1.0].".to_string(),
		});
	}
	if cfg.slo.violations_to_remediate == 0 {
		return Err(Error::Validation {
			message: "slo.violations_to_remediate must be greater than zero.".to_string(),
		});
	}
	if cfg.slo.safe_experiment.trim().is_empty() {
		return Err(Error::Validation {
			message: "slo.safe_experiment must be non-empty.".to_string(),
		});
	}
	if !cfg.experiments.contains_key(&cfg.slo.safe_experiment) {
		return Err(Error::Validation {
			message: format!(
				"slo.safe_experiment {} must name a configured experiment.",
				cfg.slo.safe_experiment
			),
		});
	}

	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "providers.embedding.api_key must be non-empty.".to_string(),
		});
	}
	if cfg.providers.embedding.max_retries == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.max_retries must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.breaker_failure_threshold == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.breaker_failure_threshold must be greater than zero."
				.to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg
		.security
		.admin_auth_token
		.as_deref()
		.map(|token| token.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.security.admin_auth_token = None;
	}
}

fn validate_fusion(label: &str, value: &str) -> Result<()> {
	if !matches!(value, "rrf" | "concatenate") {
		return Err(Error::Validation {
			message: format!("{label} must be one of rrf or concatenate."),
		});
	}

	Ok(())
}

fn validate_rerank(label: &str, value: &str) -> Result<()> {
	if !matches!(value, "mmr" | "hybrid" | "none") {
		return Err(Error::Validation {
			message: format!("{label} must be one of mmr, hybrid, or none."),
		});
	}

	Ok(())
}

fn validate_unit_ratio(label: &str, value: f64) -> Result<()> {
	if !value.is_finite() || !(0.0..=1.0).contains(&value) {
		return Err(Error::Validation {
			message: format!("{label} must be a finite number in the range 0.0-1.0."),
		});
	}

	Ok(())
}
