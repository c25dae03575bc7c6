use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub shards: Vec<Shard>,
	pub routing: Routing,
	pub retrieval: Retrieval,
	#[serde(default)]
	pub experiments: HashMap<String, ExperimentOverride>,
	pub cache: Cache,
	pub limits: Limits,
	pub lifecycle: Lifecycle,
	pub reindex: Reindex,
	pub slo: Slo,
	pub providers: Providers,
	pub security: Security,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Shard {
	pub name: String,
	pub url: String,
	pub collection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Routing {
	#[serde(default = "default_routing_strategy")]
	pub strategy: String,
	#[serde(default = "default_fanout")]
	pub fanout: u32,
	#[serde(default)]
	pub strict_consistency: bool,
	#[serde(default = "default_reshuffle_probability")]
	pub reshuffle_probability: f64,
	#[serde(default = "default_hedge_after_ms")]
	pub hedge_after_ms: u64,
	#[serde(default = "default_shard_timeout_ms")]
	pub shard_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retrieval {
	pub top_k: u32,
	pub rerank_candidates: u32,
	#[serde(default = "default_budget_ms")]
	pub budget_ms: u64,
	#[serde(default = "default_fusion")]
	pub fusion: String,
	#[serde(default = "default_rrf_k")]
	pub rrf_k: f64,
	#[serde(default = "default_rerank")]
	pub rerank: String,
	#[serde(default = "default_mmr_lambda")]
	pub mmr_lambda: f64,
	#[serde(default = "default_hybrid_alpha")]
	pub hybrid_alpha: f64,
	#[serde(default = "default_stage_cost_ms")]
	pub stage_cost_ms: u64,
	#[serde(default = "default_rerank_cost_ms")]
	pub rerank_cost_ms: u64,
}

/// Per-experiment overrides; unset fields fall back to `[retrieval]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperimentOverride {
	pub top_k: Option<u32>,
	pub rerank_candidates: Option<u32>,
	pub fusion: Option<String>,
	pub rrf_k: Option<f64>,
	pub rerank: Option<String>,
	pub mmr_lambda: Option<f64>,
	pub hybrid_alpha: Option<f64>,
	pub fanout: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cache {
	#[serde(default = "default_result_capacity")]
	pub result_capacity: usize,
	#[serde(default = "default_result_ttl_ms")]
	pub result_ttl_ms: u64,
	#[serde(default = "default_embedding_capacity")]
	pub embedding_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
	pub rate_capacity: f64,
	pub rate_per_sec: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Lifecycle {
	pub baseline_version: String,
	#[serde(default = "default_state_ttl_ms")]
	pub state_ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reindex {
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_base_backoff_ms")]
	pub base_backoff_ms: u64,
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
	#[serde(default = "default_canary_queries")]
	pub canary_queries: u32,
	pub canary_max_p95_ms: f64,
	pub canary_max_error_rate: f64,
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	#[serde(default = "default_claim_lease_s")]
	pub claim_lease_s: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Slo {
	#[serde(default = "default_window")]
	pub window: usize,
	pub max_p95_ms: f64,
	pub max_error_rate: f64,
	pub max_unknown_rate: f64,
	#[serde(default = "default_ewma_alpha")]
	pub ewma_alpha: f64,
	#[serde(default = "default_check_every_s")]
	pub check_every_s: u64,
	#[serde(default = "default_lock_poll_s")]
	pub lock_poll_s: u64,
	#[serde(default = "default_violations_to_remediate")]
	pub violations_to_remediate: u32,
	pub safe_experiment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default = "default_embed_retries")]
	pub max_retries: u32,
	#[serde(default = "default_breaker_threshold")]
	pub breaker_failure_threshold: u32,
	#[serde(default = "default_breaker_cooldown_ms")]
	pub breaker_cooldown_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Security {
	pub bind_localhost_only: bool,
	pub admin_auth_token: Option<String>,
}

fn default_routing_strategy() -> String {
	"subset-by-rendezvous".to_string()
}

fn default_fanout() -> u32 {
	1
}

fn default_reshuffle_probability() -> f64 {
	0.05
}

fn default_hedge_after_ms() -> u64 {
	40
}

fn default_shard_timeout_ms() -> u64 {
	120
}

fn default_budget_ms() -> u64 {
	220
}

fn default_fusion() -> String {
	"rrf".to_string()
}

fn default_rrf_k() -> f64 {
	60.0
}

fn default_rerank() -> String {
	"mmr".to_string()
}

fn default_mmr_lambda() -> f64 {
	0.75
}

fn default_hybrid_alpha() -> f64 {
	0.70
}

fn default_stage_cost_ms() -> u64 {
	60
}

fn default_rerank_cost_ms() -> u64 {
	40
}

fn default_result_capacity() -> usize {
	4_096
}

fn default_result_ttl_ms() -> u64 {
	30_000
}

fn default_embedding_capacity() -> usize {
	16_384
}

fn default_state_ttl_ms() -> u64 {
	2_000
}

fn default_max_retries() -> u32 {
	5
}

fn default_base_backoff_ms() -> u64 {
	500
}

fn default_max_backoff_ms() -> u64 {
	30_000
}

fn default_canary_queries() -> u32 {
	20
}

fn default_poll_interval_ms() -> u64 {
	500
}

fn default_claim_lease_s() -> i64 {
	60
}

fn default_window() -> usize {
	2_000
}

fn default_ewma_alpha() -> f64 {
	0.3
}

fn default_check_every_s() -> u64 {
	5
}

fn default_lock_poll_s() -> u64 {
	3
}

fn default_violations_to_remediate() -> u32 {
	3
}

fn default_embed_retries() -> u32 {
	3
}

fn default_breaker_threshold() -> u32 {
	5
}

fn default_breaker_cooldown_ms() -> u64 {
	10_000
}
