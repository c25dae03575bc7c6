use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_value() -> Value {
	toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.")
}

fn with_table_edit(section: &str, key: &str, value: Value) -> String {
	let mut root_value = sample_value();
	let root = root_value.as_table_mut().expect("Template config must be a table.");
	let table = root
		.get_mut(section)
		.and_then(Value::as_table_mut)
		.unwrap_or_else(|| panic!("Template config must include [{section}]."));

	table.insert(key.to_string(), value);

	toml::to_string(&root_value).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("plexus_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_payload(payload: String) -> plexus_config::Result<plexus_config::Config> {
	let path = write_temp_config(payload);
	let result = plexus_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn expect_validation_error(payload: String, needle: &str) {
	let err = load_payload(payload).expect_err("Expected a validation error.");
	let message = err.to_string();

	assert!(message.contains(needle), "Unexpected error message: {message}");
}

#[test]
fn sample_config_is_valid() {
	let payload =
		toml::to_string(&sample_value()).expect("Failed to render template config.");
	let cfg = load_payload(payload).expect("Expected the sample config to load.");

	assert_eq!(cfg.shards.len(), 2);
	assert_eq!(cfg.routing.fanout, 1);
	assert_eq!(cfg.retrieval.fusion, "rrf");
	assert_eq!(cfg.slo.safe_experiment, "safe");
}

#[test]
fn empty_admin_token_is_normalized_to_none() {
	let payload = with_table_edit("security", "admin_auth_token", Value::String("  ".to_string()));
	let cfg = load_payload(payload).expect("Expected the config to load.");

	assert!(cfg.security.admin_auth_token.is_none());
}

#[test]
fn routing_strategy_must_be_known() {
	let payload = with_table_edit("routing", "strategy", Value::String("broadcast".to_string()));

	expect_validation_error(payload, "routing.strategy must be one of");
}

#[test]
fn fanout_must_be_positive() {
	let payload = with_table_edit("routing", "fanout", Value::Integer(0));

	expect_validation_error(payload, "routing.fanout must be greater than zero.");
}

#[test]
fn reshuffle_probability_is_bounded() {
	let payload = with_table_edit("routing", "reshuffle_probability", Value::Float(0.9));

	expect_validation_error(payload, "routing.reshuffle_probability must be in the range 0.0-0.5.");
}

#[test]
fn rerank_candidates_must_cover_top_k() {
	let payload = with_table_edit("retrieval", "rerank_candidates", Value::Integer(2));

	expect_validation_error(payload, "retrieval.rerank_candidates must be at least retrieval.top_k.");
}

#[test]
fn fusion_must_be_known() {
	let payload = with_table_edit("retrieval", "fusion", Value::String("borda".to_string()));

	expect_validation_error(payload, "retrieval.fusion must be one of rrf or concatenate.");
}

#[test]
fn mmr_lambda_is_a_unit_ratio() {
	let payload = with_table_edit("retrieval", "mmr_lambda", Value::Float(1.5));

	expect_validation_error(payload, "retrieval.mmr_lambda must be a finite number");
}

#[test]
fn rate_capacity_must_be_positive() {
	let payload = with_table_edit("limits", "rate_capacity", Value::Float(0.0));

	expect_validation_error(payload, "limits.rate_capacity must be a positive finite number.");
}

#[test]
fn baseline_version_must_be_non_empty() {
	let payload = with_table_edit("lifecycle", "baseline_version", Value::String(String::new()));

	expect_validation_error(payload, "lifecycle.baseline_version must be non-empty.");
}

#[test]
fn safe_experiment_must_exist() {
	let payload = with_table_edit("slo", "safe_experiment", Value::String("missing".to_string()));

	expect_validation_error(payload, "must name a configured experiment");
}

#[test]
fn embedding_dimensions_must_be_positive() {
	let mut root_value = sample_value();
	let root = root_value.as_table_mut().expect("Template config must be a table.");
	let providers = root
		.get_mut("providers")
		.and_then(Value::as_table_mut)
		.expect("Template config must include [providers].");
	let embedding = providers
		.get_mut("embedding")
		.and_then(Value::as_table_mut)
		.expect("Template config must include [providers.embedding].");

	embedding.insert("dimensions".to_string(), Value::Integer(0));

	let payload = toml::to_string(&root_value).expect("Failed to render template config.");

	expect_validation_error(payload, "providers.embedding.dimensions must be greater than zero.");
}

#[test]
fn duplicate_shard_names_are_rejected() {
	let mut root_value = sample_value();
	let root = root_value.as_table_mut().expect("Template config must be a table.");
	let shards = root
		.get_mut("shards")
		.and_then(Value::as_array_mut)
		.expect("Template config must include [[shards]].");
	let first = shards.first().cloned().expect("Template config must have a shard.");

	shards.push(first);

	let payload = toml::to_string(&root_value).expect("Failed to render template config.");

	expect_validation_error(payload, "is duplicated");
}
