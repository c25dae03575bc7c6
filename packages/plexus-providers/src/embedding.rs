use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{
	Error, Result,
	breaker::CircuitBreaker,
	retry::{RetryPolicy, retry_with_backoff},
};

/// HTTP embedding client.
///
/// Transient failures are retried with backoff; sustained failure opens the
/// circuit breaker, after which calls fail fast until a cooldown probe
/// succeeds. Vector dimensionality is fixed per embedding version.
pub struct EmbeddingClient {
	cfg: plexus_config::EmbeddingProviderConfig,
	client: Client,
	breaker: CircuitBreaker,
	retry: RetryPolicy,
}

impl EmbeddingClient {
	pub fn new(cfg: plexus_config::EmbeddingProviderConfig) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
		let breaker = CircuitBreaker::new(
			cfg.breaker_failure_threshold,
			Duration::from_millis(cfg.breaker_cooldown_ms),
		);
		let retry = RetryPolicy::new(
			cfg.max_retries,
			Duration::from_millis(250),
			Duration::from_millis(4_000),
		);

		Ok(Self { cfg, client, breaker, retry })
	}

	pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
		let vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;

		vectors.into_iter().next().ok_or_else(|| Error::InvalidResponse {
			message: "Embedding provider returned no vectors.".to_string(),
		})
	}

	pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let vectors =
			retry_with_backoff(&self.retry, || async { self.embed_once(texts).await }).await?;

		if vectors.len() != texts.len() {
			return Err(Error::InvalidResponse {
				message: format!(
					"Embedding provider returned {} vectors for {} inputs.",
					vectors.len(),
					texts.len()
				),
			});
		}

		for vector in &vectors {
			if vector.len() != self.cfg.dimensions as usize {
				return Err(Error::InvalidResponse {
					message: format!(
						"Embedding dimension {} does not match configured dimensions {}.",
						vector.len(),
						self.cfg.dimensions
					),
				});
			}
		}

		Ok(vectors)
	}

	async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		if !self.breaker.admit() {
			return Err(Error::CircuitOpen);
		}

		let result = self.request(texts).await;

		match &result {
			Ok(_) => self.breaker.record_success(),
			Err(_) => self.breaker.record_failure(),
		}

		result
	}

	async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let url = format!("{}{}", self.cfg.api_base, self.cfg.path);
		let body = serde_json::json!({
			"model": self.cfg.model,
			"input": texts,
			"dimensions": self.cfg.dimensions,
		});
		let res = self
			.client
			.post(url)
			.headers(auth_headers(&self.cfg.api_key, &self.cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;

		parse_embedding_response(json)
	}
}

pub fn auth_headers(
	api_key: &str,
	default_headers: &serde_json::Map<String, Value>,
) -> Result<reqwest::header::HeaderMap> {
	use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName};

	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidResponse {
				message: "Default header values must be strings.".to_string(),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
	let data = json.get("data").and_then(|v| v.as_array()).ok_or_else(|| {
		Error::InvalidResponse { message: "Embedding response is missing data array.".to_string() }
	})?;

	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);
		let embedding = item.get("embedding").and_then(|v| v.as_array()).ok_or_else(|| {
			Error::InvalidResponse { message: "Embedding item missing embedding array.".to_string() }
		})?;
		let mut vec = Vec::with_capacity(embedding.len());

		for value in embedding {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding value must be numeric.".to_string(),
			})?;

			vec.push(number as f32);
		}

		indexed.push((index, vec));
	}

	indexed.sort_by_key(|(index, _)| *index);

	Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_embeddings_in_index_order() {
		let json = serde_json::json!({
			"data": [
				{ "index": 1, "embedding": [2.0, 3.0] },
				{ "index": 0, "embedding": [0.5, 1.5] }
			]
		});
		let parsed = parse_embedding_response(json).expect("parse failed");

		assert_eq!(parsed.len(), 2);
		assert_eq!(parsed[0], vec![0.5, 1.5]);
		assert_eq!(parsed[1], vec![2.0, 3.0]);
	}

	#[test]
	fn missing_data_array_is_an_invalid_response() {
		let json = serde_json::json!({ "error": "rate limited" });
		let err = parse_embedding_response(json).expect_err("expected parse failure");

		assert!(err.to_string().contains("missing data array"));
	}
}
