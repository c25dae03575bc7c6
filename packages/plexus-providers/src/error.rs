pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("Embedding circuit breaker is open.")]
	CircuitOpen,
	#[error("{message}")]
	InvalidResponse { message: String },
	#[error("Retries exhausted after {attempts} attempts: {message}")]
	RetriesExhausted { attempts: u32, message: String },
}
