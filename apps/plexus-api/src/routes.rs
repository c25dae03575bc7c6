use axum::{
	Json, Router,
	extract::{Query, State},
	http::{HeaderMap, StatusCode},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use plexus_service::{SearchRequest, SearchResponse, ServiceError};
use plexus_storage::models::{RemediationOverride, WorkspaceIndexState};

use crate::state::AppState;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/search", post(search))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/index_state", get(index_state))
		.route("/v1/admin/reindex", post(reindex))
		.route("/v1/admin/promote", post(promote))
		.route("/v1/admin/rollback", post(rollback))
		.route("/v1/admin/override", get(get_override))
		.route("/v1/admin/clear_override", post(clear_override))
		.route("/v1/admin/slo", get(slo))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn search(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(mut payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
	// The credential gating the canary version override travels in a header,
	// never in the request body.
	payload.admin_token = headers
		.get(ADMIN_TOKEN_HEADER)
		.and_then(|value| value.to_str().ok())
		.map(|value| value.to_string());

	let response = state.service.search(payload).await?;

	Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct TenantQuery {
	tenant_id: String,
}

async fn index_state(
	State(state): State<AppState>,
	Query(query): Query<TenantQuery>,
) -> Result<Json<WorkspaceIndexState>, ApiError> {
	let snapshot = state.service.lifecycle.fresh_state(&query.tenant_id).await?;

	Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct ReindexRequest {
	tenant_id: String,
	target_version: String,
}

#[derive(Debug, Serialize)]
struct ReindexQueued {
	job_id: uuid::Uuid,
}

async fn reindex(
	State(state): State<AppState>,
	Json(payload): Json<ReindexRequest>,
) -> Result<Json<ReindexQueued>, ApiError> {
	if payload.tenant_id.trim().is_empty() || payload.target_version.trim().is_empty() {
		return Err(ApiError::from(ServiceError::InvalidRequest {
			message: "tenant_id and target_version are required.".to_string(),
		}));
	}

	let job_id = state
		.service
		.stores
		.jobs
		.enqueue(&payload.tenant_id, &payload.target_version, OffsetDateTime::now_utc())
		.await
		.map_err(ServiceError::from)?;

	Ok(Json(ReindexQueued { job_id }))
}

#[derive(Debug, Deserialize)]
struct LifecycleRequest {
	tenant_id: String,
}

async fn promote(
	State(state): State<AppState>,
	Json(payload): Json<LifecycleRequest>,
) -> Result<Json<WorkspaceIndexState>, ApiError> {
	let snapshot = state.service.lifecycle.promote(&payload.tenant_id).await?;

	Ok(Json(snapshot))
}

async fn rollback(
	State(state): State<AppState>,
	Json(payload): Json<LifecycleRequest>,
) -> Result<Json<WorkspaceIndexState>, ApiError> {
	let snapshot = state.service.lifecycle.rollback(&payload.tenant_id).await?;

	Ok(Json(snapshot))
}

async fn get_override(
	State(state): State<AppState>,
) -> Result<Json<Option<RemediationOverride>>, ApiError> {
	let current = state.service.stores.overrides.get().await.map_err(ServiceError::from)?;

	Ok(Json(current))
}

async fn clear_override(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
	state.service.stores.overrides.clear().await.map_err(ServiceError::from)?;
	tracing::info!("Remediation override cleared by an operator.");

	Ok(StatusCode::NO_CONTENT)
}

async fn slo(State(state): State<AppState>) -> Json<plexus_service::SloSnapshot> {
	Json(state.service.slo.snapshot())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}

impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let message = err.to_string();

		match err {
			ServiceError::InvalidRequest { .. } => {
				Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
			},
			ServiceError::Overload { .. } => {
				Self::new(StatusCode::TOO_MANY_REQUESTS, "overload", message)
			},
			ServiceError::ScopeDenied { .. } => {
				Self::new(StatusCode::FORBIDDEN, "scope_denied", message)
			},
			ServiceError::Conflict { .. } => Self::new(StatusCode::CONFLICT, "conflict", message),
			ServiceError::ReindexFailed { .. } => {
				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "reindex_failed", message)
			},
			ServiceError::Provider { .. } => {
				Self::new(StatusCode::BAD_GATEWAY, "provider_error", message)
			},
			ServiceError::Storage { .. } => {
				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", message)
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
