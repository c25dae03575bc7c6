use std::sync::Arc;

use axum::{
	body::Body,
	http::{Request, StatusCode, header::CONTENT_TYPE},
};
use tower::ServiceExt;
use uuid::Uuid;

use plexus_api::{routes, state::AppState};
use plexus_domain::{Candidate, CandidateOrigin, RetrieverKind};
use plexus_service::PlexusService;
use plexus_testkit::{LockGroup, TestBackends, TestStores, sample_config};

fn app_state() -> (AppState, TestBackends) {
	let stores = TestStores::new();
	let backends = TestBackends::new(4);
	let service =
		PlexusService::new(sample_config(&["shard-a"]), stores.stores(), backends.backends());
	let group = LockGroup::new();
	let state = AppState { service: Arc::new(service), lock: Arc::new(group.handle()) };

	(state, backends)
}

fn seeded_candidate() -> Candidate {
	Candidate {
		id: Uuid::from_u128(1),
		parent_document_id: Uuid::from_u128(1_001),
		ordinal: 0,
		text: "hedged retrieval bounds tail latency".to_string(),
		score: 0.93,
		origin: CandidateOrigin {
			retriever_kind: RetrieverKind::Dense,
			embedding_version: "embed-v1".to_string(),
		},
	}
}

fn json_request(uri: &str, payload: serde_json::Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.header(CONTENT_TYPE, "application/json")
		.body(Body::from(payload.to_string()))
		.expect("request")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
	let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");

	serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_answers_ok() {
	let (state, _backends) = app_state();
	let app = routes::router(state);
	let response = app
		.oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
		.await
		.expect("oneshot");

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn search_returns_candidates_as_json() {
	let (state, backends) = app_state();

	backends.shards.set_dense("shard-a", vec![seeded_candidate()]);

	let app = routes::router(state);
	let response = app
		.oneshot(json_request(
			"/v1/search",
			serde_json::json!({ "tenant_id": "tenant-a", "query": "tail latency" }),
		))
		.await
		.expect("oneshot");

	assert_eq!(response.status(), StatusCode::OK);

	let body = body_json(response).await;

	assert_eq!(body["candidates"].as_array().expect("candidates").len(), 1);
	assert_eq!(body["experiment"], "control");
	assert_eq!(body["embedding_version"], "embed-v1");
}

#[tokio::test]
async fn missing_tenant_is_a_bad_request() {
	let (state, _backends) = app_state();
	let app = routes::router(state);
	let response = app
		.oneshot(json_request(
			"/v1/search",
			serde_json::json!({ "tenant_id": " ", "query": "anything" }),
		))
		.await
		.expect("oneshot");

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let body = body_json(response).await;

	assert_eq!(body["error_code"], "invalid_request");
}

#[tokio::test]
async fn version_override_without_header_is_forbidden() {
	let (state, _backends) = app_state();
	let app = routes::router(state);
	let response = app
		.oneshot(json_request(
			"/v1/search",
			serde_json::json!({
				"tenant_id": "tenant-a",
				"query": "canary",
				"embedding_version_override": "embed-v2",
			}),
		))
		.await
		.expect("oneshot");

	assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn version_override_with_header_is_honored() {
	let (state, _backends) = app_state();
	let app = routes::router(state);
	let request = Request::builder()
		.method("POST")
		.uri("/v1/search")
		.header(CONTENT_TYPE, "application/json")
		.header("x-admin-token", "admin-secret")
		.body(Body::from(
			serde_json::json!({
				"tenant_id": "tenant-a",
				"query": "canary",
				"embedding_version_override": "embed-v2",
			})
			.to_string(),
		))
		.expect("request");
	let response = app.oneshot(request).await.expect("oneshot");

	assert_eq!(response.status(), StatusCode::OK);

	let body = body_json(response).await;

	assert_eq!(body["embedding_version"], "embed-v2");
}

#[tokio::test]
async fn overloaded_tenant_gets_429() {
	let (state, _backends) = {
		let stores = TestStores::new();
		let backends = TestBackends::new(4);
		let mut cfg = sample_config(&["shard-a"]);

		cfg.limits.rate_capacity = 1.0;
		cfg.limits.rate_per_sec = 0.001;

		let service = PlexusService::new(cfg, stores.stores(), backends.backends());
		let group = LockGroup::new();

		(AppState { service: Arc::new(service), lock: Arc::new(group.handle()) }, backends)
	};
	let app = routes::router(state);
	let first = app
		.clone()
		.oneshot(json_request(
			"/v1/search",
			serde_json::json!({ "tenant_id": "tenant-a", "query": "one" }),
		))
		.await
		.expect("oneshot");

	assert_eq!(first.status(), StatusCode::OK);

	let second = app
		.oneshot(json_request(
			"/v1/search",
			serde_json::json!({ "tenant_id": "tenant-a", "query": "two" }),
		))
		.await
		.expect("oneshot");

	assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn admin_reindex_enqueues_a_job_and_lifecycle_routes_respond() {
	let (state, _backends) = app_state();
	let admin = routes::admin_router(state.clone());
	let queued = admin
		.clone()
		.oneshot(json_request(
			"/v1/admin/reindex",
			serde_json::json!({ "tenant_id": "tenant-a", "target_version": "embed-v2" }),
		))
		.await
		.expect("oneshot");

	assert_eq!(queued.status(), StatusCode::OK);

	let body = body_json(queued).await;

	assert!(body["job_id"].as_str().is_some());

	let snapshot = admin
		.oneshot(
			Request::builder()
				.uri("/v1/admin/index_state?tenant_id=tenant-a")
				.body(Body::empty())
				.expect("request"),
		)
		.await
		.expect("oneshot");

	assert_eq!(snapshot.status(), StatusCode::OK);

	let body = body_json(snapshot).await;

	assert_eq!(body["active_embedding_version"], "embed-v1");
	assert_eq!(body["index_generation"], 0);
}

#[tokio::test]
async fn clear_override_removes_the_forced_experiment() {
	use plexus_storage::overrides::OverrideStore;

	let stores = TestStores::new();
	let backends = TestBackends::new(4);
	let service =
		PlexusService::new(sample_config(&["shard-a"]), stores.stores(), backends.backends());
	let group = LockGroup::new();
	let state = AppState { service: Arc::new(service), lock: Arc::new(group.handle()) };

	stores
		.overrides
		.set("safe", time::OffsetDateTime::now_utc())
		.await
		.expect("seed override");

	let admin = routes::admin_router(state);
	let cleared = admin
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/v1/admin/clear_override")
				.body(Body::empty())
				.expect("request"),
		)
		.await
		.expect("oneshot");

	assert_eq!(cleared.status(), StatusCode::NO_CONTENT);
	assert!(stores.overrides.get().await.expect("read").is_none());
}
