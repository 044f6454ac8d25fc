use std::{collections::BTreeMap, sync::Arc};

use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode},
};
use serde_json::Value;
use tower::util::ServiceExt;

use quire_api::{routes, state::AppState};
use quire_config::{Config, Service};
use quire_domain::RetrievalResult;
use quire_service::{Collaborators, QuireService, retrieval::StaticRetriever};

fn test_config() -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: Default::default(),
		providers: None,
		orchestrator: Default::default(),
		graph: Default::default(),
		ledger: Default::default(),
		freeze: Default::default(),
		fallback: Default::default(),
		flags: BTreeMap::new(),
	}
}

fn test_state() -> AppState {
	let cfg = test_config();
	let retriever = StaticRetriever::new(vec![
		RetrievalResult::new("doc-1", 0.9, "Axum routes requests through Tower services."),
		RetrievalResult::new("doc-2", 0.6, "Tokio drives the Axum server."),
	]);
	let collaborators = Collaborators::in_memory(&cfg).with_retriever(Arc::new(retriever));

	AppState::from_service(QuireService::new(cfg, collaborators))
}

async fn send(app: &Router, method: &str, uri: &str, payload: Option<Value>) -> (StatusCode, Value) {
	let builder = Request::builder().method(method).uri(uri);
	let request = match payload {
		Some(payload) => builder
			.header("content-type", "application/json")
			.body(Body::from(payload.to_string())),
		None => builder.body(Body::empty()),
	}
	.expect("Failed to build request.");
	let response = app.clone().oneshot(request).await.expect("Failed to call the router.");
	let status = response.status();
	let body = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");
	let json = if body.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&body).expect("Failed to parse response.")
	};

	(status, json)
}

#[tokio::test]
async fn health_ok() {
	let app = routes::router(test_state());
	let (status, _) = send(&app, "GET", "/health", None).await;

	assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn query_then_read_the_ledger() {
	let app = routes::router(test_state());
	let payload = serde_json::json!({
		"query": "How does Axum route requests?",
		"session_id": "s1",
		"message_id": "m1",
		"seed": 7
	});
	let (status, json) = send(&app, "POST", "/v2/query", Some(payload)).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(json["mode"], "enhanced");
	assert_eq!(json["trace"]["stages"].as_array().map(Vec::len), Some(4));

	let (status, entry) = send(&app, "GET", "/v2/ledger/s1/m1", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(entry["trace_hash"], json["ledger"]["trace_hash"]);

	let (status, summary) = send(&app, "GET", "/v2/ledger/s1/m1?role=ops", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(summary["role"], "ops");

	let (status, session) = send(&app, "GET", "/v2/ledger/s1", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(session["entries"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn empty_query_is_a_bad_request() {
	let app = routes::router(test_state());
	let (status, json) =
		send(&app, "POST", "/v2/query", Some(serde_json::json!({ "query": " " }))).await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(json["error_code"], "invalid_request");
}

#[tokio::test]
async fn missing_ledger_entry_is_not_found() {
	let app = routes::router(test_state());
	let (status, json) = send(&app, "GET", "/v2/ledger/nobody/nothing", None).await;

	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(json["error_code"], "not_found");
}

#[tokio::test]
async fn admin_circuit_hooks_switch_to_legacy() {
	let state = test_state();
	let app = routes::router(state.clone());
	let admin = routes::admin_router(state);
	let (status, health) = send(&admin, "POST", "/v2/admin/circuit/open", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(health["active"], false);

	let (_, json) =
		send(&app, "POST", "/v2/query", Some(serde_json::json!({ "query": "What is Axum?" })))
			.await;

	assert_eq!(json["mode"], "legacy");
	assert_eq!(json["selected_context_ids"], serde_json::json!(["doc-1", "doc-2"]));

	let (_, health) = send(&admin, "POST", "/v2/admin/circuit/reset", None).await;

	assert_eq!(health["active"], true);

	let (_, metrics) = send(&admin, "GET", "/v2/admin/metrics", None).await;

	assert_eq!(metrics["counters"]["service.legacy_total"], 1);
}

#[tokio::test]
async fn admin_freeze_and_replay() {
	let admin = routes::admin_router(test_state());
	let (status, frozen) = send(
		&admin,
		"POST",
		"/v2/admin/freeze",
		Some(serde_json::json!({ "query": "How does Axum route requests?", "top_k": 2 })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);

	let trace_id = frozen["trace_id"].as_str().expect("Frozen trace must carry an id.");
	let (_, listed) = send(&admin, "GET", "/v2/admin/freeze", None).await;

	assert_eq!(listed["trace_ids"], serde_json::json!([trace_id]));

	let (status, report) = send(
		&admin,
		"POST",
		"/v2/admin/replay",
		Some(serde_json::json!({ "trace_id": trace_id, "mode": "offline" })),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(report["success"], true);
	assert_eq!(report["validation"]["replayed_hash"], frozen["trace_hash"]);
}
