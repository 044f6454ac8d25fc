use axum::{
	Json, Router,
	extract::{Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::AppState;
use quire_service::{
	CaptureRequest, Error as ServiceError, HealthReport, QueryRequest, QueryResponse,
	ReplayRequest, freeze::ReplayReport, metrics::MetricsSnapshot, summary::AudienceRole,
};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v2/query", post(query))
		.route("/v2/ledger/{session_id}", get(ledger_session))
		.route("/v2/ledger/{session_id}/{message_id}", get(ledger_entry))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v2/admin/health", get(admin_health))
		.route("/v2/admin/metrics", get(metrics))
		.route("/v2/admin/circuit/open", post(open_circuit))
		.route("/v2/admin/circuit/reset", post(reset_circuit))
		.route("/v2/admin/freeze", get(list_frozen).post(freeze))
		.route("/v2/admin/replay", post(replay))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn query(
	State(state): State<AppState>,
	Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
	let response = state.service.query(payload).await?;

	Ok(Json(response))
}

async fn ledger_session(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
	let entries = state.service.ledger_session(&session_id).await?;

	Ok(Json(serde_json::json!({ "session_id": session_id, "entries": entries })))
}

#[derive(Debug, Deserialize)]
struct LedgerEntryQuery {
	role: Option<String>,
}

async fn ledger_entry(
	State(state): State<AppState>,
	Path((session_id, message_id)): Path<(String, String)>,
	Query(params): Query<LedgerEntryQuery>,
) -> Result<Json<Value>, ApiError> {
	let body = match params.role {
		Some(role) => {
			let summary = state
				.service
				.ledger_summary(&session_id, &message_id, AudienceRole::from_role(&role))
				.await?;

			serde_json::to_value(summary).map_err(ServiceError::from)?
		},
		None => {
			let entry = state.service.ledger_entry(&session_id, &message_id).await?;

			serde_json::to_value(entry).map_err(ServiceError::from)?
		},
	};

	Ok(Json(body))
}

async fn admin_health(State(state): State<AppState>) -> Json<HealthReport> {
	Json(state.service.health())
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
	Json(state.service.metrics_snapshot())
}

async fn open_circuit(State(state): State<AppState>) -> Json<HealthReport> {
	Json(state.service.open_circuit())
}

async fn reset_circuit(State(state): State<AppState>) -> Json<HealthReport> {
	Json(state.service.reset_circuit())
}

async fn freeze(
	State(state): State<AppState>,
	Json(payload): Json<CaptureRequest>,
) -> Result<Json<Value>, ApiError> {
	let frozen = state.service.capture(payload).await?;

	Ok(Json(serde_json::to_value(frozen).map_err(ServiceError::from)?))
}

async fn list_frozen(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
	let ids = state.service.freeze.list().await?;

	Ok(Json(serde_json::json!({ "trace_ids": ids })))
}

async fn replay(
	State(state): State<AppState>,
	Json(payload): Json<ReplayRequest>,
) -> Result<Json<ReplayReport>, ApiError> {
	let report = state.service.replay(payload).await?;

	Ok(Json(report))
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
		match err {
			ServiceError::InvalidRequest { message } =>
				Self::new(StatusCode::BAD_REQUEST, "invalid_request", message),
			ServiceError::NotFound { message } =>
				Self::new(StatusCode::NOT_FOUND, "not_found", message),
			ServiceError::Conflict { message } =>
				Self::new(StatusCode::CONFLICT, "conflict", message),
			other => {
				tracing::error!(error = %other, "Request failed.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string())
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
