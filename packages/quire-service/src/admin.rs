use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
	QuireService, Result,
	flags::{ENHANCED_PIPELINE, TRACE_LEDGER},
	freeze::{ReplayMode, ReplayReport},
	metrics::MetricsSnapshot,
};
use quire_domain::{FrozenTrace, HealthStatus, QueryContext};

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
	pub active: bool,
	pub enhanced_pipeline: bool,
	pub trace_ledger: bool,
	pub status: HealthStatus,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CaptureRequest {
	pub query: String,
	#[serde(default)]
	pub role: Option<String>,
	#[serde(default)]
	pub top_k: Option<u32>,
	#[serde(default)]
	pub notes: Option<String>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub as_of: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplayRequest {
	pub trace_id: String,
	#[serde(default)]
	pub mode: ReplayMode,
	#[serde(default)]
	pub seed: Option<u64>,
}

impl QuireService {
	pub fn health(&self) -> HealthReport {
		HealthReport {
			active: self.guard.is_active(),
			enhanced_pipeline: self.flag(ENHANCED_PIPELINE),
			trace_ledger: self.flag(TRACE_LEDGER),
			status: self.guard.status(),
		}
	}

	pub fn open_circuit(&self) -> HealthReport {
		self.guard.open_circuit();

		self.health()
	}

	pub fn reset_circuit(&self) -> HealthReport {
		self.guard.reset();

		self.health()
	}

	pub fn metrics_snapshot(&self) -> MetricsSnapshot {
		self.metrics.snapshot()
	}

	pub async fn capture(&self, req: CaptureRequest) -> Result<FrozenTrace> {
		let ctx = QueryContext { query: req.query, role: req.role, as_of: req.as_of, ..Default::default() };

		if ctx.query.trim().is_empty() {
			return Err(crate::Error::InvalidRequest {
				message: "query must not be empty.".to_string(),
			});
		}

		self.freeze.capture(&ctx, req.top_k, req.notes).await
	}

	pub async fn replay(&self, req: ReplayRequest) -> Result<ReplayReport> {
		self.freeze.replay_with_seed(&req.trace_id, req.mode, req.seed).await
	}
}
