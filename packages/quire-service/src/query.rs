use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
	Error, QuireService, Result,
	flags::{self, ENHANCED_PIPELINE, TRACE_LEDGER},
	randomness::RandomnessSource,
};
use quire_domain::{LedgerEntry, QueryContext, Trace};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct QueryRequest {
	pub query: String,
	#[serde(default)]
	pub session_id: Option<String>,
	/// Defaults to a fresh UUID.
	#[serde(default)]
	pub message_id: Option<String>,
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub role: Option<String>,
	#[serde(default)]
	pub preferences: Map<String, Value>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
	/// Pins the run's randomness. Live requests normally leave this unset.
	#[serde(default)]
	pub seed: Option<u64>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
	Enhanced,
	Legacy,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LedgerSummary {
	pub original_size: usize,
	pub stored_size: usize,
	pub is_truncated: bool,
	pub trace_hash: Option<String>,
}
impl From<&LedgerEntry> for LedgerSummary {
	fn from(entry: &LedgerEntry) -> Self {
		Self {
			original_size: entry.original_size,
			stored_size: entry.stored_size,
			is_truncated: entry.is_truncated,
			trace_hash: entry.trace_hash.clone(),
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct QueryResponse {
	pub mode: ResponseMode,
	pub session_id: String,
	pub message_id: String,
	pub selected_context_ids: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub trace: Option<Trace>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ledger: Option<LedgerSummary>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

impl QuireService {
	pub async fn query(&self, req: QueryRequest) -> Result<QueryResponse> {
		if req.query.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "query must not be empty.".to_string() });
		}

		let session_id = req.session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
		let message_id = req.message_id.unwrap_or_else(|| Uuid::new_v4().to_string());
		let enhanced = self.flag(ENHANCED_PIPELINE);
		let ctx = QueryContext {
			query: req.query,
			session_id: Some(session_id.clone()),
			user_id: req.user_id,
			role: req.role,
			preferences: req.preferences,
			metadata: req.metadata,
			as_of: None,
		};

		if !enhanced {
			return Ok(self
				.legacy(&ctx, session_id, message_id, "Enhanced pipeline disabled by flag.")
				.await);
		}

		let ledger = self.flag(TRACE_LEDGER).then_some(&self.ledger);
		let mut rng = match req.seed {
			Some(seed) => RandomnessSource::from_seed(seed),
			None => RandomnessSource::from_entropy(),
		};
		let outcome = self
			.guard
			.execute(&self.orchestrator, ledger, &ctx, &session_id, &message_id, &mut rng)
			.await;

		if outcome.use_legacy {
			let reason = outcome.reason.unwrap_or_else(|| "Fallback requested.".to_string());

			return Ok(self.legacy(&ctx, session_id, message_id, &reason).await);
		}

		let trace = outcome.result;

		self.metrics.record_enhanced();

		Ok(QueryResponse {
			mode: ResponseMode::Enhanced,
			session_id,
			message_id,
			selected_context_ids: trace
				.as_ref()
				.map(|trace| trace.selected_context_ids.clone())
				.unwrap_or_default(),
			trace,
			ledger: outcome.ledger_entry.as_ref().map(LedgerSummary::from),
			reason: outcome.reason,
		})
	}

	pub(crate) fn flag(&self, name: &str) -> bool {
		let default = self.cfg.flags.get(name).copied().unwrap_or(true);

		flags::get_flag(self.flags.as_ref(), name, default)
	}

	/// Plain retrieval: the top results by score and nothing else.
	async fn legacy(
		&self,
		ctx: &QueryContext,
		session_id: String,
		message_id: String,
		reason: &str,
	) -> QueryResponse {
		let limit = self.orchestrator.settings().max_selected;
		let (mut results, _) =
			self.orchestrator.retrieve(&ctx.query, self.orchestrator.settings().retrieval_k).await;

		results.sort_by(|a, b| b.score.total_cmp(&a.score));
		results.truncate(limit);

		self.metrics.record_legacy();

		tracing::info!(session_id, message_id, reason, "Serving the legacy retrieval path.");

		QueryResponse {
			mode: ResponseMode::Legacy,
			selected_context_ids: results.into_iter().map(|result| result.id).collect(),
			session_id,
			message_id,
			trace: None,
			ledger: None,
			reason: Some(reason.to_string()),
		}
	}
}
