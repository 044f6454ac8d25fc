//! Capture of runs as frozen traces and their deterministic replay.

use std::{fmt::Display, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{
	OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description,
};

use crate::{
	Error, Result,
	ledger::{self, LedgerOptions},
	orchestrator::Orchestrator,
	randomness::RandomnessSource,
};
use quire_domain::{FrozenTrace, HashAlgorithm, QueryContext, RetrievalResult};
use quire_storage::frozen::FrozenTraceStore;

const TRACE_ID_QUERY_CHARS: usize = 40;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
	/// Reads the stored trace back without running anything.
	#[default]
	Offline,
	/// Re-runs the stages on the frozen candidates with the frozen seed and reference time.
	Fixtures,
	/// Re-retrieves with the frozen query, then re-runs the stages with the frozen seed.
	Online,
}
impl ReplayMode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Offline => "offline",
			Self::Fixtures => "fixtures",
			Self::Online => "online",
		}
	}
}
impl FromStr for ReplayMode {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_lowercase().as_str() {
			"offline" => Ok(Self::Offline),
			"fixtures" => Ok(Self::Fixtures),
			"online" => Ok(Self::Online),
			other => Err(Error::InvalidRequest {
				message: format!("Unknown replay mode {other:?}; expected offline, fixtures, or online."),
			}),
		}
	}
}
impl Display for ReplayMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FreezeRequest {
	pub query: String,
	#[serde(default)]
	pub role: Option<String>,
	pub candidates: Vec<RetrievalResult>,
	pub trace: Value,
	#[serde(default)]
	pub top_k: Option<u32>,
	#[serde(default)]
	pub seed: Option<u64>,
	#[serde(default)]
	pub numeric_seed: Option<u64>,
	#[serde(default)]
	pub trace_id: Option<String>,
	#[serde(default)]
	pub notes: Option<String>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub as_of: Option<OffsetDateTime>,
	#[serde(default)]
	pub knobs: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReplayValidation {
	pub hash_match: bool,
	pub candidate_ids_match: bool,
	pub frozen_hash: String,
	pub replayed_hash: String,
	pub frozen_candidate_ids: Vec<String>,
	pub replayed_candidate_ids: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReplayReport {
	pub trace_id: String,
	pub mode: ReplayMode,
	pub success: bool,
	pub validation: ReplayValidation,
	pub replayed_trace: Value,
}

pub struct FreezeHarness {
	store: Arc<dyn FrozenTraceStore>,
	orchestrator: Arc<Orchestrator>,
	hash_algorithm: HashAlgorithm,
	hash_prefix_len: usize,
	default_top_k: u32,
}
impl FreezeHarness {
	pub fn new(
		store: Arc<dyn FrozenTraceStore>,
		orchestrator: Arc<Orchestrator>,
		ledger_options: &LedgerOptions,
		default_top_k: u32,
	) -> Self {
		Self {
			store,
			orchestrator,
			hash_algorithm: ledger_options.hash_algorithm,
			hash_prefix_len: ledger_options.hash_prefix_len,
			default_top_k,
		}
	}


	/// Persists a run. The id is derived from the query and the current time unless supplied.
	pub async fn freeze(&self, req: FreezeRequest) -> Result<FrozenTrace> {
		if req.query.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "query must not be empty.".to_string() });
		}

		let created_at = OffsetDateTime::now_utc();
		let top_k = req.top_k.unwrap_or(self.default_top_k);
		let trace_id = match req.trace_id {
			Some(trace_id) => trace_id,
			None => derive_trace_id(&req.query, created_at)?,
		};
		let mut candidates = req.candidates;

		candidates.truncate(top_k as usize);

		let mut pipeline = Map::new();

		pipeline.insert("knobs".to_string(), Value::Object(req.knobs));
		pipeline.insert("top_k".to_string(), Value::from(top_k));

		if let Some(as_of) = req.as_of {
			pipeline.insert("as_of".to_string(), Value::String(format_rfc3339(as_of)?));
		}

		let frozen = FrozenTrace {
			trace_id,
			created_at,
			query: req.query,
			role: req.role.unwrap_or_else(|| "general".to_string()),
			seed: req.seed.unwrap_or_else(rand::random),
			numeric_seed: req.numeric_seed,
			candidates,
			trace_hash: ledger::trace_hash(&req.trace, self.hash_algorithm, self.hash_prefix_len)?,
			hash_algorithm: self.hash_algorithm,
			hash_prefix_len: self.hash_prefix_len,
			trace: req.trace,
			notes: req.notes,
			pipeline,
		};

		self.store.put(&frozen).await?;

		tracing::info!(
			trace_id = %frozen.trace_id,
			candidates = frozen.candidates.len(),
			trace_hash = %frozen.trace_hash,
			"Trace frozen."
		);

		Ok(frozen)
	}

	/// Retrieves, runs the stages on exactly the kept candidates with a fresh seed, and freezes.
	pub async fn capture(
		&self,
		ctx: &QueryContext,
		top_k: Option<u32>,
		notes: Option<String>,
	) -> Result<FrozenTrace> {
		let top_k = top_k.unwrap_or(self.default_top_k);
		let (mut candidates, warning) = self.orchestrator.retrieve(&ctx.query, top_k).await;

		if let Some(warning) = warning {
			tracing::warn!(warning = %warning, "Capturing a run without retrieval results.");
		}

		candidates.truncate(top_k as usize);

		let as_of = ctx.as_of.unwrap_or_else(OffsetDateTime::now_utc);
		let ctx = QueryContext { as_of: Some(as_of), ..ctx.clone() };
		let mut rng = RandomnessSource::from_entropy();
		let trace = self.orchestrator.run_with_results(&ctx, candidates.clone(), &mut rng).await?;

		self.freeze(FreezeRequest {
			query: ctx.query.clone(),
			role: ctx.role.clone(),
			candidates,
			knobs: trace.knobs.clone(),
			trace: serde_json::to_value(&trace)?,
			top_k: Some(top_k),
			seed: Some(rng.seed()),
			numeric_seed: rng.numeric_seed(),
			trace_id: None,
			notes,
			as_of: Some(as_of),
		})
		.await
	}

	pub async fn get(&self, trace_id: &str) -> Result<FrozenTrace> {
		self.store.get(trace_id).await?.ok_or_else(|| Error::NotFound {
			message: format!("Frozen trace {trace_id} does not exist."),
		})
	}

	pub async fn list(&self) -> Result<Vec<String>> {
		Ok(self.store.list().await?)
	}

	pub async fn replay(&self, trace_id: &str, mode: ReplayMode) -> Result<ReplayReport> {
		self.replay_with_seed(trace_id, mode, None).await
	}

	/// Replays with the frozen seed, or `seed` when given.
	pub async fn replay_with_seed(
		&self,
		trace_id: &str,
		mode: ReplayMode,
		seed: Option<u64>,
	) -> Result<ReplayReport> {
		let frozen = self.get(trace_id).await?;
		let frozen_candidate_ids = frozen.candidate_ids();
		let (replayed_trace, replayed_candidate_ids) = match mode {
			ReplayMode::Offline => (frozen.trace.clone(), frozen_candidate_ids.clone()),
			ReplayMode::Fixtures => {
				let trace = self.rerun(&frozen, frozen.candidates.clone(), seed).await?;

				(trace, frozen_candidate_ids.clone())
			},
			ReplayMode::Online => {
				let top_k = frozen
					.pipeline
					.get("top_k")
					.and_then(Value::as_u64)
					.and_then(|top_k| u32::try_from(top_k).ok())
					.unwrap_or(self.default_top_k);
				let (mut candidates, _) = self.orchestrator.retrieve(&frozen.query, top_k).await;

				candidates.truncate(top_k as usize);

				let ids = candidates.iter().map(|candidate| candidate.id.clone()).collect();
				let trace = self.rerun(&frozen, candidates, seed).await?;

				(trace, ids)
			},
		};
		let replayed_hash =
			ledger::trace_hash(&replayed_trace, frozen.hash_algorithm, frozen.hash_prefix_len)?;
		let hash_match = replayed_hash == frozen.trace_hash;
		let candidate_ids_match = replayed_candidate_ids == frozen_candidate_ids;

		tracing::info!(
			trace_id,
			mode = %mode,
			hash_match,
			candidate_ids_match,
			"Trace replayed."
		);

		Ok(ReplayReport {
			trace_id: frozen.trace_id.clone(),
			mode,
			success: hash_match && candidate_ids_match,
			validation: ReplayValidation {
				hash_match,
				candidate_ids_match,
				frozen_hash: frozen.trace_hash.clone(),
				replayed_hash,
				frozen_candidate_ids,
				replayed_candidate_ids,
			},
			replayed_trace,
		})
	}

	async fn rerun(
		&self,
		frozen: &FrozenTrace,
		candidates: Vec<RetrievalResult>,
		seed: Option<u64>,
	) -> Result<Value> {
		let ctx = QueryContext {
			query: frozen.query.clone(),
			role: Some(frozen.role.clone()),
			as_of: frozen.as_of(),
			..Default::default()
		};
		let mut rng =
			RandomnessSource::with_numeric_seed(seed.unwrap_or(frozen.seed), frozen.numeric_seed);
		let trace = self.orchestrator.run_with_results(&ctx, candidates, &mut rng).await?;

		Ok(serde_json::to_value(&trace)?)
	}
}

/// `<sanitized query prefix>_<UTC timestamp>`, safe as a file name.
pub fn derive_trace_id(query: &str, at: OffsetDateTime) -> Result<String> {
	let mut prefix = String::new();

	for c in query.trim().chars() {
		if prefix.chars().count() >= TRACE_ID_QUERY_CHARS {
			break;
		}
		if c.is_ascii_alphanumeric() {
			prefix.push(c.to_ascii_lowercase());
		} else if !prefix.is_empty() && !prefix.ends_with('_') {
			prefix.push('_');
		}
	}

	let prefix = prefix.trim_end_matches('_');
	let prefix = if prefix.is_empty() { "trace" } else { prefix };
	let stamp = at
		.to_offset(time::UtcOffset::UTC)
		.format(format_description!(
			"[year][month][day]T[hour][minute][second][subsecond digits:3]Z"
		))
		.map_err(|err| Error::Serialization { message: err.to_string() })?;

	Ok(format!("{prefix}_{stamp}"))
}

fn format_rfc3339(at: OffsetDateTime) -> Result<String> {
	at.format(&Rfc3339).map_err(|err| Error::Serialization { message: err.to_string() })
}

#[cfg(test)]
mod tests {
	use super::*;
	use time::macros::datetime;

	#[test]
	fn trace_ids_are_file_safe() {
		let at = datetime!(2025-03-04 05:06:07.891 UTC);
		let id = derive_trace_id("What is the capital of France?!", at).expect("Failed to derive.");

		assert_eq!(id, "what_is_the_capital_of_france_20250304T050607891Z");
		assert!(quire_storage::frozen::validate_trace_id(&id).is_ok());
		assert_eq!(derive_trace_id("???", at).expect("Failed to derive."), "trace_20250304T050607891Z");
	}

	#[test]
	fn long_queries_are_cut() {
		let at = datetime!(2025-03-04 05:06:07 UTC);
		let id = derive_trace_id(&"abc ".repeat(40), at).expect("Failed to derive.");
		let (prefix, _) = id.rsplit_once('_').expect("Missing timestamp.");

		assert!(prefix.len() <= TRACE_ID_QUERY_CHARS);
	}

	#[test]
	fn replay_modes_parse() {
		assert_eq!("Fixtures".parse::<ReplayMode>().ok(), Some(ReplayMode::Fixtures));
		assert!("live".parse::<ReplayMode>().is_err());
	}
}
