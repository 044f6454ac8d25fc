use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{ledger::HashAlgorithm, retrieval::RetrievalResult};

const DEFAULT_HASH_PREFIX_LEN: usize = 16;

/// A captured run that can be replayed deterministically.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FrozenTrace {
	pub trace_id: String,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	pub query: String,
	pub role: String,
	pub seed: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub numeric_seed: Option<u64>,
	pub candidates: Vec<RetrievalResult>,
	pub trace: Value,
	pub trace_hash: String,
	/// Digest settings `trace_hash` was computed with; replay hashes the same way.
	#[serde(default)]
	pub hash_algorithm: HashAlgorithm,
	#[serde(default = "default_hash_prefix_len")]
	pub hash_prefix_len: usize,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
	/// Knobs, top_k, and the pinned reference time used at capture.
	#[serde(default)]
	pub pipeline: Map<String, Value>,
}
impl FrozenTrace {
	pub fn candidate_ids(&self) -> Vec<String> {
		self.candidates.iter().map(|candidate| candidate.id.clone()).collect()
	}

	pub fn as_of(&self) -> Option<OffsetDateTime> {
		self.pipeline
			.get("as_of")
			.and_then(Value::as_str)
			.and_then(|raw| {
				OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).ok()
			})
	}
}

fn default_hash_prefix_len() -> usize {
	DEFAULT_HASH_PREFIX_LEN
}
