//! Append-only trace persistence with canonical hashing and size-bounded truncation.

use std::{collections::BTreeMap, sync::Arc};

use md5::Md5;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::{Error, Result};
use quire_domain::{HashAlgorithm, LedgerEntry, TRACE_VERSION, Trace};
use quire_storage::ledger::LedgerStore;

/// Keys containing any of these, lowercased, carry wall-clock data and are excluded from hashes.
const TIMING_MARKERS: [&str; 5] = ["latency", "timing", "timestamp", "time_ms", "duration"];

#[derive(Clone, Debug, PartialEq)]
pub struct LedgerOptions {
	pub max_trace_bytes: usize,
	pub enable_hashing: bool,
	pub redact_large_fields: bool,
	pub large_field_chars: usize,
	pub hash_algorithm: HashAlgorithm,
	pub hash_prefix_len: usize,
}
impl LedgerOptions {
	pub fn from_config(cfg: &quire_config::Ledger) -> Self {
		Self {
			max_trace_bytes: cfg.max_trace_bytes,
			enable_hashing: cfg.enable_hashing,
			redact_large_fields: cfg.redact_large_fields,
			large_field_chars: cfg.large_field_chars,
			hash_algorithm: cfg.hash_algorithm.parse().unwrap_or_default(),
			hash_prefix_len: cfg.hash_prefix_len,
		}
	}
}
impl Default for LedgerOptions {
	fn default() -> Self {
		Self::from_config(&quire_config::Ledger::default())
	}
}

/// A trace payload ready to persist.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedTrace {
	pub payload: Value,
	pub original_size: usize,
	pub stored_size: usize,
	pub is_truncated: bool,
	pub trace_hash: Option<String>,
}

/// Recursively drops timing keys and sorts object keys.
pub fn canonicalize(value: &Value) -> Value {
	match value {
		Value::Object(map) => {
			let sorted = map
				.iter()
				.filter(|(key, _)| !is_timing_key(key))
				.map(|(key, value)| (key.clone(), canonicalize(value)))
				.collect::<BTreeMap<_, _>>();

			Value::Object(sorted.into_iter().collect::<Map<_, _>>())
		},
		Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
		other => other.clone(),
	}
}

fn is_timing_key(key: &str) -> bool {
	let lowered = key.to_lowercase();

	TIMING_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Hex digest of the canonical form, truncated to `prefix_len` characters.
pub fn trace_hash(value: &Value, algorithm: HashAlgorithm, prefix_len: usize) -> Result<String> {
	let canonical = serde_json::to_vec(&canonicalize(value))?;
	let mut hex = match algorithm {
		HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(&canonical)),
		HashAlgorithm::Md5 => format!("{:x}", Md5::digest(&canonical)),
		HashAlgorithm::Blake3 => blake3::hash(&canonical).to_hex().to_string(),
	};

	hex.truncate(prefix_len.max(1));

	Ok(hex)
}

pub fn serialized_size(value: &Value) -> Result<usize> {
	Ok(serde_json::to_vec(value)?.len())
}

/// Serializes, redacts, hashes, and truncates a trace. Pure: nothing is persisted.
pub fn prepare(trace: &Trace, options: &LedgerOptions) -> Result<PreparedTrace> {
	let full = serde_json::to_value(trace)?;
	let trace_hash = if options.enable_hashing {
		Some(trace_hash(&full, options.hash_algorithm, options.hash_prefix_len)?)
	} else {
		None
	};

	prepare_payload(full, trace_hash, options)
}

fn prepare_payload(
	mut payload: Value,
	trace_hash: Option<String>,
	options: &LedgerOptions,
) -> Result<PreparedTrace> {
	if options.redact_large_fields {
		redact_stage_fields(&mut payload, options.large_field_chars);
	}

	let max_bytes = options.max_trace_bytes;
	let original_size = serialized_size(&payload)?;

	if original_size <= max_bytes {
		return Ok(PreparedTrace {
			payload,
			original_size,
			stored_size: original_size,
			is_truncated: false,
			trace_hash,
		});
	}

	let (payload, stored_size) = truncate_payload(&payload, original_size, max_bytes)?;

	Ok(PreparedTrace { payload, original_size, stored_size, is_truncated: true, trace_hash })
}

/// Keeps every top-level field and the longest prefix of whole stages that fits in `max_bytes`.
/// Falls back to a version-only skeleton when the other top-level fields alone do not fit, and to
/// a bare object when even that skeleton is over budget.
pub fn truncate_payload(
	payload: &Value,
	original_size: usize,
	max_bytes: usize,
) -> Result<(Value, usize)> {
	let stages = payload.get("stages").and_then(Value::as_array).cloned().unwrap_or_default();
	let marker = |truncated_stage_count: usize, skeleton: &str| {
		serde_json::json!({
			"original_size": original_size,
			"original_stage_count": stages.len(),
			"truncated_stage_count": truncated_stage_count,
			"skeleton": skeleton,
		})
	};
	let mut out = payload.as_object().cloned().unwrap_or_default();

	out.insert("stages".to_string(), Value::Array(Vec::new()));
	out.insert("_truncation".to_string(), marker(0, "full"));

	let mut skeleton = "full";

	if serialized_size(&Value::Object(out.clone()))? > max_bytes {
		let version = payload.get("version").cloned().unwrap_or_else(|| TRACE_VERSION.into());

		skeleton = "empty";
		out = Map::new();

		out.insert("version".to_string(), version);
		out.insert("stages".to_string(), Value::Array(Vec::new()));
		out.insert("_truncation".to_string(), marker(0, skeleton));

		if serialized_size(&Value::Object(out.clone()))? > max_bytes {
			return bare_payload(max_bytes);
		}
	}

	let mut kept = Vec::new();
	let mut stored_size = serialized_size(&Value::Object(out.clone()))?;

	for stage in stages.iter() {
		kept.push(stage.clone());
		out.insert("stages".to_string(), Value::Array(kept.clone()));
		out.insert("_truncation".to_string(), marker(kept.len(), skeleton));

		let size = serialized_size(&Value::Object(out.clone()))?;

		if size > max_bytes {
			kept.pop();
			out.insert("stages".to_string(), Value::Array(kept.clone()));
			out.insert("_truncation".to_string(), marker(kept.len(), skeleton));

			break;
		}

		stored_size = size;
	}

	Ok((Value::Object(out), stored_size))
}

fn bare_payload(max_bytes: usize) -> Result<(Value, usize)> {
	for candidate in [serde_json::json!({ "stages": [] }), Value::Object(Map::new())] {
		let size = serialized_size(&candidate)?;

		if size <= max_bytes {
			return Ok((candidate, size));
		}
	}

	Err(Error::InvalidRequest {
		message: format!("Ledger budget of {max_bytes} bytes cannot hold any trace."),
	})
}

fn redact_stage_fields(payload: &mut Value, max_chars: usize) {
	let Some(stages) = payload.get_mut("stages").and_then(Value::as_array_mut) else {
		return;
	};

	for stage in stages {
		for key in ["input", "output"] {
			if let Some(snapshot) = stage.get_mut(key) {
				redact_strings(snapshot, max_chars);
			}
		}
	}
}

fn redact_strings(value: &mut Value, max_chars: usize) {
	match value {
		Value::String(text) => {
			let chars = text.chars().count();

			if chars > max_chars {
				*text = format!("<redacted {chars} chars>");
			}
		},
		Value::Array(items) => items.iter_mut().for_each(|item| redact_strings(item, max_chars)),
		Value::Object(map) => map.values_mut().for_each(|item| redact_strings(item, max_chars)),
		_ => {},
	}
}

/// Writes and reads traces through a [`LedgerStore`].
pub struct TraceLedger {
	store: Arc<dyn LedgerStore>,
	options: LedgerOptions,
}
impl TraceLedger {
	pub fn new(store: Arc<dyn LedgerStore>, options: LedgerOptions) -> Self {
		Self { store, options }
	}

	pub fn options(&self) -> &LedgerOptions {
		&self.options
	}

	pub async fn write(
		&self,
		session_id: &str,
		message_id: &str,
		trace: &Trace,
	) -> Result<LedgerEntry> {
		let prepared = prepare(trace, &self.options)?;
		let entry = LedgerEntry {
			session_id: session_id.to_string(),
			message_id: message_id.to_string(),
			trace: prepared.payload,
			original_size: prepared.original_size,
			stored_size: prepared.stored_size,
			is_truncated: prepared.is_truncated,
			trace_hash: prepared.trace_hash,
			hash_algorithm: self.options.hash_algorithm,
			created_at: OffsetDateTime::now_utc(),
		};

		self.store.put(&entry).await?;

		tracing::info!(
			session_id,
			message_id,
			stored_size = entry.stored_size,
			is_truncated = entry.is_truncated,
			trace_hash = entry.trace_hash.as_deref().unwrap_or_default(),
			"Trace ledger entry written."
		);

		Ok(entry)
	}

	pub async fn read(&self, session_id: &str, message_id: &str) -> Result<Option<LedgerEntry>> {
		Ok(self.store.get(session_id, message_id).await?)
	}

	pub async fn list_session(&self, session_id: &str) -> Result<Vec<LedgerEntry>> {
		Ok(self.store.list_session(session_id).await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use quire_domain::{StageMetrics, StageName, StageTrace, Timings};
	use quire_storage::ledger::MemoryLedgerStore;

	fn trace_with(duration_ms: f64, payload: &str) -> Trace {
		Trace {
			version: TRACE_VERSION.to_string(),
			query: "What is Rust?".to_string(),
			stages: StageName::ALL
				.iter()
				.map(|stage| StageTrace {
					stage: *stage,
					input: serde_json::json!({ "query": "What is Rust?" }),
					output: serde_json::json!({ "text": payload }),
					metrics: StageMetrics { duration_ms, ..Default::default() },
					error: None,
					warnings: Vec::new(),
				})
				.collect(),
			final_plan: Map::new(),
			timings: Timings {
				total_ms: duration_ms * 4.0,
				orchestration_ms: duration_ms * 4.0,
				planning_ms: 0.0,
			},
			warnings: Vec::new(),
			selected_context_ids: vec!["doc-1".to_string()],
			contradictions: Vec::new(),
			knobs: Map::from_iter([(
				"as_of_timestamp".to_string(),
				Value::String(format!("2025-01-0{}T00:00:00Z", (duration_ms as u32 % 9) + 1)),
			)]),
		}
	}

	#[test]
	fn canonicalize_strips_timing_keys_at_any_depth() {
		let value = serde_json::json!({
			"b": 1,
			"Latency_ms": 3,
			"nested": [{ "duration_ms": 1.0, "keep": true, "createdTimestamp": "x" }],
			"timings": { "total_ms": 1.0 },
		});

		assert_eq!(canonicalize(&value), serde_json::json!({ "b": 1, "nested": [{ "keep": true }] }));
	}

	#[test]
	fn hashes_ignore_wall_clock_fields() {
		let fast = serde_json::to_value(trace_with(1.0, "same")).expect("Failed to serialize.");
		let slow = serde_json::to_value(trace_with(250.0, "same")).expect("Failed to serialize.");
		let other = serde_json::to_value(trace_with(1.0, "different")).expect("Failed to serialize.");

		for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Md5, HashAlgorithm::Blake3] {
			let hash = |value: &Value| trace_hash(value, algorithm, 16).expect("Failed to hash.");

			assert_eq!(hash(&fast), hash(&slow));
			assert_ne!(hash(&fast), hash(&other));
			assert_eq!(hash(&fast).len(), 16);
		}
	}

	#[test]
	fn digests_are_lowercase_hex() {
		let value = serde_json::json!({});

		assert_eq!(
			trace_hash(&value, HashAlgorithm::Sha256, 64).expect("Failed to hash."),
			"44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
		);
		assert_eq!(
			trace_hash(&value, HashAlgorithm::Md5, 64).expect("Failed to hash."),
			"99914b932bd37a50b983c5e7c90ae93b"
		);
	}

	#[test]
	fn small_traces_are_stored_whole() {
		let prepared = prepare(&trace_with(1.0, "tiny"), &LedgerOptions::default())
			.expect("Failed to prepare trace.");

		assert!(!prepared.is_truncated);
		assert_eq!(prepared.original_size, prepared.stored_size);
		assert!(prepared.trace_hash.is_some());
	}

	#[test]
	fn large_traces_keep_a_stage_prefix_under_budget() {
		let mut trace = trace_with(1.0, &"x".repeat(6_400));

		trace.stages = trace.stages.iter().cycle().take(8).cloned().collect();

		let options = LedgerOptions { max_trace_bytes: 10_000, ..Default::default() };
		let prepared = prepare(&trace, &options).expect("Failed to prepare trace.");
		let stages = prepared.payload["stages"].as_array().expect("Stages must be an array.");

		assert!(prepared.original_size >= 50_000);
		assert!(prepared.is_truncated);
		assert!(prepared.stored_size <= 10_000);
		assert_eq!(prepared.stored_size, serialized_size(&prepared.payload).expect("size"));
		assert!(stages.len() < 8);
		assert!(!stages.is_empty());

		for (kept, stage) in stages.iter().zip(StageName::ALL.iter().cycle()) {
			assert_eq!(kept["stage"], stage.as_str());
		}

		assert_eq!(prepared.payload["query"], "What is Rust?");
		assert_eq!(prepared.payload["selected_context_ids"][0], "doc-1");
		assert_eq!(prepared.payload["_truncation"]["skeleton"], "full");
		assert_eq!(prepared.payload["_truncation"]["original_stage_count"], 4);
		assert_eq!(prepared.payload["_truncation"]["truncated_stage_count"], stages.len());
	}

	#[test]
	fn oversized_skeleton_falls_back_to_empty() {
		let mut trace = trace_with(1.0, "small");

		trace.query = "q".repeat(2_000);

		let options = LedgerOptions { max_trace_bytes: 1_000, ..Default::default() };
		let prepared = prepare(&trace, &options).expect("Failed to prepare trace.");

		assert!(prepared.stored_size <= 1_000);
		assert_eq!(prepared.payload["_truncation"]["skeleton"], "empty");
		assert_eq!(prepared.payload["version"], TRACE_VERSION);
		assert!(prepared.payload.get("query").is_none());
	}

	#[test]
	fn tiny_budgets_are_still_honored() {
		let trace = trace_with(1.0, &"y".repeat(2_000));

		for max_trace_bytes in [2, 14, 100, 200, 400] {
			let options = LedgerOptions { max_trace_bytes, ..Default::default() };
			let prepared = prepare(&trace, &options).expect("Failed to prepare trace.");

			assert!(
				prepared.stored_size <= max_trace_bytes,
				"stored {} bytes over a {max_trace_bytes} byte budget",
				prepared.stored_size
			);
			assert_eq!(prepared.is_truncated, prepared.original_size > max_trace_bytes);
			assert_eq!(
				prepared.stored_size,
				serialized_size(&prepared.payload).expect("Failed to size payload.")
			);
		}

		let bare = prepare(&trace, &LedgerOptions { max_trace_bytes: 14, ..Default::default() })
			.expect("Failed to prepare trace.");

		assert_eq!(bare.payload, serde_json::json!({ "stages": [] }));
		assert!(
			prepare(&trace, &LedgerOptions { max_trace_bytes: 1, ..Default::default() }).is_err()
		);
	}

	#[test]
	fn redaction_shrinks_payload_but_not_the_hash() {
		let trace = trace_with(1.0, &"z".repeat(5_000));
		let plain = prepare(&trace, &LedgerOptions::default()).expect("Failed to prepare trace.");
		let redacted = prepare(
			&trace,
			&LedgerOptions { redact_large_fields: true, large_field_chars: 100, ..Default::default() },
		)
		.expect("Failed to prepare trace.");

		assert_eq!(plain.trace_hash, redacted.trace_hash);
		assert!(redacted.stored_size < plain.stored_size);
		assert_eq!(redacted.payload["stages"][0]["output"]["text"], "<redacted 5000 chars>");
	}

	#[tokio::test]
	async fn entries_are_append_only() {
		let ledger =
			TraceLedger::new(Arc::new(MemoryLedgerStore::default()), LedgerOptions::default());
		let trace = trace_with(1.0, "tiny");
		let entry = ledger.write("s1", "m1", &trace).await.expect("Failed to write entry.");

		assert_eq!(entry.hash_algorithm, HashAlgorithm::Sha256);
		assert!(ledger.write("s1", "m1", &trace).await.is_err());

		let loaded = ledger.read("s1", "m1").await.expect("Failed to read.").expect("Missing entry.");

		assert_eq!(loaded, entry);
		assert_eq!(ledger.list_session("s1").await.expect("Failed to list.").len(), 1);
	}
}
