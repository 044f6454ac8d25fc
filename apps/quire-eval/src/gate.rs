//! Replay regression gate over a list of frozen traces.

use std::{fs, path::Path};

use color_eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use quire_service::{
	QuireService, ReplayRequest,
	freeze::{ReplayMode, ReplayReport},
};

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub struct GateRequirements {
	pub require_hash_match: Option<bool>,
	pub require_candidate_ids_match: Option<bool>,
	/// Upper bound on positional churn between frozen and replayed selected ids.
	pub max_selected_churn: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct GateTrace {
	pub trace_id: String,
	pub mode: Option<ReplayMode>,
	pub seed: Option<u64>,
	#[serde(flatten)]
	pub requirements: GateRequirements,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GateFile {
	#[serde(default)]
	pub defaults: GateRequirements,
	pub mode: Option<ReplayMode>,
	pub traces: Vec<GateTrace>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct GateReport {
	pub config_path: String,
	pub gate_path: String,
	pub summary: GateSummary,
	pub traces: Vec<TraceReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct GateSummary {
	pub trace_count: usize,
	pub breached_count: usize,
	pub ok: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TraceReport {
	pub trace_id: String,
	pub mode: ReplayMode,
	pub hash_match: bool,
	pub candidate_ids_match: bool,
	pub frozen_hash: String,
	pub replayed_hash: String,
	pub selected_churn: f64,
	pub breaches: Vec<GateBreach>,
	pub ok: bool,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GateBreach {
	pub metric: String,
	pub value: f64,
	pub threshold: f64,
	pub op: String,
}

pub fn load_gate_file(path: &Path) -> Result<GateFile> {
	let raw = fs::read_to_string(path)?;
	let gate: GateFile = serde_json::from_str(&raw)?;

	if gate.traces.is_empty() {
		return Err(eyre::eyre!("Gate JSON must include at least one trace."));
	}

	Ok(gate)
}

/// Hash and candidate agreement are required unless the gate says otherwise.
pub fn merge_requirements(
	defaults: GateRequirements,
	overrides: GateRequirements,
) -> GateRequirements {
	GateRequirements {
		require_hash_match: overrides
			.require_hash_match
			.or(defaults.require_hash_match)
			.or(Some(true)),
		require_candidate_ids_match: overrides
			.require_candidate_ids_match
			.or(defaults.require_candidate_ids_match)
			.or(Some(true)),
		max_selected_churn: overrides.max_selected_churn.or(defaults.max_selected_churn),
	}
}

pub async fn run_gate(service: &QuireService, gate: &GateFile) -> Result<GateReport> {
	let mut traces = Vec::with_capacity(gate.traces.len());
	let mut breached_count = 0_usize;

	for trace in &gate.traces {
		let mode = trace.mode.or(gate.mode).unwrap_or(ReplayMode::Fixtures);
		let replay = service
			.replay(ReplayRequest { trace_id: trace.trace_id.clone(), mode, seed: trace.seed })
			.await?;
		let frozen = service.freeze.get(&trace.trace_id).await?;
		let requirements = merge_requirements(gate.defaults, trace.requirements);
		let report = evaluate(&replay, &frozen.trace, requirements);

		if !report.ok {
			breached_count += 1;
		}

		traces.push(report);
	}

	Ok(GateReport {
		config_path: String::new(),
		gate_path: String::new(),
		summary: GateSummary {
			trace_count: traces.len(),
			breached_count,
			ok: breached_count == 0,
		},
		traces,
	})
}

pub fn evaluate(
	replay: &ReplayReport,
	frozen_trace: &Value,
	requirements: GateRequirements,
) -> TraceReport {
	let validation = &replay.validation;
	let frozen_selected = selected_ids(frozen_trace);
	let replayed_selected = selected_ids(&replay.replayed_trace);
	let selected_churn = positional_churn(&frozen_selected, &replayed_selected);
	let mut breaches = Vec::new();

	if requirements.require_hash_match == Some(true) && !validation.hash_match {
		breaches.push(GateBreach {
			metric: "hash_match".to_string(),
			value: 0.0,
			threshold: 1.0,
			op: "==".to_string(),
		});
	}
	if requirements.require_candidate_ids_match == Some(true) && !validation.candidate_ids_match {
		breaches.push(GateBreach {
			metric: "candidate_ids_match".to_string(),
			value: 0.0,
			threshold: 1.0,
			op: "==".to_string(),
		});
	}
	if let Some(max) = requirements.max_selected_churn
		&& selected_churn > max
	{
		breaches.push(GateBreach {
			metric: "selected_churn".to_string(),
			value: selected_churn,
			threshold: max,
			op: "<=".to_string(),
		});
	}

	TraceReport {
		trace_id: replay.trace_id.clone(),
		mode: replay.mode,
		hash_match: validation.hash_match,
		candidate_ids_match: validation.candidate_ids_match,
		frozen_hash: validation.frozen_hash.clone(),
		replayed_hash: validation.replayed_hash.clone(),
		selected_churn,
		ok: breaches.is_empty(),
		breaches,
	}
}

fn selected_ids(trace: &Value) -> Vec<String> {
	trace
		.get("selected_context_ids")
		.and_then(Value::as_array)
		.map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
		.unwrap_or_default()
}

/// Share of positions whose id differs, over the longer list. Two synthesized ids in the same
/// position count as equal since their ids are drawn from the seed.
pub fn positional_churn(baseline: &[String], other: &[String]) -> f64 {
	let k = baseline.len().max(other.len());

	if k == 0 {
		return 0.0;
	}

	let synthesized = |id: &String| id.starts_with("expanded-");
	let mut diff = 0_usize;

	for idx in 0..k {
		match (baseline.get(idx), other.get(idx)) {
			(Some(a), Some(b)) if a == b => {},
			(Some(a), Some(b)) if synthesized(a) && synthesized(b) => {},
			_ => diff += 1,
		}
	}

	diff as f64 / k as f64
}

#[cfg(test)]
mod tests {
	use super::*;
	use quire_service::freeze::ReplayValidation;

	fn ids(raw: &[&str]) -> Vec<String> {
		raw.iter().map(|id| id.to_string()).collect()
	}

	fn report(hash_match: bool, candidate_ids_match: bool, selected: &[&str]) -> ReplayReport {
		ReplayReport {
			trace_id: "t1".to_string(),
			mode: ReplayMode::Fixtures,
			success: hash_match && candidate_ids_match,
			validation: ReplayValidation {
				hash_match,
				candidate_ids_match,
				frozen_hash: "aaaa".to_string(),
				replayed_hash: if hash_match { "aaaa" } else { "bbbb" }.to_string(),
				frozen_candidate_ids: ids(&["a", "b"]),
				replayed_candidate_ids: ids(&["a", "b"]),
			},
			replayed_trace: serde_json::json!({ "selected_context_ids": selected }),
		}
	}

	#[test]
	fn requirements_default_to_strict() {
		let merged = merge_requirements(GateRequirements::default(), GateRequirements::default());

		assert_eq!(merged.require_hash_match, Some(true));
		assert_eq!(merged.require_candidate_ids_match, Some(true));
		assert_eq!(merged.max_selected_churn, None);
	}

	#[test]
	fn trace_overrides_win_over_defaults() {
		let defaults = GateRequirements {
			require_hash_match: Some(false),
			max_selected_churn: Some(0.5),
			..Default::default()
		};
		let overrides = GateRequirements { max_selected_churn: Some(0.1), ..Default::default() };
		let merged = merge_requirements(defaults, overrides);

		assert_eq!(merged.require_hash_match, Some(false));
		assert_eq!(merged.max_selected_churn, Some(0.1));
	}

	#[test]
	fn hash_and_candidate_checks_gate_independently() {
		let frozen = serde_json::json!({ "selected_context_ids": ["a", "b"] });
		let strict = merge_requirements(GateRequirements::default(), GateRequirements::default());
		let hash_only = report(false, true, &["a", "b"]);
		let out = evaluate(&hash_only, &frozen, strict);

		assert!(!out.ok);
		assert_eq!(out.breaches.len(), 1);
		assert_eq!(out.breaches[0].metric, "hash_match");

		let relaxed = GateRequirements { require_hash_match: Some(false), ..strict };

		assert!(evaluate(&hash_only, &frozen, relaxed).ok);

		let candidates_only = report(true, false, &["a", "b"]);
		let out = evaluate(&candidates_only, &frozen, strict);

		assert_eq!(out.breaches.len(), 1);
		assert_eq!(out.breaches[0].metric, "candidate_ids_match");
	}

	#[test]
	fn candidate_drift_alone_breaches_the_gate() {
		let frozen = serde_json::json!({ "selected_context_ids": ["a", "b"] });
		let mut drifted = report(true, false, &["a", "b"]);

		drifted.mode = ReplayMode::Online;
		drifted.validation.replayed_candidate_ids = ids(&["b", "a"]);

		let strict = merge_requirements(GateRequirements::default(), GateRequirements::default());
		let out = evaluate(&drifted, &frozen, strict);

		assert!(out.hash_match);
		assert!(!out.candidate_ids_match);
		assert_eq!(out.mode, ReplayMode::Online);
		assert_eq!(
			out.breaches,
			vec![GateBreach {
				metric: "candidate_ids_match".to_string(),
				value: 0.0,
				threshold: 1.0,
				op: "==".to_string(),
			}]
		);

		let relaxed = GateRequirements { require_candidate_ids_match: Some(false), ..strict };

		assert!(evaluate(&drifted, &frozen, relaxed).ok);
	}

	#[test]
	fn churn_threshold_is_enforced() {
		let frozen = serde_json::json!({ "selected_context_ids": ["a", "b", "c", "d"] });
		let requirements = GateRequirements {
			require_hash_match: Some(false),
			require_candidate_ids_match: Some(false),
			max_selected_churn: Some(0.25),
		};
		let out = evaluate(&report(false, true, &["b", "a", "c", "d"]), &frozen, requirements);

		assert_eq!(out.selected_churn, 0.5);
		assert_eq!(out.breaches[0].metric, "selected_churn");
	}

	#[test]
	fn synthesized_ids_compare_by_position_only() {
		let baseline = ids(&["a", "expanded-0001"]);
		let other = ids(&["a", "expanded-ffff"]);

		assert_eq!(positional_churn(&baseline, &other), 0.0);
		assert_eq!(positional_churn(&[], &[]), 0.0);
		assert_eq!(positional_churn(&ids(&["a"]), &[]), 1.0);
	}
}
