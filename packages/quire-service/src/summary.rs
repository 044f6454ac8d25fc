//! Role-tailored, human-readable views of a stored or live trace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use quire_domain::redact;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudienceRole {
	#[default]
	General,
	Pro,
	Scholars,
	Analytics,
	Ops,
}
impl AudienceRole {
	/// Unknown roles get the most restrictive view.
	pub fn from_role(role: &str) -> Self {
		match role.trim().to_lowercase().as_str() {
			"pro" => Self::Pro,
			"scholars" | "scholar" => Self::Scholars,
			"analytics" => Self::Analytics,
			"ops" => Self::Ops,
			_ => Self::General,
		}
	}

	pub fn line_budget(self) -> usize {
		match self {
			Self::General => 2,
			Self::Pro | Self::Scholars | Self::Analytics => 4,
			Self::Ops => 6,
		}
	}
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TraceSummary {
	pub role: AudienceRole,
	pub lines: Vec<String>,
	pub truncated: bool,
}

/// Accepts a serialized trace, a stored ledger payload, or a full ledger entry.
pub fn summarize(value: &Value, role: AudienceRole) -> TraceSummary {
	let view = TraceView::new(value);
	let mut lines = match role {
		AudienceRole::General => general_lines(&view),
		AudienceRole::Pro => pro_lines(&view),
		AudienceRole::Scholars => scholar_lines(&view),
		AudienceRole::Analytics => analytics_lines(&view),
		AudienceRole::Ops => ops_lines(&view),
	};

	if view.truncated && role != AudienceRole::General {
		lines.insert(0, "Trace was truncated for storage; some stages are missing.".to_string());
	}

	lines.truncate(role.line_budget());

	TraceSummary { role, lines, truncated: view.truncated }
}

struct TraceView<'a> {
	trace: &'a Value,
	entry: Option<&'a Value>,
	truncated: bool,
}
impl<'a> TraceView<'a> {
	fn new(value: &'a Value) -> Self {
		match value.get("trace") {
			Some(trace) if trace.is_object() => Self {
				trace,
				entry: Some(value),
				truncated: value.get("is_truncated").and_then(Value::as_bool).unwrap_or(false)
					|| trace.get("_truncation").is_some(),
			},
			_ => Self { trace: value, entry: None, truncated: value.get("_truncation").is_some() },
		}
	}

	fn query(&self) -> &str {
		self.trace.get("query").and_then(Value::as_str).unwrap_or("(query not stored)")
	}

	fn plan(&self, key: &str) -> Option<&'a Value> {
		self.trace.get("final_plan").and_then(|plan| plan.get(key))
	}

	fn plan_str(&self, key: &str) -> &'a str {
		self.plan(key).and_then(Value::as_str).unwrap_or("unknown")
	}

	fn selected(&self) -> Vec<&'a str> {
		strings(self.trace.get("selected_context_ids"))
	}

	fn candidate_count(&self) -> Option<u64> {
		self.trace.get("knobs").and_then(|knobs| knobs.get("candidate_count")).and_then(Value::as_u64)
	}

	fn contradictions(&self) -> &'a [Value] {
		self.trace.get("contradictions").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
	}

	fn stages(&self) -> &'a [Value] {
		self.trace.get("stages").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
	}

	fn warnings(&self) -> usize {
		self.trace.get("warnings").and_then(Value::as_array).map(Vec::len).unwrap_or(0)
	}
}

fn strings(value: Option<&Value>) -> Vec<&str> {
	value
		.and_then(Value::as_array)
		.map(|items| items.iter().filter_map(Value::as_str).collect())
		.unwrap_or_default()
}

fn stage_status(stage: &Value) -> &'static str {
	if stage.get("error").is_some_and(|error| !error.is_null()) {
		"failed"
	} else if stage.pointer("/output/skipped").and_then(Value::as_bool).unwrap_or(false) {
		"skipped"
	} else {
		"ok"
	}
}

fn stage_name(stage: &Value) -> &str {
	stage.get("stage").and_then(Value::as_str).unwrap_or("unknown")
}

fn consistency_line(view: &TraceView<'_>) -> String {
	match view.contradictions().len() {
		0 => "The sources were consistent with each other.".to_string(),
		count => format!("{count} disagreements between sources were noted in the answer."),
	}
}

fn general_lines(view: &TraceView<'_>) -> Vec<String> {
	vec![
		format!(
			"Answered \"{}\" using {} sources.",
			redact::redact_pii(view.query()),
			view.selected().len()
		),
		consistency_line(view),
	]
}

fn pro_lines(view: &TraceView<'_>) -> Vec<String> {
	let selected = view.selected();
	let top = selected.iter().take(3).copied().collect::<Vec<_>>().join(", ");

	vec![
		format!("Query \"{}\" classified as {}.", view.query(), view.plan_str("question_type")),
		format!(
			"Selected {} sources; top: {}.",
			selected.len(),
			if top.is_empty() { "none" } else { top.as_str() }
		),
		format!(
			"{} contradictions, overall severity {}.",
			view.contradictions().len(),
			view.plan_str("contradiction_severity")
		),
		format!(
			"Stages: {}.",
			view.stages()
				.iter()
				.map(|stage| format!("{} {}", stage_name(stage), stage_status(stage)))
				.collect::<Vec<_>>()
				.join(", ")
		),
	]
}

fn scholar_lines(view: &TraceView<'_>) -> Vec<String> {
	let disputes = view
		.contradictions()
		.iter()
		.map(|item| {
			format!(
				"{} on {} ({} vs {})",
				item.get("type").and_then(Value::as_str).unwrap_or("unknown"),
				item.get("subject").and_then(Value::as_str).unwrap_or("unknown"),
				item.pointer("/claim_a/source_id").and_then(Value::as_str).unwrap_or("?"),
				item.pointer("/claim_b/source_id").and_then(Value::as_str).unwrap_or("?"),
			)
		})
		.collect::<Vec<_>>();
	let suggestions = strings(view.plan("resolution_suggestions"));

	vec![
		format!("Query: {}", view.query()),
		format!("Evidence: {}.", view.selected().join(", ")),
		if disputes.is_empty() {
			"No disputed claims.".to_string()
		} else {
			format!("Disputed: {}.", disputes.join("; "))
		},
		format!("Resolution: {}", suggestions.first().copied().unwrap_or("none needed.")),
	]
}

fn analytics_lines(view: &TraceView<'_>) -> Vec<String> {
	let (ok, failed, skipped) =
		view.stages().iter().fold((0, 0, 0), |(ok, failed, skipped), stage| match stage_status(stage) {
			"failed" => (ok, failed + 1, skipped),
			"skipped" => (ok, failed, skipped + 1),
			_ => (ok + 1, failed, skipped),
		});
	let gaps = view.plan("coverage_gaps").and_then(Value::as_array).map(Vec::len).unwrap_or(0);
	let candidates =
		view.candidate_count().map(|count| count.to_string()).unwrap_or_else(|| "unknown".into());

	vec![
		format!("Stages ok={ok} failed={failed} skipped={skipped}."),
		format!("Candidates {candidates}, selected {}.", view.selected().len()),
		format!("Expansion quality {}, coverage gaps {gaps}.", view.plan_str("expansion_quality")),
		format!(
			"Intent confidence {}.",
			view.plan("intent_confidence").map(Value::to_string).unwrap_or_else(|| "unknown".into())
		),
	]
}

fn ops_lines(view: &TraceView<'_>) -> Vec<String> {
	let timings = view
		.stages()
		.iter()
		.map(|stage| {
			let duration = stage.pointer("/metrics/duration_ms").and_then(Value::as_f64).unwrap_or(0.0);

			format!("{}={duration:.2}ms ({})", stage_name(stage), stage_status(stage))
		})
		.collect::<Vec<_>>();
	let total = view.trace.pointer("/timings/total_ms").and_then(Value::as_f64).unwrap_or(0.0);
	let mut kinds = BTreeMap::new();

	for item in view.contradictions() {
		let kind = item.get("type").and_then(Value::as_str).unwrap_or("unknown");

		*kinds.entry(kind).or_insert(0_u32) += 1;
	}

	let breakdown = kinds.iter().map(|(kind, count)| format!("{kind}={count}")).collect::<Vec<_>>();
	let ledger = match view.entry {
		Some(entry) => format!(
			"Ledger stored {} of {} bytes, hash {} ({}).",
			entry.get("stored_size").and_then(Value::as_u64).unwrap_or(0),
			entry.get("original_size").and_then(Value::as_u64).unwrap_or(0),
			entry.get("trace_hash").and_then(Value::as_str).unwrap_or("none"),
			entry.get("hash_algorithm").and_then(Value::as_str).unwrap_or("unknown"),
		),
		None => "Not read from the ledger.".to_string(),
	};

	vec![
		format!(
			"Stage timings: {}.",
			if timings.is_empty() { "none stored".to_string() } else { timings.join(", ") }
		),
		format!("Total {total:.2}ms, {} warnings.", view.warnings()),
		format!("Evidence ids: {}.", view.selected().join(", ")),
		format!(
			"Contradictions: {}.",
			if breakdown.is_empty() { "none".to_string() } else { breakdown.join(", ") }
		),
		ledger,
		format!("Query: {}", view.query()),
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	fn trace() -> Value {
		serde_json::json!({
			"version": "1.0",
			"query": "Email jane@example.com about Rust",
			"stages": [
				{ "stage": "observe", "input": {}, "output": {}, "metrics": { "duration_ms": 1.5 } },
				{ "stage": "expand", "input": {}, "output": { "skipped": true }, "metrics": { "duration_ms": 0.0 } },
				{ "stage": "contrast", "input": {}, "output": { "error": "boom" }, "error": "boom", "metrics": { "duration_ms": 0.2 } },
			],
			"final_plan": { "question_type": "statement", "contradiction_severity": "high" },
			"timings": { "total_ms": 3.0 },
			"selected_context_ids": ["doc-secret-1", "doc-secret-2"],
			"contradictions": [
				{ "type": "factual", "subject": "Rust", "claim_a": { "source_id": "doc-secret-1" }, "claim_b": { "source_id": "doc-secret-2" } }
			],
			"knobs": { "candidate_count": 5 },
		})
	}

	#[test]
	fn general_view_hides_ids_and_pii() {
		let summary = summarize(&trace(), AudienceRole::General);
		let text = summary.lines.join("\n");

		assert_eq!(summary.lines.len(), 2);
		assert!(!text.contains("jane@example.com"));
		assert!(text.contains("[email]"));
		assert!(!text.contains("doc-secret"));
	}

	#[test]
	fn ops_view_shows_timings_and_breakdown() {
		let summary = summarize(&trace(), AudienceRole::Ops);
		let text = summary.lines.join("\n");

		assert!(summary.lines.len() <= 6);
		assert!(text.contains("observe=1.50ms (ok)"));
		assert!(text.contains("expand=0.00ms (skipped)"));
		assert!(text.contains("contrast=0.20ms (failed)"));
		assert!(text.contains("factual=1"));
		assert!(text.contains("doc-secret-1, doc-secret-2"));
	}

	#[test]
	fn line_budgets_hold_for_every_role() {
		for role in [
			AudienceRole::General,
			AudienceRole::Pro,
			AudienceRole::Scholars,
			AudienceRole::Analytics,
			AudienceRole::Ops,
		] {
			assert!(summarize(&trace(), role).lines.len() <= role.line_budget());
		}
	}

	#[test]
	fn truncated_entries_summarize_without_error() {
		let entry = serde_json::json!({
			"session_id": "s1",
			"message_id": "m1",
			"trace": {
				"version": "1.0",
				"stages": [],
				"_truncation": { "skeleton": "empty", "original_stage_count": 4 },
			},
			"is_truncated": true,
			"stored_size": 120,
			"original_size": 90_000,
			"trace_hash": "abcdef0123456789",
			"hash_algorithm": "sha256",
		});

		for role in [AudienceRole::General, AudienceRole::Ops] {
			let summary = summarize(&entry, role);

			assert!(summary.truncated);
			assert!(!summary.lines.is_empty());
		}

		let ops = summarize(&entry, AudienceRole::Ops);

		assert!(ops.lines.iter().any(|line| line.contains("abcdef0123456789")));
	}

	#[test]
	fn unknown_roles_fall_back_to_general() {
		assert_eq!(AudienceRole::from_role("visitor"), AudienceRole::General);
		assert_eq!(AudienceRole::from_role(" OPS "), AudienceRole::Ops);
	}
}
