use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StageInput, StageOutput, execute};
use quire_domain::{
	Claim, Contradiction, ContradictionKind, RetrievalResult, Severity, StageName, text,
};

const CLAIM_CHARS: usize = 200;
/// Positive marker first. A text only counts as positive when it lacks the negative marker.
const FACTUAL_PAIRS: [(&str, &str); 8] = [
	("fully supported", "only allowed"),
	("supported", "not supported"),
	("allowed", "prohibited"),
	("always", "never"),
	("enabled", "disabled"),
	("increase", "decrease"),
	("required", "optional"),
	("true", "false"),
];

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OverallSeverity {
	None,
	Low,
	Medium,
	High,
}
impl OverallSeverity {
	pub fn of(contradictions: &[Contradiction]) -> Self {
		if contradictions.is_empty() {
			return Self::None;
		}
		if contradictions.iter().any(|item| item.severity == Severity::High) {
			return Self::High;
		}

		let mediums = contradictions.iter().filter(|item| item.severity == Severity::Medium).count();

		if mediums > 2 { Self::Medium } else { Self::Low }
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::None => "none",
			Self::Low => "low",
			Self::Medium => "medium",
			Self::High => "high",
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ContrastOutput {
	pub contradictions: Vec<Contradiction>,
	pub severity: OverallSeverity,
	pub resolution_suggestions: Vec<String>,
	pub subjects_compared: usize,
}
impl ContrastOutput {
	/// Worst severity among contradictions involving `source_id`.
	pub fn severity_for(&self, source_id: &str) -> Option<Severity> {
		self.contradictions
			.iter()
			.filter(|item| item.involves(source_id))
			.map(|item| item.severity)
			.max()
	}
}

pub fn run(input: &StageInput<'_>) -> StageOutput<ContrastOutput> {
	execute(StageName::Contrast, |notes| {
		// Synthesized results only restate concepts, so they never count as evidence.
		let evidence = input
			.results
			.iter()
			.filter(|result| result.result_type != "expanded")
			.collect::<Vec<_>>();
		let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();

		for (idx, result) in evidence.iter().enumerate() {
			for subject in text::capitalized_terms(&result.full_text()) {
				groups.entry(subject).or_default().push(idx);
			}
		}

		let mut seen = BTreeSet::new();
		let mut contradictions = Vec::new();
		let mut subjects_compared = 0;

		for (subject, members) in groups.iter().filter(|(_, members)| members.len() >= 2) {
			subjects_compared += 1;

			for (pos, &i) in members.iter().enumerate() {
				for &j in &members[pos + 1..] {
					for found in compare(subject, evidence[i], evidence[j]) {
						let (a, b) = ordered_pair(&found.claim_a.source_id, &found.claim_b.source_id);

						if seen.insert((found.kind, a, b)) {
							contradictions.push(found);
						}
					}
				}
			}
		}

		let severity = OverallSeverity::of(&contradictions);
		let resolution_suggestions = suggestions(&contradictions, severity);

		if severity == OverallSeverity::High {
			notes.warnings.push("High-severity contradictions detected.".to_string());
		}

		notes.custom.insert("contradictions".to_string(), Value::from(contradictions.len()));

		Ok(ContrastOutput { contradictions, severity, resolution_suggestions, subjects_compared })
	})
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
	if a <= b { (a.to_string(), b.to_string()) } else { (b.to_string(), a.to_string()) }
}

fn compare(subject: &str, a: &RetrievalResult, b: &RetrievalResult) -> Vec<Contradiction> {
	let text_a = a.full_text();
	let text_b = b.full_text();
	let mut found = Vec::new();
	let contradiction = |kind, severity, confidence| Contradiction {
		kind,
		subject: subject.to_string(),
		claim_a: Claim { text: text::truncate_chars(&text_a, CLAIM_CHARS), source_id: a.id.clone() },
		claim_b: Claim { text: text::truncate_chars(&text_b, CLAIM_CHARS), source_id: b.id.clone() },
		severity,
		confidence,
	};

	if temporal_conflict(&text_a, &text_b) {
		found.push(contradiction(ContradictionKind::Temporal, Severity::Medium, 0.6));
	}
	if factual_conflict(&text_a, &text_b) {
		found.push(contradiction(ContradictionKind::Factual, Severity::High, 0.8));
	}
	if let Some(severity) = numerical_conflict(&text_a, &text_b) {
		found.push(contradiction(ContradictionKind::Numerical, severity, 0.7));
	}

	found
}

fn temporal_conflict(a: &str, b: &str) -> bool {
	let years_a = text::years(a);
	let years_b = text::years(b);

	!years_a.is_empty() && !years_b.is_empty() && years_a.is_disjoint(&years_b)
}

fn factual_conflict(a: &str, b: &str) -> bool {
	let a = a.to_lowercase();
	let b = b.to_lowercase();
	let asserts = |text: &str, positive: &str, negative: &str| {
		text.contains(positive) && !text.contains(negative)
	};

	FACTUAL_PAIRS.iter().any(|(positive, negative)| {
		(asserts(&a, positive, negative) && b.contains(negative))
			|| (asserts(&b, positive, negative) && a.contains(negative))
	})
}

fn numerical_conflict(a: &str, b: &str) -> Option<Severity> {
	let values_b = text::numbers_with_units(b);

	for (value_a, unit) in text::numbers_with_units(a) {
		let Some((value_b, _)) = values_b.iter().find(|(_, other)| *other == unit) else {
			continue;
		};
		let largest = value_a.abs().max(value_b.abs());

		if largest == 0.0 {
			continue;
		}

		let relative = (value_a - value_b).abs() / largest;

		if relative > 0.5 {
			return Some(Severity::High);
		}
		if relative > 0.1 {
			return Some(Severity::Medium);
		}
	}

	None
}

fn suggestions(contradictions: &[Contradiction], severity: OverallSeverity) -> Vec<String> {
	let kinds = contradictions.iter().map(|item| item.kind).collect::<BTreeSet<_>>();
	let mut out = kinds
		.into_iter()
		.map(|kind| {
			match kind {
				ContradictionKind::Temporal =>
					"Prefer the most recent source for time-sensitive claims.",
				ContradictionKind::Factual =>
					"Cross-check the conflicting claims against an authoritative source.",
				ContradictionKind::Numerical =>
					"Report the range of figures together with their sources.",
				ContradictionKind::Content => "Present both positions with their sources.",
			}
			.to_string()
		})
		.collect::<Vec<_>>();

	if severity == OverallSeverity::High {
		out.push("Surface the conflict to the user instead of choosing a side.".to_string());
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pipeline::PipelineContext;
	use time::OffsetDateTime;

	fn contrast(results: &[RetrievalResult]) -> ContrastOutput {
		let context = PipelineContext::new(OffsetDateTime::UNIX_EPOCH);
		let output = run(&StageInput { query: "Rust", context: &context, results });

		output.value().cloned().expect("Contrast must succeed.")
	}

	#[test]
	fn factual_pair_is_high_severity() {
		let output = contrast(&[
			RetrievalResult::new("a", 0.9, "Async closures are fully supported in Rust."),
			RetrievalResult::new("b", 0.8, "In Rust, async closures are only allowed on nightly."),
		]);
		let factual = output
			.contradictions
			.iter()
			.find(|item| item.kind == ContradictionKind::Factual)
			.expect("Factual contradiction must be found.");

		assert_eq!(factual.severity, Severity::High);
		assert_eq!(factual.confidence, 0.8);
		assert_eq!(output.severity, OverallSeverity::High);
		assert_eq!(output.severity_for("b"), Some(Severity::High));
		assert!(output.resolution_suggestions.iter().any(|line| line.contains("Surface")));
	}

	#[test]
	fn negation_does_not_count_as_positive() {
		let output = contrast(&[
			RetrievalResult::new("a", 0.9, "Rust is not supported here."),
			RetrievalResult::new("b", 0.8, "Rust is not supported there either."),
		]);

		assert!(output.contradictions.is_empty());
		assert_eq!(output.severity, OverallSeverity::None);
	}

	#[test]
	fn disjoint_years_are_temporal() {
		let output = contrast(&[
			RetrievalResult::new("a", 0.9, "Rust 1.0 shipped in 2015."),
			RetrievalResult::new("b", 0.8, "Rust 1.0 shipped in 2016."),
		]);

		assert_eq!(output.contradictions.len(), 1);
		assert_eq!(output.contradictions[0].kind, ContradictionKind::Temporal);
		assert_eq!(output.severity, OverallSeverity::Low);
	}

	#[test]
	fn numbers_must_share_a_unit() {
		let output = contrast(&[
			RetrievalResult::new("a", 0.9, "Rust has 3 million users."),
			RetrievalResult::new("b", 0.8, "Rust has 2.5 million users and 40% growth."),
		]);
		let numerical = output
			.contradictions
			.iter()
			.find(|item| item.kind == ContradictionKind::Numerical)
			.expect("Numerical contradiction must be found.");

		assert_eq!(numerical.severity, Severity::Medium);
	}

	#[test]
	fn pairs_are_deduplicated_across_subjects() {
		let output = contrast(&[
			RetrievalResult::new("a", 0.9, "Rust and Cargo always build offline."),
			RetrievalResult::new("b", 0.8, "Rust and Cargo never build offline."),
		]);

		assert_eq!(output.contradictions.len(), 1);
		assert_eq!(output.subjects_compared, 2);
	}

	#[test]
	fn expanded_results_are_ignored() {
		let output = contrast(&[
			RetrievalResult::new("a", 0.9, "Rust is always fast."),
			RetrievalResult::new("x", 0.4, "Rust is never fast.").with_type("expanded"),
		]);

		assert!(output.contradictions.is_empty());
	}
}
