//! The four-stage reasoning pipeline.
//!
//! Stages exchange typed payloads through [`PipelineContext`]. JSON only appears when a stage
//! output is rendered into a [`StageTrace`] snapshot.

pub mod contrast;
pub mod expand;
pub mod observe;
pub mod order;

use std::{
	any::Any,
	panic::{self, AssertUnwindSafe},
	time::Instant,
};

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use quire_domain::{RetrievalResult, StageMetrics, StageName, StageTrace};

pub use contrast::{ContrastOutput, OverallSeverity};
pub use expand::{Concept, ExpandOutput, ExpansionQuality};
pub use observe::{ObserveOutput, QueryFeatures, QuestionType, RetrievalQuality};
pub use order::{Bucket, OrderOutput, RankedItem, ResponseFormat, ResponseSection, ResponseStructure};

/// Typed outputs of the stages that already ran, plus the caller's request data.
#[derive(Clone, Debug)]
pub struct PipelineContext {
	pub preferences: Map<String, Value>,
	pub metadata: Map<String, Value>,
	/// Reference time for recency scoring.
	pub as_of: OffsetDateTime,
	pub observe: Option<ObserveOutput>,
	pub expand: Option<ExpandOutput>,
	pub contrast: Option<ContrastOutput>,
}
impl PipelineContext {
	pub fn new(as_of: OffsetDateTime) -> Self {
		Self {
			preferences: Map::new(),
			metadata: Map::new(),
			as_of,
			observe: None,
			expand: None,
			contrast: None,
		}
	}

	/// Query entities, from Observe when it ran, otherwise recomputed from the query.
	pub fn entities(&self, query: &str) -> Vec<String> {
		match &self.observe {
			Some(observe) => observe.features.entities.clone(),
			None => quire_domain::text::capitalized_terms(query),
		}
	}

	pub fn keywords(&self, query: &str) -> Vec<String> {
		match &self.observe {
			Some(observe) => observe.features.keywords.clone(),
			None => quire_domain::text::keywords(query),
		}
	}
}

pub struct StageInput<'a> {
	pub query: &'a str,
	pub context: &'a PipelineContext,
	pub results: &'a [RetrievalResult],
}
impl StageInput<'_> {
	/// The snapshot recorded as a stage's `input`.
	pub fn snapshot(&self) -> Value {
		serde_json::json!({
			"query": self.query,
			"result_count": self.results.len(),
			"result_ids": self.results.iter().map(|result| result.id.as_str()).collect::<Vec<_>>(),
		})
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum StageResult<T> {
	Ok(T),
	Failed { error: String },
}

/// Scratch space a stage body writes diagnostics into while it runs.
#[derive(Debug, Default)]
pub struct StageNotes {
	pub reason: Option<String>,
	pub warnings: Vec<String>,
	pub custom: Map<String, Value>,
	pub tokens_processed: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct StageOutput<T> {
	pub stage: StageName,
	pub result: StageResult<T>,
	pub metrics: StageMetrics,
	pub reason: Option<String>,
	pub warnings: Vec<String>,
	pub errors: Vec<String>,
}
impl<T> StageOutput<T>
where
	T: Serialize,
{
	pub fn value(&self) -> Option<&T> {
		match &self.result {
			StageResult::Ok(value) => Some(value),
			StageResult::Failed { .. } => None,
		}
	}

	pub fn error(&self) -> Option<&str> {
		match &self.result {
			StageResult::Ok(_) => None,
			StageResult::Failed { error } => Some(error),
		}
	}

	pub fn snapshot(&self) -> Value {
		match &self.result {
			StageResult::Ok(value) => serde_json::to_value(value)
				.unwrap_or_else(|err| serde_json::json!({ "error": err.to_string() })),
			StageResult::Failed { error } => serde_json::json!({ "error": error }),
		}
	}

	/// Renders the trace record and hands back the typed value for the next stage.
	pub fn into_trace(self, input: Value) -> (StageTrace, Option<T>) {
		let output = self.snapshot();
		let mut warnings = self.warnings;

		if let Some(reason) = self.reason {
			warnings.push(reason);
		}

		let (error, value) = match self.result {
			StageResult::Ok(value) => (None, Some(value)),
			StageResult::Failed { error } => (Some(error), None),
		};
		let trace = StageTrace {
			stage: self.stage,
			input,
			output,
			metrics: self.metrics,
			error,
			warnings,
		};

		(trace, value)
	}
}

/// Record for a stage that did not run.
pub fn skipped_trace(stage: StageName, input: Value, reason: &str) -> StageTrace {
	StageTrace {
		stage,
		input,
		output: serde_json::json!({ "skipped": true, "reason": reason }),
		metrics: StageMetrics::default(),
		error: None,
		warnings: vec![reason.to_string()],
	}
}

/// Runs a stage body with timing and panic isolation. Neither an `Err` nor a panic escapes.
pub fn execute<T, F>(stage: StageName, body: F) -> StageOutput<T>
where
	F: FnOnce(&mut StageNotes) -> Result<T, String>,
{
	let started = Instant::now();
	let mut notes = StageNotes::default();
	let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut notes)));
	let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;
	let result = match outcome {
		Ok(Ok(value)) => StageResult::Ok(value),
		Ok(Err(error)) => StageResult::Failed { error },
		Err(payload) => StageResult::Failed { error: panic_message(payload.as_ref()) },
	};
	let errors = match &result {
		StageResult::Ok(_) => Vec::new(),
		StageResult::Failed { error } => {
			tracing::warn!(stage = %stage, error = %error, duration_ms, "Stage failed.");

			vec![error.clone()]
		},
	};

	tracing::debug!(stage = %stage, duration_ms, "Stage finished.");

	StageOutput {
		stage,
		result,
		metrics: StageMetrics {
			duration_ms,
			tokens_processed: notes.tokens_processed,
			custom: notes.custom,
			..Default::default()
		},
		reason: notes.reason,
		warnings: notes.warnings,
		errors,
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		return format!("Stage panicked: {message}");
	}
	if let Some(message) = payload.downcast_ref::<String>() {
		return format!("Stage panicked: {message}");
	}

	"Stage panicked.".to_string()
}

pub(crate) fn round4(value: f64) -> f64 {
	(value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn errors_become_failed_outputs() {
		let output: StageOutput<u32> =
			execute(StageName::Observe, |_| Err("bad input".to_string()));

		assert_eq!(output.error(), Some("bad input"));
		assert_eq!(output.errors, vec!["bad input".to_string()]);
		assert_eq!(output.snapshot(), serde_json::json!({ "error": "bad input" }));
	}

	#[test]
	fn panics_are_contained() {
		let output: StageOutput<u32> = execute(StageName::Order, |_| panic!("boom"));

		assert!(output.error().is_some_and(|error| error.contains("boom")));
		assert!(!output.errors.is_empty());
	}

	#[test]
	fn notes_flow_into_the_trace() {
		let output = execute(StageName::Expand, |notes| {
			notes.warnings.push("thin evidence".to_string());
			notes.custom.insert("concepts".to_string(), Value::from(3));

			Ok(7_u32)
		});
		let (trace, value) = output.into_trace(Value::Null);

		assert_eq!(value, Some(7));
		assert_eq!(trace.output, Value::from(7));
		assert_eq!(trace.warnings, vec!["thin evidence".to_string()]);
		assert_eq!(trace.metrics.custom["concepts"], 3);
		assert!(trace.metrics.duration_ms >= 0.0);
	}

	#[test]
	fn skipped_stages_say_why() {
		let trace = skipped_trace(StageName::Contrast, Value::Null, "Stage disabled.");

		assert!(trace.is_skipped());
		assert_eq!(trace.output["reason"], "Stage disabled.");
		assert_eq!(trace.warnings.len(), 1);
	}
}
