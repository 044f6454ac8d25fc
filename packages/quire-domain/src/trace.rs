use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::contradiction::Contradiction;

/// Schema version carried by every persisted trace.
pub const TRACE_VERSION: &str = "1.0";

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
	Observe,
	Expand,
	Contrast,
	Order,
}
impl StageName {
	/// Execution order of the pipeline.
	pub const ALL: [StageName; 4] =
		[StageName::Observe, StageName::Expand, StageName::Contrast, StageName::Order];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Observe => "observe",
			Self::Expand => "expand",
			Self::Contrast => "contrast",
			Self::Order => "order",
		}
	}
}
impl Display for StageName {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StageMetrics {
	pub duration_ms: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub memory_mb: Option<f64>,
	#[serde(default)]
	pub cache_hits: u64,
	#[serde(default)]
	pub cache_misses: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tokens_processed: Option<u64>,
	#[serde(default)]
	pub custom: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StageTrace {
	pub stage: StageName,
	pub input: Value,
	pub output: Value,
	pub metrics: StageMetrics,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default)]
	pub warnings: Vec<String>,
}
impl StageTrace {
	pub fn is_failed(&self) -> bool {
		self.error.is_some()
	}

	pub fn is_skipped(&self) -> bool {
		self.output.get("skipped").and_then(Value::as_bool).unwrap_or(false)
	}
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Timings {
	pub total_ms: f64,
	pub orchestration_ms: f64,
	pub planning_ms: f64,
}

/// The aggregate record of one orchestration run. Only this type is ever persisted by the ledger.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Trace {
	pub version: String,
	pub query: String,
	pub stages: Vec<StageTrace>,
	#[serde(default)]
	pub final_plan: Map<String, Value>,
	pub timings: Timings,
	#[serde(default)]
	pub warnings: Vec<String>,
	#[serde(default)]
	pub selected_context_ids: Vec<String>,
	#[serde(default)]
	pub contradictions: Vec<Contradiction>,
	#[serde(default)]
	pub knobs: Map<String, Value>,
}
impl Trace {
	pub fn stage(&self, name: StageName) -> Option<&StageTrace> {
		self.stages.iter().find(|stage| stage.stage == name)
	}

	pub fn stage_duration_sum(&self) -> f64 {
		self.stages.iter().map(|stage| stage.metrics.duration_ms).sum()
	}
}

/// Alias used where the run result is handed back to a caller rather than stored.
pub type OrchestrationResult = Trace;
