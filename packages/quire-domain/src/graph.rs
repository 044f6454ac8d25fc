use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize, Serializer};

/// A typed edge returned by the graph adapter.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GraphRelation {
	pub source_id: String,
	pub relation_type: String,
	pub target_id: String,
	pub weight: f64,
	#[serde(default)]
	pub depth: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GraphMemory {
	pub id: String,
	pub title: String,
	pub content: String,
	/// Minimum role level allowed to read this memory, when the store tracks levels.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role_view_level: Option<u8>,
	/// Roles allowed to read this memory when no level is set.
	#[serde(default)]
	pub role_view: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TruncationReason {
	TimeoutBeforeStart,
	TimeoutAfterRelations,
	TimeoutAfterMemories,
	NodeBudgetExceeded,
	TotalNodesExceeded,
	Error(String),
}
impl TruncationReason {
	pub fn as_label(&self) -> String {
		match self {
			Self::TimeoutBeforeStart => "timeout_before_start".to_string(),
			Self::TimeoutAfterRelations => "timeout_after_relations".to_string(),
			Self::TimeoutAfterMemories => "timeout_after_memories".to_string(),
			Self::NodeBudgetExceeded => "node_budget_exceeded".to_string(),
			Self::TotalNodesExceeded => "total_nodes_exceeded".to_string(),
			Self::Error(message) => format!("error: {message}"),
		}
	}

	/// Label without the error message, for metric keys.
	pub fn metric_key(&self) -> &'static str {
		match self {
			Self::TimeoutBeforeStart => "timeout_before_start",
			Self::TimeoutAfterRelations => "timeout_after_relations",
			Self::TimeoutAfterMemories => "timeout_after_memories",
			Self::NodeBudgetExceeded => "node_budget_exceeded",
			Self::TotalNodesExceeded => "total_nodes_exceeded",
			Self::Error(_) => "error",
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(
			self,
			Self::TimeoutBeforeStart | Self::TimeoutAfterRelations | Self::TimeoutAfterMemories
		)
	}
}
impl Display for TruncationReason {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.as_label())
	}
}
impl Serialize for TruncationReason {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.collect_str(self)
	}
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct BudgetExceeded {
	pub time: bool,
	pub nodes: bool,
	pub error: bool,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct GraphExpansionResult {
	pub entity_id: String,
	pub relations: Vec<GraphRelation>,
	pub memories: Vec<GraphMemory>,
	pub summary: String,
	pub truncated: bool,
	pub truncation_reason: Option<TruncationReason>,
	pub nodes_visited: u32,
	pub depth_reached: u32,
	pub elapsed_time_ms: f64,
	pub exceeded: BudgetExceeded,
}
impl GraphExpansionResult {
	/// Records the first truncation reason; later reasons only update the exceeded map.
	pub fn mark_truncated(&mut self, reason: TruncationReason) {
		match &reason {
			reason if reason.is_timeout() => self.exceeded.time = true,
			TruncationReason::Error(_) => self.exceeded.error = true,
			_ => self.exceeded.nodes = true,
		}

		self.truncated = true;

		if self.truncation_reason.is_none() {
			self.truncation_reason = Some(reason);
		}
	}
}
