//! Budgeted neighborhood expansion over the entity graph.

use std::{
	collections::BTreeSet,
	sync::Arc,
	time::{Duration, Instant},
};

use tokio::time::timeout;

use crate::metrics::MetricsRegistry;
use quire_domain::{GraphExpansionResult, GraphMemory, TruncationReason};
use quire_storage::graph::GraphAdapter;

/// Hard cap on relations requested in one adapter call.
const MAX_RELATIONS_PER_CALL: u32 = 50;
const MAX_MEMORIES: u32 = 10;
const GENERAL_ROLE: &str = "general";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphBudgets {
	/// Upper bound on relations plus memories returned.
	pub max_neighbors: u32,
	pub max_depth: u32,
	pub timeout: Duration,
}
impl GraphBudgets {
	pub fn from_config(cfg: &quire_config::Graph) -> Self {
		Self {
			max_neighbors: cfg.max_neighbors,
			max_depth: cfg.max_depth,
			timeout: Duration::from_millis(cfg.timeout_ms),
		}
	}
}

pub struct GraphExpander {
	metrics: Arc<MetricsRegistry>,
}
impl GraphExpander {
	pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
		Self { metrics }
	}

	/// Expands `entity_id` within the budgets. Never fails: timeouts and adapter errors come back
	/// as a truncated partial result.
	pub async fn expand(
		&self,
		entity_id: &str,
		budgets: &GraphBudgets,
		adapter: &dyn GraphAdapter,
		roles: &[String],
	) -> GraphExpansionResult {
		let started = Instant::now();
		let deadline = started + budgets.timeout;
		let mut out = GraphExpansionResult { entity_id: entity_id.to_string(), ..Default::default() };

		if Instant::now() >= deadline {
			out.mark_truncated(TruncationReason::TimeoutBeforeStart);
		} else {
			expand_relations(&mut out, entity_id, budgets, adapter, deadline).await;

			if !out.truncated {
				if out.relations.len() >= budgets.max_neighbors as usize {
					out.mark_truncated(TruncationReason::NodeBudgetExceeded);
				} else {
					expand_memories(&mut out, entity_id, budgets, adapter, roles, deadline).await;
				}
			}
		}

		let total = out.relations.len() + out.memories.len();

		if total > budgets.max_neighbors as usize {
			let keep_memories = (budgets.max_neighbors as usize).saturating_sub(out.relations.len());

			out.relations.truncate(budgets.max_neighbors as usize);
			out.memories.truncate(keep_memories);
			out.mark_truncated(TruncationReason::TotalNodesExceeded);
		}

		out.nodes_visited = (out.relations.len() + out.memories.len()) as u32;
		out.elapsed_time_ms = started.elapsed().as_secs_f64() * 1_000.0;
		out.summary = summarize(&out);

		self.record(&out);

		out
	}

	fn record(&self, out: &GraphExpansionResult) {
		self.metrics.record_expansion(out);

		if let Some(reason) = &out.truncation_reason {
			tracing::info!(
				entity_id = %out.entity_id,
				truncation_reason = %reason,
				nodes_visited = out.nodes_visited,
				elapsed_ms = out.elapsed_time_ms,
				"Graph expansion truncated."
			);
		} else {
			tracing::debug!(
				entity_id = %out.entity_id,
				nodes_visited = out.nodes_visited,
				elapsed_ms = out.elapsed_time_ms,
				"Graph expansion finished."
			);
		}
	}
}

async fn expand_relations(
	out: &mut GraphExpansionResult,
	entity_id: &str,
	budgets: &GraphBudgets,
	adapter: &dyn GraphAdapter,
	deadline: Instant,
) {
	let cap = budgets.max_neighbors.min(MAX_RELATIONS_PER_CALL) as usize;
	let mut visited = BTreeSet::from([entity_id.to_string()]);
	let mut frontier = vec![entity_id.to_string()];

	for depth in 1..=budgets.max_depth.max(1) {
		let mut next = Vec::new();

		for node in &frontier {
			let remaining_cap = cap.saturating_sub(out.relations.len());

			if remaining_cap == 0 {
				return;
			}

			let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
				out.mark_truncated(TruncationReason::TimeoutAfterRelations);

				return;
			};
			let fetched =
				timeout(remaining, adapter.entity_relations(node, remaining_cap as u32)).await;
			let relations = match fetched {
				Ok(Ok(relations)) => relations,
				Ok(Err(err)) => {
					out.mark_truncated(TruncationReason::Error(err.to_string()));

					return;
				},
				Err(_) => {
					out.mark_truncated(TruncationReason::TimeoutAfterRelations);

					return;
				},
			};

			for mut relation in relations.into_iter().take(remaining_cap) {
				relation.depth = depth;

				if visited.insert(relation.target_id.clone()) {
					next.push(relation.target_id.clone());
				}

				out.relations.push(relation);
			}

			out.depth_reached = depth;

			if Instant::now() >= deadline {
				out.mark_truncated(TruncationReason::TimeoutAfterRelations);

				return;
			}
		}

		if next.is_empty() {
			return;
		}

		frontier = next;
	}
}

async fn expand_memories(
	out: &mut GraphExpansionResult,
	entity_id: &str,
	budgets: &GraphBudgets,
	adapter: &dyn GraphAdapter,
	roles: &[String],
	deadline: Instant,
) {
	let limit = (budgets.max_neighbors as usize - out.relations.len()).min(MAX_MEMORIES as usize);
	let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
		out.mark_truncated(TruncationReason::TimeoutAfterMemories);

		return;
	};

	match timeout(remaining, adapter.entity_memories(entity_id, limit as u32)).await {
		Ok(Ok(memories)) => {
			out.memories = memories
				.into_iter()
				.filter(|memory| can_view(memory, adapter, roles))
				.take(limit)
				.collect();
		},
		Ok(Err(err)) => {
			out.mark_truncated(TruncationReason::Error(err.to_string()));

			return;
		},
		Err(_) => {
			out.mark_truncated(TruncationReason::TimeoutAfterMemories);

			return;
		},
	}

	if Instant::now() >= deadline {
		out.mark_truncated(TruncationReason::TimeoutAfterMemories);
	}
}

/// Level-gated when the memory carries a level, membership-gated otherwise.
fn can_view(memory: &GraphMemory, adapter: &dyn GraphAdapter, roles: &[String]) -> bool {
	if let Some(required) = memory.role_view_level {
		let clearance = roles.iter().filter_map(|role| adapter.role_level(role)).max();

		return clearance.unwrap_or(0) >= required;
	}
	if memory.role_view.is_empty() {
		return true;
	}

	memory
		.role_view
		.iter()
		.any(|allowed| allowed == GENERAL_ROLE || roles.iter().any(|role| role == allowed))
}

fn summarize(out: &GraphExpansionResult) -> String {
	let mut summary = format!(
		"Entity {} has {} relations and {} memories within depth {}.",
		out.entity_id,
		out.relations.len(),
		out.memories.len(),
		out.depth_reached
	);

	if let Some(reason) = &out.truncation_reason {
		summary.push_str(&format!(" Expansion truncated: {reason}."));
	}

	summary
}
