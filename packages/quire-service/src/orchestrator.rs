//! Runs retrieval and the four stages in order under one time budget.

use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{
	Error, Result,
	degrade::Degrade,
	graph::{GraphBudgets, GraphExpander},
	metrics::MetricsRegistry,
	pipeline::{
		self, PipelineContext, StageInput, StageOutput, contrast, expand, observe, order,
	},
	randomness::RandomnessSource,
	retrieval::Retriever,
};
use quire_domain::{
	GraphExpansionResult, QueryContext, RetrievalResult, StageName, StageTrace, TRACE_VERSION,
	Timings, Trace,
};
use quire_storage::graph::GraphAdapter;

const GRAPH_MEMORY_SCORE: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageToggles {
	pub observe: bool,
	pub expand: bool,
	pub contrast: bool,
	pub order: bool,
}
impl StageToggles {
	pub fn is_enabled(&self, stage: StageName) -> bool {
		match stage {
			StageName::Observe => self.observe,
			StageName::Expand => self.expand,
			StageName::Contrast => self.contrast,
			StageName::Order => self.order,
		}
	}
}
impl Default for StageToggles {
	fn default() -> Self {
		Self { observe: true, expand: true, contrast: true, order: true }
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorSettings {
	pub time_budget: Duration,
	pub retrieval_k: u32,
	pub retrieval_timeout: Duration,
	pub max_selected: usize,
	pub toggles: StageToggles,
	/// Budgets for graph enrichment; `None` disables it.
	pub graph: Option<GraphBudgets>,
}
impl OrchestratorSettings {
	pub fn from_config(
		orchestrator: &quire_config::Orchestrator,
		graph: &quire_config::Graph,
	) -> Self {
		Self {
			time_budget: Duration::from_millis(orchestrator.time_budget_ms),
			retrieval_k: orchestrator.retrieval_k,
			retrieval_timeout: Duration::from_millis(orchestrator.retrieval_timeout_ms),
			max_selected: orchestrator.max_selected as usize,
			toggles: StageToggles {
				observe: orchestrator.enable_observe,
				expand: orchestrator.enable_expand,
				contrast: orchestrator.enable_contrast,
				order: orchestrator.enable_order,
			},
			graph: graph.enabled.then(|| GraphBudgets::from_config(graph)),
		}
	}
}
impl Default for OrchestratorSettings {
	fn default() -> Self {
		Self::from_config(&quire_config::Orchestrator::default(), &quire_config::Graph::default())
	}
}

pub struct Orchestrator {
	settings: OrchestratorSettings,
	retriever: Arc<dyn Retriever>,
	graph: Option<Arc<dyn GraphAdapter>>,
	expander: GraphExpander,
	metrics: Arc<MetricsRegistry>,
}
impl Orchestrator {
	pub fn new(
		settings: OrchestratorSettings,
		retriever: Arc<dyn Retriever>,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self {
			settings,
			retriever,
			graph: None,
			expander: GraphExpander::new(metrics.clone()),
			metrics,
		}
	}

	pub fn with_graph(mut self, adapter: Arc<dyn GraphAdapter>) -> Self {
		self.graph = Some(adapter);

		self
	}

	pub fn settings(&self) -> &OrchestratorSettings {
		&self.settings
	}

	/// Fetches candidates, degrading to an empty list on failure or timeout.
	pub async fn retrieve(
		&self,
		query: &str,
		limit: u32,
	) -> (Vec<RetrievalResult>, Option<String>) {
		let started = Instant::now();
		let timeout = self.settings.retrieval_timeout;
		let fetched = tokio::time::timeout(timeout, self.retriever.retrieve(query, limit)).await;

		self.metrics.record_retrieval(started.elapsed().as_secs_f64() * 1_000.0);

		let fetched = match fetched {
			Ok(fetched) => fetched.map_err(|err| format!("Retrieval failed: {err}")),
			Err(_) => Err(format!("Retrieval timed out after {} ms.", timeout.as_millis())),
		};

		fetched
			.map(|mut results| {
				results.truncate(limit as usize);

				(results, None)
			})
			.or_degrade_with("retrieve", |warning| {
				self.metrics.record_retrieval_failure();

				(Vec::new(), Some(warning))
			})
	}

	/// Full live run: retrieval, optional graph enrichment, then the stages.
	pub async fn run(&self, ctx: &QueryContext, rng: &mut RandomnessSource) -> Result<Trace> {
		validate_query(ctx)?;

		let started = Instant::now();
		let (results, warning) = self.retrieve(&ctx.query, self.settings.retrieval_k).await;

		self.execute(ctx, results, rng, started, warning.into_iter().collect(), true).await
	}

	/// Runs the stages on caller-supplied candidates. Graph enrichment is skipped so the run
	/// depends only on its inputs and seeds.
	pub async fn run_with_results(
		&self,
		ctx: &QueryContext,
		results: Vec<RetrievalResult>,
		rng: &mut RandomnessSource,
	) -> Result<Trace> {
		validate_query(ctx)?;

		self.execute(ctx, results, rng, Instant::now(), Vec::new(), false).await
	}

	async fn execute(
		&self,
		ctx: &QueryContext,
		mut results: Vec<RetrievalResult>,
		rng: &mut RandomnessSource,
		started: Instant,
		mut warnings: Vec<String>,
		enrich: bool,
	) -> Result<Trace> {
		let deadline = started + self.settings.time_budget;
		let as_of = ctx.as_of.unwrap_or_else(OffsetDateTime::now_utc);
		let candidate_count = results.len();
		let mut context = PipelineContext {
			preferences: ctx.preferences.clone(),
			metadata: ctx.metadata.clone(),
			..PipelineContext::new(as_of)
		};
		let mut stages = Vec::with_capacity(StageName::ALL.len());
		let mut graph_outcome = None;

		// Observe.
		let input = StageInput { query: &ctx.query, context: &context, results: &results };
		let snapshot = input.snapshot();

		match self.skip_reason(StageName::Observe, deadline) {
			Some(reason) => skip(&mut stages, &mut warnings, StageName::Observe, snapshot, &reason),
			None => {
				let output = observe::run(&input);

				context.observe = record(&mut stages, &mut warnings, snapshot, output);
			},
		}

		if enrich
			&& let (Some(adapter), Some(budgets)) = (&self.graph, self.settings.graph)
			&& let Some(remaining) = deadline.checked_duration_since(Instant::now())
		{
			let entity = context.entities(&ctx.query).into_iter().next();

			if let Some(entity) = entity {
				let budgets = GraphBudgets { timeout: budgets.timeout.min(remaining), ..budgets };
				let roles = vec![ctx.role_or_default().to_string()];
				let expansion = self.expander.expand(&entity, &budgets, adapter.as_ref(), &roles).await;

				merge_graph_memories(&mut results, &expansion);

				if expansion.truncated {
					warnings.push(format!("Graph expansion truncated: {}.", expansion.summary));
				}

				graph_outcome = Some(expansion);
			}
		}

		// Expand.
		let input = StageInput { query: &ctx.query, context: &context, results: &results };
		let snapshot = input.snapshot();

		match self.skip_reason(StageName::Expand, deadline) {
			Some(reason) => skip(&mut stages, &mut warnings, StageName::Expand, snapshot, &reason),
			None => {
				let output = expand::run(&input, rng);

				context.expand = record(&mut stages, &mut warnings, snapshot, output);
			},
		}

		if let Some(expanded) = &context.expand {
			results = expanded.expanded_results.clone();
		}

		// Contrast.
		let input = StageInput { query: &ctx.query, context: &context, results: &results };
		let snapshot = input.snapshot();

		match self.skip_reason(StageName::Contrast, deadline) {
			Some(reason) => skip(&mut stages, &mut warnings, StageName::Contrast, snapshot, &reason),
			None => {
				let output = contrast::run(&input);

				context.contrast = record(&mut stages, &mut warnings, snapshot, output);
			},
		}

		// Order.
		let input = StageInput { query: &ctx.query, context: &context, results: &results };
		let snapshot = input.snapshot();
		let ordered = match self.skip_reason(StageName::Order, deadline) {
			Some(reason) => {
				skip(&mut stages, &mut warnings, StageName::Order, snapshot, &reason);

				None
			},
			None => {
				let output = order::run(&input, rng);

				record(&mut stages, &mut warnings, snapshot, output)
			},
		};

		let ran = stages.iter().filter(|stage| !stage.is_skipped()).collect::<Vec<_>>();

		if !ran.is_empty() && ran.iter().all(|stage| stage.is_failed()) {
			self.metrics.record_pipeline_failure();

			return Err(Error::Pipeline {
				message: stages
					.iter()
					.filter_map(|stage| stage.error.clone())
					.collect::<Vec<_>>()
					.join("; "),
			});
		}

		let planning_started = Instant::now();
		let selected_context_ids = match &ordered {
			Some(order) =>
				order.selectable_ids().take(self.settings.max_selected).map(str::to_string).collect(),
			None => by_score(&results, self.settings.max_selected),
		};
		let final_plan = final_plan(&context, ordered.as_ref(), graph_outcome.as_ref());
		let knobs = self.knobs(rng, as_of, candidate_count);
		let planning_ms = planning_started.elapsed().as_secs_f64() * 1_000.0;
		let orchestration_ms = stages.iter().map(|stage| stage.metrics.duration_ms).sum::<f64>();
		let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
		let trace = Trace {
			version: TRACE_VERSION.to_string(),
			query: ctx.query.clone(),
			stages,
			final_plan,
			timings: Timings {
				total_ms: elapsed_ms.max(orchestration_ms + planning_ms),
				orchestration_ms,
				planning_ms,
			},
			warnings,
			selected_context_ids,
			contradictions: context
				.contrast
				.map(|contrast| contrast.contradictions)
				.unwrap_or_default(),
			knobs,
		};

		self.metrics.record_run(trace.timings.total_ms);

		tracing::info!(
			total_ms = trace.timings.total_ms,
			selected = trace.selected_context_ids.len(),
			contradictions = trace.contradictions.len(),
			warnings = trace.warnings.len(),
			"Orchestration finished."
		);

		Ok(trace)
	}

	fn skip_reason(&self, stage: StageName, deadline: Instant) -> Option<String> {
		if !self.settings.toggles.is_enabled(stage) {
			return Some(format!("Stage {stage} is disabled."));
		}
		if Instant::now() >= deadline {
			self.metrics.record_budget_exhausted();

			return Some(format!("Time budget exhausted before {stage}."));
		}

		None
	}

	fn knobs(
		&self,
		rng: &RandomnessSource,
		as_of: OffsetDateTime,
		candidate_count: usize,
	) -> Map<String, Value> {
		let toggles = self.settings.toggles;
		let mut knobs = Map::new();

		knobs.insert(
			"time_budget_ms".to_string(),
			Value::from(self.settings.time_budget.as_millis() as u64),
		);
		knobs.insert("retrieval_k".to_string(), Value::from(self.settings.retrieval_k));
		knobs.insert("max_selected".to_string(), Value::from(self.settings.max_selected));
		knobs.insert(
			"stages".to_string(),
			serde_json::json!({
				"observe": toggles.observe,
				"expand": toggles.expand,
				"contrast": toggles.contrast,
				"order": toggles.order,
			}),
		);
		knobs.insert("graph_enabled".to_string(), Value::Bool(self.settings.graph.is_some()));
		knobs.insert("seed".to_string(), Value::from(rng.seed()));
		knobs.insert(
			"numeric_seed".to_string(),
			rng.numeric_seed().map(Value::from).unwrap_or(Value::Null),
		);
		knobs.insert(
			"as_of_timestamp".to_string(),
			as_of.format(&Rfc3339).map(Value::String).unwrap_or(Value::Null),
		);
		knobs.insert("candidate_count".to_string(), Value::from(candidate_count));

		knobs
	}
}

fn validate_query(ctx: &QueryContext) -> Result<()> {
	if ctx.query.trim().is_empty() {
		return Err(Error::InvalidRequest { message: "query must not be empty.".to_string() });
	}

	Ok(())
}

fn record<T>(
	stages: &mut Vec<StageTrace>,
	warnings: &mut Vec<String>,
	snapshot: Value,
	output: StageOutput<T>,
) -> Option<T>
where
	T: Serialize,
{
	if let Some(error) = output.error() {
		warnings.push(format!("Stage {} failed: {error}", output.stage));
	}

	let (trace, value) = output.into_trace(snapshot);

	stages.push(trace);

	value
}

fn skip(
	stages: &mut Vec<StageTrace>,
	warnings: &mut Vec<String>,
	stage: StageName,
	snapshot: Value,
	reason: &str,
) {
	tracing::debug!(stage = %stage, reason, "Stage skipped.");

	warnings.push(reason.to_string());
	stages.push(pipeline::skipped_trace(stage, snapshot, reason));
}

fn merge_graph_memories(results: &mut Vec<RetrievalResult>, expansion: &GraphExpansionResult) {
	for memory in &expansion.memories {
		if results.iter().any(|result| result.id == memory.id) {
			continue;
		}

		let mut result = RetrievalResult::new(&memory.id, GRAPH_MEMORY_SCORE, &memory.content)
			.with_type("memory")
			.with_source("graph")
			.with_title(&memory.title);

		result
			.metadata
			.insert("entity_id".to_string(), Value::String(expansion.entity_id.clone()));
		results.push(result);
	}
}

/// Ids by descending score, input order on ties.
fn by_score(results: &[RetrievalResult], limit: usize) -> Vec<String> {
	let mut sorted = results.iter().collect::<Vec<_>>();

	sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

	sorted.into_iter().take(limit).map(|result| result.id.clone()).collect()
}

fn final_plan(
	context: &PipelineContext,
	ordered: Option<&order::OrderOutput>,
	graph: Option<&GraphExpansionResult>,
) -> Map<String, Value> {
	let mut plan = Map::new();
	let mut put = |key: &str, value: Result<Value, serde_json::Error>| {
		plan.insert(key.to_string(), value.unwrap_or(Value::Null));
	};

	if let Some(observe) = &context.observe {
		put("question_type", Ok(Value::from(observe.features.question_type.as_str())));
		put("intent_confidence", Ok(Value::from(observe.intent_confidence)));
		put("retrieval_quality", serde_json::to_value(&observe.quality));
	}
	if let Some(expand) = &context.expand {
		put("expansion_quality", Ok(Value::from(expand.quality.as_str())));
		put("coverage_gaps", serde_json::to_value(&expand.coverage_gaps));
		put("original_count", Ok(Value::from(expand.original_count)));
		put("expanded_count", Ok(Value::from(expand.expanded_count)));
	}
	if let Some(contrast) = &context.contrast {
		put("contradiction_severity", Ok(Value::from(contrast.severity.as_str())));
		put("resolution_suggestions", serde_json::to_value(&contrast.resolution_suggestions));
	}
	if let Some(order) = ordered {
		put("response_structure", serde_json::to_value(&order.response_structure));
		put("priority_ranking", serde_json::to_value(&order.ranking));
		put("buckets", serde_json::to_value(&order.buckets));
	}
	if let Some(graph) = graph {
		put("graph", serde_json::to_value(graph));
	}

	plan
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::retrieval::StaticRetriever;
	use quire_domain::GraphMemory;
	use quire_storage::graph::MemoryGraphAdapter;

	fn orchestrator(results: Vec<RetrievalResult>, settings: OrchestratorSettings) -> Orchestrator {
		Orchestrator::new(settings, Arc::new(StaticRetriever::new(results)), Arc::default())
	}

	#[tokio::test]
	async fn empty_query_is_rejected() {
		let orchestrator = orchestrator(Vec::new(), OrchestratorSettings::default());
		let err = orchestrator
			.run(&QueryContext::new("   "), &mut RandomnessSource::from_seed(1))
			.await
			.expect_err("Expected invalid request.");

		assert!(matches!(err, Error::InvalidRequest { .. }));
	}

	#[tokio::test]
	async fn disabled_stages_are_recorded_as_skipped() {
		let settings = OrchestratorSettings {
			toggles: StageToggles { expand: false, contrast: false, ..Default::default() },
			..Default::default()
		};
		let orchestrator =
			orchestrator(vec![RetrievalResult::new("a", 0.9, "Rust is fast.")], settings);
		let trace = orchestrator
			.run(&QueryContext::new("Is Rust fast?"), &mut RandomnessSource::from_seed(1))
			.await
			.expect("Run failed.");
		let names = trace.stages.iter().map(|stage| stage.stage).collect::<Vec<_>>();

		assert_eq!(names, StageName::ALL.to_vec());
		assert!(trace.stage(StageName::Expand).is_some_and(StageTrace::is_skipped));
		assert!(trace.stage(StageName::Contrast).is_some_and(StageTrace::is_skipped));
		assert!(trace.warnings.iter().any(|warning| warning.contains("expand is disabled")));
		assert_eq!(trace.selected_context_ids, vec!["a".to_string()]);
	}

	#[tokio::test]
	async fn exhausted_budget_skips_every_stage() {
		let settings = OrchestratorSettings { time_budget: Duration::ZERO, ..Default::default() };
		let orchestrator = orchestrator(Vec::new(), settings);
		let trace = orchestrator
			.run(&QueryContext::new("What is Rust?"), &mut RandomnessSource::from_seed(1))
			.await
			.expect("Run failed.");

		assert!(trace.stages.iter().all(StageTrace::is_skipped));
		assert!(trace.warnings.iter().any(|warning| warning.contains("Time budget exhausted")));
		assert!(trace.timings.total_ms >= trace.stage_duration_sum());
	}

	#[tokio::test]
	async fn run_fails_only_when_every_executed_stage_fails() {
		let broken = vec![RetrievalResult::new("nan", f64::NAN, "broken")];
		let partial = orchestrator(broken.clone(), OrchestratorSettings::default());
		let trace = partial
			.run(&QueryContext::new("What?"), &mut RandomnessSource::from_seed(1))
			.await
			.expect("Healthy stages keep the run alive.");

		assert!(trace.stage(StageName::Observe).is_some_and(StageTrace::is_failed));
		assert!(trace.stage(StageName::Expand).is_some_and(|stage| !stage.is_failed()));
		assert!(trace.warnings.iter().any(|warning| warning.starts_with("Stage observe failed")));

		let all_failing = orchestrator(
			broken,
			OrchestratorSettings {
				toggles: StageToggles { expand: false, contrast: false, ..Default::default() },
				..Default::default()
			},
		);
		let err = all_failing
			.run(&QueryContext::new("What?"), &mut RandomnessSource::from_seed(1))
			.await
			.expect_err("Expected pipeline failure.");

		assert!(matches!(err, Error::Pipeline { .. }));
	}

	#[tokio::test]
	async fn graph_memories_join_the_candidates() {
		let adapter = MemoryGraphAdapter::default()
			.with_relation("Rust", "compiles_with", "LLVM", 0.9)
			.with_memory(
				"Rust",
				GraphMemory {
					id: "mem-1".to_string(),
					title: "Rust editions".to_string(),
					content: "Rust ships a new edition every three years.".to_string(),
					role_view_level: None,
					role_view: Vec::new(),
				},
			);
		let settings = OrchestratorSettings {
			graph: Some(GraphBudgets {
				max_neighbors: 10,
				max_depth: 1,
				timeout: Duration::from_secs(1),
			}),
			..Default::default()
		};
		let orchestrator = orchestrator(
			vec![RetrievalResult::new("doc-1", 0.8, "Rust is a systems language.")],
			settings,
		)
		.with_graph(Arc::new(adapter));
		let trace = orchestrator
			.run(&QueryContext::new("What about Rust?"), &mut RandomnessSource::from_seed(5))
			.await
			.expect("Run failed.");
		let graph = trace.final_plan.get("graph").expect("Graph outcome must be recorded.");

		assert_eq!(graph["entity_id"], "Rust");
		assert_eq!(graph["relations"].as_array().map(Vec::len), Some(1));
		assert!(trace.selected_context_ids.contains(&"mem-1".to_string()));
		assert_eq!(trace.knobs["candidate_count"], 1);
	}
}
