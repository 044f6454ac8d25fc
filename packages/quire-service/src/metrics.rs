//! Service instruments on an OpenTelemetry meter, read back in-process for the admin surface.

use std::{
	collections::BTreeMap,
	sync::{Arc, Weak},
};

use opentelemetry::{
	KeyValue,
	metrics::{Counter, Histogram, MeterProvider as _, Result as MetricsResult},
};
use opentelemetry_sdk::{
	Resource,
	metrics::{
		Aggregation, InstrumentKind, ManualReader, Pipeline, SdkMeterProvider,
		data::{self, ResourceMetrics, Temporality},
		reader::{AggregationSelector, MetricReader, TemporalitySelector},
	},
};
use serde::Serialize;

use crate::degrade::Degrade;
use quire_domain::GraphExpansionResult;

const METER_NAME: &str = "quire";

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct HistogramSnapshot {
	pub count: u64,
	pub sum: f64,
	pub min: Option<f64>,
	pub max: Option<f64>,
}
impl HistogramSnapshot {
	pub fn mean(&self) -> f64 {
		if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
	}
}

/// Cumulative values keyed by instrument name, with attributes appended as `{key=value}`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
	pub counters: BTreeMap<String, u64>,
	pub histograms: BTreeMap<String, HistogramSnapshot>,
}

/// Lets the provider own a reader that the registry can still collect from.
#[derive(Clone, Debug)]
struct SharedReader(Arc<ManualReader>);
impl TemporalitySelector for SharedReader {
	fn temporality(&self, kind: InstrumentKind) -> Temporality {
		self.0.temporality(kind)
	}
}
impl AggregationSelector for SharedReader {
	fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
		self.0.aggregation(kind)
	}
}
impl MetricReader for SharedReader {
	fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
		self.0.register_pipeline(pipeline)
	}

	fn collect(&self, rm: &mut ResourceMetrics) -> MetricsResult<()> {
		self.0.collect(rm)
	}

	fn force_flush(&self) -> MetricsResult<()> {
		self.0.force_flush()
	}

	fn shutdown(&self) -> MetricsResult<()> {
		self.0.shutdown()
	}
}

pub struct MetricsRegistry {
	reader: SharedReader,
	// Dropping the provider shuts the instruments down.
	_provider: SdkMeterProvider,
	retrieval_latency_ms: Histogram<f64>,
	retrieval_failures: Counter<u64>,
	orchestrator_runs: Counter<u64>,
	orchestrator_failures: Counter<u64>,
	orchestrator_latency_ms: Histogram<f64>,
	budget_exhausted: Counter<u64>,
	graph_expansions: Counter<u64>,
	graph_latency_ms: Histogram<f64>,
	graph_nodes_visited: Histogram<f64>,
	graph_truncations: Counter<u64>,
	enhanced_responses: Counter<u64>,
	legacy_responses: Counter<u64>,
}
impl MetricsRegistry {
	pub fn new() -> Self {
		let reader = SharedReader(Arc::new(ManualReader::builder().build()));
		let provider = SdkMeterProvider::builder().with_reader(reader.clone()).build();
		let meter = provider.meter(METER_NAME);

		Self {
			retrieval_latency_ms: meter
				.f64_histogram("retrieval.latency_ms")
				.with_description("Candidate retrieval latency in milliseconds")
				.init(),
			retrieval_failures: meter
				.u64_counter("retrieval.failures_total")
				.with_description("Retrievals that failed or timed out")
				.init(),
			orchestrator_runs: meter
				.u64_counter("orchestrator.runs_total")
				.with_description("Pipeline runs that produced a trace")
				.init(),
			orchestrator_failures: meter
				.u64_counter("orchestrator.failures_total")
				.with_description("Pipeline runs where every executed stage failed")
				.init(),
			orchestrator_latency_ms: meter
				.f64_histogram("orchestrator.latency_ms")
				.with_description("Pipeline run latency in milliseconds")
				.init(),
			budget_exhausted: meter
				.u64_counter("orchestrator.budget_exhausted_total")
				.with_description("Stages skipped because the time budget ran out")
				.init(),
			graph_expansions: meter
				.u64_counter("graph.expansions_total")
				.with_description("Graph expansions attempted")
				.init(),
			graph_latency_ms: meter
				.f64_histogram("graph.latency_ms")
				.with_description("Graph expansion latency in milliseconds")
				.init(),
			graph_nodes_visited: meter
				.f64_histogram("graph.nodes_visited")
				.with_description("Nodes returned per graph expansion")
				.init(),
			graph_truncations: meter
				.u64_counter("graph.truncations_total")
				.with_description("Graph expansions cut short, by reason")
				.init(),
			enhanced_responses: meter
				.u64_counter("service.enhanced_total")
				.with_description("Queries answered by the enhanced pipeline")
				.init(),
			legacy_responses: meter
				.u64_counter("service.legacy_total")
				.with_description("Queries answered by plain retrieval")
				.init(),
			reader,
			_provider: provider,
		}
	}

	pub fn record_retrieval(&self, latency_ms: f64) {
		record_finite(&self.retrieval_latency_ms, latency_ms);
	}

	pub fn record_retrieval_failure(&self) {
		self.retrieval_failures.add(1, &[]);
	}

	pub fn record_run(&self, total_ms: f64) {
		self.orchestrator_runs.add(1, &[]);

		record_finite(&self.orchestrator_latency_ms, total_ms);
	}

	pub fn record_pipeline_failure(&self) {
		self.orchestrator_failures.add(1, &[]);
	}

	pub fn record_budget_exhausted(&self) {
		self.budget_exhausted.add(1, &[]);
	}

	pub fn record_expansion(&self, out: &GraphExpansionResult) {
		self.graph_expansions.add(1, &[]);

		record_finite(&self.graph_latency_ms, out.elapsed_time_ms);
		record_finite(&self.graph_nodes_visited, f64::from(out.nodes_visited));

		if let Some(reason) = &out.truncation_reason {
			self.graph_truncations.add(1, &[KeyValue::new("reason", reason.metric_key())]);
		}
	}

	pub fn record_enhanced(&self) {
		self.enhanced_responses.add(1, &[]);
	}

	pub fn record_legacy(&self) {
		self.legacy_responses.add(1, &[]);
	}

	pub fn counter(&self, series: &str) -> u64 {
		self.snapshot().counters.get(series).copied().unwrap_or(0)
	}

	pub fn histogram(&self, series: &str) -> Option<HistogramSnapshot> {
		self.snapshot().histograms.remove(series)
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		let mut collected =
			ResourceMetrics { resource: Resource::empty(), scope_metrics: Vec::new() };
		let mut snapshot = MetricsSnapshot::default();

		self.reader.collect(&mut collected).or_degrade("collect_metrics");

		for metric in collected.scope_metrics.iter().flat_map(|scope| &scope.metrics) {
			let aggregation = metric.data.as_any();

			if let Some(sum) = aggregation.downcast_ref::<data::Sum<u64>>() {
				for point in &sum.data_points {
					let series = series_key(&metric.name, &point.attributes);

					snapshot.counters.insert(series, point.value);
				}
			} else if let Some(histogram) = aggregation.downcast_ref::<data::Histogram<f64>>() {
				for point in &histogram.data_points {
					snapshot.histograms.insert(
						series_key(&metric.name, &point.attributes),
						HistogramSnapshot {
							count: point.count,
							sum: point.sum,
							min: point.min,
							max: point.max,
						},
					);
				}
			}
		}

		snapshot
	}
}
impl Default for MetricsRegistry {
	fn default() -> Self {
		Self::new()
	}
}

fn record_finite(histogram: &Histogram<f64>, value: f64) {
	if value.is_finite() {
		histogram.record(value, &[]);
	}
}

fn series_key(name: &str, attributes: &[KeyValue]) -> String {
	if attributes.is_empty() {
		return name.to_string();
	}

	let mut pairs = attributes
		.iter()
		.map(|kv| format!("{}={}", kv.key.as_str(), kv.value.as_str()))
		.collect::<Vec<_>>();

	pairs.sort();

	format!("{name}{{{}}}", pairs.join(","))
}

#[cfg(test)]
mod tests {
	use super::*;
	use quire_domain::TruncationReason;

	#[test]
	fn histograms_track_bounds() {
		let metrics = MetricsRegistry::default();

		metrics.record_run(4.0);
		metrics.record_run(2.0);
		metrics.record_run(f64::NAN);

		let histogram =
			metrics.histogram("orchestrator.latency_ms").expect("Histogram must exist.");

		assert_eq!(histogram.count, 2);
		assert_eq!(histogram.min, Some(2.0));
		assert_eq!(histogram.max, Some(4.0));
		assert_eq!(histogram.mean(), 3.0);
		assert_eq!(metrics.counter("orchestrator.runs_total"), 3);
	}

	#[test]
	fn counters_start_at_zero() {
		let metrics = MetricsRegistry::default();

		assert_eq!(metrics.counter("service.legacy_total"), 0);

		metrics.record_legacy();
		metrics.record_legacy();

		assert_eq!(metrics.counter("service.legacy_total"), 2);
		assert_eq!(metrics.snapshot().counters.get("service.legacy_total"), Some(&2));
	}

	#[test]
	fn truncations_are_split_by_reason() {
		let metrics = MetricsRegistry::default();
		let mut out = GraphExpansionResult { nodes_visited: 20, ..Default::default() };

		out.mark_truncated(TruncationReason::NodeBudgetExceeded);
		metrics.record_expansion(&out);
		metrics.record_expansion(&GraphExpansionResult::default());

		assert_eq!(metrics.counter("graph.expansions_total"), 2);
		assert_eq!(metrics.counter("graph.truncations_total{reason=node_budget_exceeded}"), 1);
		assert_eq!(
			metrics.histogram("graph.nodes_visited").map(|histogram| histogram.count),
			Some(2)
		);
	}
}
