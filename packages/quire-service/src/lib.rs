pub mod degrade;
pub mod fallback;
pub mod flags;
pub mod freeze;
pub mod graph;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod randomness;
pub mod retrieval;
pub mod summary;

mod admin;
mod audit;
mod error;
mod query;

pub use admin::{CaptureRequest, HealthReport, ReplayRequest};
pub use error::{Error, Result};
pub use query::{LedgerSummary, QueryRequest, QueryResponse, ResponseMode};

use std::{future::Future, pin::Pin, sync::Arc};

use quire_config::Config;
use quire_storage::{
	frozen::{FrozenTraceStore, FsFreezeStore, MemoryFreezeStore},
	graph::GraphAdapter,
	ledger::{LedgerStore, MemoryLedgerStore},
};

use crate::{
	fallback::{Clock, FallbackGuard, FallbackSettings, SystemClock},
	flags::{ConfigFlags, FlagSource},
	freeze::FreezeHarness,
	ledger::{LedgerOptions, TraceLedger},
	metrics::MetricsRegistry,
	orchestrator::{Orchestrator, OrchestratorSettings},
	retrieval::{HttpRetriever, Retriever, StaticRetriever},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything the service talks to, injected at construction.
pub struct Collaborators {
	pub retriever: Arc<dyn Retriever>,
	pub graph: Option<Arc<dyn GraphAdapter>>,
	pub ledger_store: Arc<dyn LedgerStore>,
	pub freeze_store: Arc<dyn FrozenTraceStore>,
	pub flags: Arc<dyn FlagSource>,
	pub clock: Arc<dyn Clock>,
}
impl Collaborators {
	/// HTTP retrieval when providers are configured, an in-process ledger, and frozen traces on
	/// disk under `storage.freeze_dir`.
	pub fn from_config(cfg: &Config) -> Self {
		let retriever: Arc<dyn Retriever> = match &cfg.providers {
			Some(providers) => Arc::new(HttpRetriever::new(providers.clone())),
			None => Arc::new(StaticRetriever::default()),
		};

		Self {
			retriever,
			freeze_store: Arc::new(FsFreezeStore::new(cfg.storage.freeze_dir.clone())),
			..Self::in_memory(cfg)
		}
	}

	/// Fully in-process collaborators with no candidates.
	pub fn in_memory(cfg: &Config) -> Self {
		Self {
			retriever: Arc::new(StaticRetriever::default()),
			graph: None,
			ledger_store: Arc::new(MemoryLedgerStore::default()),
			freeze_store: Arc::new(MemoryFreezeStore::default()),
			flags: Arc::new(ConfigFlags::new(cfg.flags.clone())),
			clock: Arc::new(SystemClock),
		}
	}

	pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
		self.retriever = retriever;

		self
	}

	pub fn with_graph(mut self, graph: Arc<dyn GraphAdapter>) -> Self {
		self.graph = Some(graph);

		self
	}

	pub fn with_ledger_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
		self.ledger_store = store;

		self
	}

	pub fn with_freeze_store(mut self, store: Arc<dyn FrozenTraceStore>) -> Self {
		self.freeze_store = store;

		self
	}

	pub fn with_flags(mut self, flags: Arc<dyn FlagSource>) -> Self {
		self.flags = flags;

		self
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}
}

pub struct QuireService {
	pub cfg: Config,
	pub orchestrator: Arc<Orchestrator>,
	pub ledger: TraceLedger,
	pub freeze: FreezeHarness,
	pub guard: FallbackGuard,
	pub flags: Arc<dyn FlagSource>,
	pub metrics: Arc<MetricsRegistry>,
}
impl QuireService {
	pub fn new(cfg: Config, collaborators: Collaborators) -> Self {
		let metrics = Arc::new(MetricsRegistry::default());
		let settings = OrchestratorSettings::from_config(&cfg.orchestrator, &cfg.graph);
		let mut orchestrator = Orchestrator::new(settings, collaborators.retriever, metrics.clone());

		if cfg.graph.enabled
			&& let Some(graph) = collaborators.graph
		{
			orchestrator = orchestrator.with_graph(graph);
		}

		let orchestrator = Arc::new(orchestrator);
		let ledger_options = LedgerOptions::from_config(&cfg.ledger);
		let freeze = FreezeHarness::new(
			collaborators.freeze_store,
			orchestrator.clone(),
			&ledger_options,
			cfg.freeze.top_k,
		);
		let ledger = TraceLedger::new(collaborators.ledger_store, ledger_options);
		let guard =
			FallbackGuard::new(FallbackSettings::from_config(&cfg.fallback), collaborators.clock);

		Self { cfg, orchestrator, ledger, freeze, guard, flags: collaborators.flags, metrics }
	}
}
