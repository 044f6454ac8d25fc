pub mod context;
pub mod contradiction;
pub mod frozen;
pub mod graph;
pub mod health;
pub mod ledger;
pub mod redact;
pub mod retrieval;
pub mod text;
pub mod trace;

pub use context::QueryContext;
pub use contradiction::{Claim, Contradiction, ContradictionKind, Severity};
pub use frozen::FrozenTrace;
pub use graph::{
	BudgetExceeded, GraphExpansionResult, GraphMemory, GraphRelation, TruncationReason,
};
pub use health::HealthStatus;
pub use ledger::{HashAlgorithm, LedgerEntry};
pub use retrieval::RetrievalResult;
pub use trace::{
	OrchestrationResult, StageMetrics, StageName, StageTrace, TRACE_VERSION, Timings, Trace,
};
