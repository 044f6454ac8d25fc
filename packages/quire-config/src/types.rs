use std::{collections::BTreeMap, path::PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	#[serde(default)]
	pub storage: Storage,
	/// Optional. Without providers the live retrieval path returns no candidates.
	pub providers: Option<Providers>,
	#[serde(default)]
	pub orchestrator: Orchestrator,
	#[serde(default)]
	pub graph: Graph,
	#[serde(default)]
	pub ledger: Ledger,
	#[serde(default)]
	pub freeze: Freeze,
	#[serde(default)]
	pub fallback: Fallback,
	/// Default values for feature flags, keyed by flag name.
	#[serde(default)]
	pub flags: BTreeMap<String, bool>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Storage {
	/// Optional. Without Postgres the ledger is kept in process memory.
	pub postgres: Option<Postgres>,
	pub freeze_dir: PathBuf,
}
impl Default for Storage {
	fn default() -> Self {
		Self { postgres: None, freeze_dir: PathBuf::from("frozen_traces") }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub search: SearchProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SearchProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub collection: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Orchestrator {
	pub time_budget_ms: u64,
	pub retrieval_k: u32,
	pub retrieval_timeout_ms: u64,
	pub max_selected: u32,
	pub enable_observe: bool,
	pub enable_expand: bool,
	pub enable_contrast: bool,
	pub enable_order: bool,
}
impl Default for Orchestrator {
	fn default() -> Self {
		Self {
			time_budget_ms: 5_000,
			retrieval_k: 20,
			retrieval_timeout_ms: 2_000,
			max_selected: 10,
			enable_observe: true,
			enable_expand: true,
			enable_contrast: true,
			enable_order: true,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Graph {
	pub enabled: bool,
	pub max_neighbors: u32,
	pub max_depth: u32,
	pub timeout_ms: u64,
}
impl Default for Graph {
	fn default() -> Self {
		Self { enabled: false, max_neighbors: 20, max_depth: 1, timeout_ms: 250 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Ledger {
	pub max_trace_bytes: usize,
	pub enable_hashing: bool,
	pub redact_large_fields: bool,
	/// Strings longer than this many characters are replaced when redaction is enabled.
	pub large_field_chars: usize,
	/// One of sha256, md5, or blake3.
	pub hash_algorithm: String,
	pub hash_prefix_len: usize,
}
impl Default for Ledger {
	fn default() -> Self {
		Self {
			max_trace_bytes: 65_536,
			enable_hashing: true,
			redact_large_fields: false,
			large_field_chars: 4_096,
			hash_algorithm: "sha256".to_string(),
			hash_prefix_len: 16,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Freeze {
	pub top_k: u32,
}
impl Default for Freeze {
	fn default() -> Self {
		Self { top_k: 10 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Fallback {
	pub max_consecutive_failures: u32,
	pub circuit_breaker_reset_seconds: u64,
}
impl Default for Fallback {
	fn default() -> Self {
		Self { max_consecutive_failures: 3, circuit_breaker_reset_seconds: 60 }
	}
}

fn default_log_level() -> String {
	"info".to_string()
}
