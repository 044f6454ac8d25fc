mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, EmbeddingProviderConfig, Fallback, Freeze, Graph, Ledger, Orchestrator, Postgres,
	Providers, SearchProviderConfig, Service, Storage,
};

use std::{fs, path::Path};

/// Smallest ledger budget that still fits a truncation skeleton.
pub const MIN_TRACE_BYTES: usize = 256;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in
		[("service.http_bind", &cfg.service.http_bind), ("service.admin_bind", &cfg.service.admin_bind)]
	{
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if let Some(postgres) = cfg.storage.postgres.as_ref() {
		if postgres.dsn.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.postgres.dsn must be non-empty.".to_string(),
			});
		}
		if postgres.pool_max_conns == 0 {
			return Err(Error::Validation {
				message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
			});
		}
	}
	if cfg.storage.freeze_dir.as_os_str().is_empty() {
		return Err(Error::Validation {
			message: "storage.freeze_dir must be non-empty.".to_string(),
		});
	}

	if let Some(providers) = cfg.providers.as_ref() {
		if providers.embedding.dimensions == 0 {
			return Err(Error::Validation {
				message: "providers.embedding.dimensions must be greater than zero.".to_string(),
			});
		}

		for (label, key) in
			[("embedding", &providers.embedding.api_key), ("search", &providers.search.api_key)]
		{
			if key.trim().is_empty() {
				return Err(Error::Validation {
					message: format!("Provider {label} api_key must be non-empty."),
				});
			}
		}
		for (label, timeout_ms) in [
			("embedding", providers.embedding.timeout_ms),
			("search", providers.search.timeout_ms),
		] {
			if timeout_ms == 0 {
				return Err(Error::Validation {
					message: format!("Provider {label} timeout_ms must be greater than zero."),
				});
			}
		}
	}

	if cfg.orchestrator.time_budget_ms == 0 {
		return Err(Error::Validation {
			message: "orchestrator.time_budget_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.orchestrator.retrieval_k == 0 {
		return Err(Error::Validation {
			message: "orchestrator.retrieval_k must be greater than zero.".to_string(),
		});
	}
	if cfg.orchestrator.retrieval_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "orchestrator.retrieval_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.orchestrator.max_selected == 0 {
		return Err(Error::Validation {
			message: "orchestrator.max_selected must be greater than zero.".to_string(),
		});
	}
	if cfg.graph.enabled {
		if cfg.graph.max_neighbors == 0 {
			return Err(Error::Validation {
				message: "graph.max_neighbors must be greater than zero.".to_string(),
			});
		}
		if cfg.graph.max_depth == 0 {
			return Err(Error::Validation {
				message: "graph.max_depth must be greater than zero.".to_string(),
			});
		}
		if cfg.graph.timeout_ms == 0 {
			return Err(Error::Validation {
				message: "graph.timeout_ms must be greater than zero.".to_string(),
			});
		}
	}
	if cfg.ledger.max_trace_bytes < MIN_TRACE_BYTES {
		return Err(Error::Validation {
			message: format!("ledger.max_trace_bytes must be at least {MIN_TRACE_BYTES}."),
		});
	}
	if !matches!(cfg.ledger.hash_algorithm.as_str(), "sha256" | "md5" | "blake3") {
		return Err(Error::Validation {
			message: "ledger.hash_algorithm must be one of sha256, md5, or blake3.".to_string(),
		});
	}
	if !(8..=64).contains(&cfg.ledger.hash_prefix_len) {
		return Err(Error::Validation {
			message: "ledger.hash_prefix_len must be in the range 8-64.".to_string(),
		});
	}
	if cfg.ledger.redact_large_fields && cfg.ledger.large_field_chars == 0 {
		return Err(Error::Validation {
			message: "ledger.large_field_chars must be greater than zero when redaction is enabled."
				.to_string(),
		});
	}
	if cfg.freeze.top_k == 0 {
		return Err(Error::Validation {
			message: "freeze.top_k must be greater than zero.".to_string(),
		});
	}
	if cfg.fallback.max_consecutive_failures == 0 {
		return Err(Error::Validation {
			message: "fallback.max_consecutive_failures must be greater than zero.".to_string(),
		});
	}

	for name in cfg.flags.keys() {
		if name.trim().is_empty() {
			return Err(Error::Validation { message: "flags keys must be non-empty.".to_string() });
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.ledger.hash_algorithm = cfg.ledger.hash_algorithm.trim().to_ascii_lowercase();

	if cfg.service.log_level.trim().is_empty() {
		cfg.service.log_level = "info".to_string();
	}
	if cfg.storage.postgres.as_ref().map(|postgres| postgres.dsn.trim().is_empty()).unwrap_or(false)
	{
		cfg.storage.postgres = None;
	}
}
