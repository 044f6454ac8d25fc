use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Health and circuit state owned by the fallback guard.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct HealthStatus {
	pub orchestrator_healthy: bool,
	pub ledger_healthy: bool,
	pub last_orchestrator_error: Option<String>,
	pub last_ledger_error: Option<String>,
	pub consecutive_failures: u32,
	#[serde(with = "time::serde::rfc3339::option")]
	pub last_health_check: Option<OffsetDateTime>,
	pub circuit_open: bool,
	#[serde(with = "time::serde::rfc3339::option")]
	pub circuit_opened_at: Option<OffsetDateTime>,
}
impl Default for HealthStatus {
	fn default() -> Self {
		Self {
			orchestrator_healthy: true,
			ledger_healthy: true,
			last_orchestrator_error: None,
			last_ledger_error: None,
			consecutive_failures: 0,
			last_health_check: None,
			circuit_open: false,
			circuit_opened_at: None,
		}
	}
}
