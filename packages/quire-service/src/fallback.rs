//! Circuit breaker that decides between the enhanced pipeline and the legacy path.

use std::sync::{Arc, Mutex, MutexGuard};

use time::{Duration, OffsetDateTime};

use crate::{
	degrade::Degrade, ledger::TraceLedger, orchestrator::Orchestrator,
	randomness::RandomnessSource,
};
use quire_domain::{HealthStatus, LedgerEntry, QueryContext, Trace};

pub trait Clock
where
	Self: Send + Sync,
{
	fn now(&self) -> OffsetDateTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// A clock that only moves when told to.
pub struct ManualClock {
	now: Mutex<OffsetDateTime>,
}
impl ManualClock {
	pub fn new(start: OffsetDateTime) -> Self {
		Self { now: Mutex::new(start) }
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().unwrap_or_else(|err| err.into_inner());

		*now += by;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.now.lock().unwrap_or_else(|err| err.into_inner())
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackSettings {
	pub max_consecutive_failures: u32,
	pub reset_after: Duration,
}
impl FallbackSettings {
	pub fn from_config(cfg: &quire_config::Fallback) -> Self {
		Self {
			max_consecutive_failures: cfg.max_consecutive_failures,
			reset_after: Duration::seconds(
				i64::try_from(cfg.circuit_breaker_reset_seconds).unwrap_or(i64::MAX),
			),
		}
	}
}
impl Default for FallbackSettings {
	fn default() -> Self {
		Self::from_config(&quire_config::Fallback::default())
	}
}

#[derive(Clone, Debug, Default)]
pub struct GuardOutcome {
	pub result: Option<Trace>,
	pub ledger_entry: Option<LedgerEntry>,
	pub use_legacy: bool,
	pub reason: Option<String>,
}

pub struct FallbackGuard {
	settings: FallbackSettings,
	state: Mutex<HealthStatus>,
	clock: Arc<dyn Clock>,
}
impl FallbackGuard {
	pub fn new(settings: FallbackSettings, clock: Arc<dyn Clock>) -> Self {
		Self { settings, state: Mutex::new(HealthStatus::default()), clock }
	}

	fn lock(&self) -> MutexGuard<'_, HealthStatus> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}

	/// Closes an open circuit once the reset window has passed.
	fn refresh(&self, state: &mut HealthStatus, now: OffsetDateTime) {
		if let (true, Some(opened_at)) = (state.circuit_open, state.circuit_opened_at)
			&& now - opened_at >= self.settings.reset_after
		{
			state.circuit_open = false;
			state.circuit_opened_at = None;
			state.consecutive_failures = 0;

			tracing::info!("Circuit breaker closed after the reset window.");
		}
	}

	pub fn is_active(&self) -> bool {
		let now = self.clock.now();
		let mut state = self.lock();

		self.refresh(&mut state, now);

		!state.circuit_open && state.consecutive_failures < self.settings.max_consecutive_failures
	}

	pub fn status(&self) -> HealthStatus {
		let now = self.clock.now();
		let mut state = self.lock();

		self.refresh(&mut state, now);

		state.clone()
	}

	pub fn record_orchestrator_success(&self) {
		self.record_success();
	}

	pub fn record_ledger_success(&self) {
		self.record_success();
	}

	fn record_success(&self) {
		let now = self.clock.now();
		let mut state = self.lock();

		state.consecutive_failures = 0;
		state.orchestrator_healthy = true;
		state.ledger_healthy = true;
		state.last_health_check = Some(now);
	}

	pub fn record_orchestrator_failure(&self, error: &str) {
		self.record_failure(|state| {
			state.orchestrator_healthy = false;
			state.last_orchestrator_error = Some(error.to_string());
		});
	}

	pub fn record_ledger_failure(&self, error: &str) {
		self.record_failure(|state| {
			state.ledger_healthy = false;
			state.last_ledger_error = Some(error.to_string());
		});
	}

	fn record_failure<F>(&self, mark: F)
	where
		F: FnOnce(&mut HealthStatus),
	{
		let now = self.clock.now();
		let mut state = self.lock();

		mark(&mut state);

		state.consecutive_failures = state.consecutive_failures.saturating_add(1);
		state.last_health_check = Some(now);

		if !state.circuit_open
			&& state.consecutive_failures >= self.settings.max_consecutive_failures
		{
			state.circuit_open = true;
			state.circuit_opened_at = Some(now);

			tracing::warn!(
				consecutive_failures = state.consecutive_failures,
				"Circuit breaker opened."
			);
		}
	}

	/// Forces the legacy path until the reset window passes or [`Self::reset`] is called.
	pub fn open_circuit(&self) {
		let now = self.clock.now();
		let mut state = self.lock();

		state.circuit_open = true;
		state.circuit_opened_at = Some(now);

		tracing::warn!("Circuit breaker opened by operator.");
	}

	pub fn reset(&self) {
		let now = self.clock.now();
		let mut state = self.lock();

		*state = HealthStatus { last_health_check: Some(now), ..HealthStatus::default() };

		tracing::info!("Circuit breaker reset by operator.");
	}

	/// Runs the pipeline and persists its trace. A ledger failure never discards the result.
	pub async fn execute(
		&self,
		orchestrator: &Orchestrator,
		ledger: Option<&TraceLedger>,
		ctx: &QueryContext,
		session_id: &str,
		message_id: &str,
		rng: &mut RandomnessSource,
	) -> GuardOutcome {
		if !self.is_active() {
			return GuardOutcome {
				use_legacy: true,
				reason: Some("Circuit breaker is open.".to_string()),
				..Default::default()
			};
		}

		let trace = match orchestrator.run(ctx, rng).await {
			Ok(trace) => trace,
			Err(err) => {
				let message = err.to_string();

				tracing::warn!(error = %message, "Orchestrator failed; using the legacy path.");

				self.record_orchestrator_failure(&message);

				return GuardOutcome {
					use_legacy: true,
					reason: Some(format!("Orchestrator failed: {message}")),
					..Default::default()
				};
			},
		};

		self.record_orchestrator_success();

		let mut outcome = GuardOutcome { result: Some(trace), ..Default::default() };

		if let (Some(ledger), Some(trace)) = (ledger, outcome.result.as_ref()) {
			let mut reason = None;

			outcome.ledger_entry = ledger
				.write(session_id, message_id, trace)
				.await
				.map(|entry| {
					self.record_ledger_success();

					Some(entry)
				})
				.or_degrade_with("ledger_write", |message| {
					self.record_ledger_failure(&message);

					reason = Some(format!("Ledger write failed: {message}"));

					None
				});
			outcome.reason = reason;
		}

		outcome
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use time::macros::datetime;

	fn guard(max: u32, reset_seconds: i64) -> (FallbackGuard, Arc<ManualClock>) {
		let clock = Arc::new(ManualClock::new(datetime!(2025-01-01 00:00 UTC)));
		let settings = FallbackSettings {
			max_consecutive_failures: max,
			reset_after: Duration::seconds(reset_seconds),
		};

		(FallbackGuard::new(settings, clock.clone()), clock)
	}

	#[test]
	fn breaker_opens_after_max_failures() {
		let (guard, _) = guard(3, 60);

		for _ in 0..2 {
			guard.record_orchestrator_failure("boom");
		}

		assert!(guard.is_active());

		guard.record_orchestrator_failure("boom");

		let status = guard.status();

		assert!(!guard.is_active());
		assert!(status.circuit_open);
		assert_eq!(status.consecutive_failures, 3);
		assert_eq!(status.last_orchestrator_error.as_deref(), Some("boom"));
	}

	#[test]
	fn breaker_closes_after_reset_window() {
		let (guard, clock) = guard(2, 60);

		guard.record_ledger_failure("disk full");
		guard.record_ledger_failure("disk full");

		assert!(!guard.is_active());

		clock.advance(Duration::seconds(59));

		assert!(!guard.is_active());

		clock.advance(Duration::seconds(1));

		assert!(guard.is_active());

		let status = guard.status();

		assert!(!status.circuit_open);
		assert_eq!(status.consecutive_failures, 0);
		assert!(status.circuit_opened_at.is_none());
	}

	#[test]
	fn any_success_resets_failures_and_health() {
		let (guard, _) = guard(3, 60);

		guard.record_orchestrator_failure("boom");
		guard.record_ledger_failure("slow");
		guard.record_ledger_success();

		let status = guard.status();

		assert_eq!(status.consecutive_failures, 0);
		assert!(status.orchestrator_healthy);
		assert!(status.ledger_healthy);
	}

	#[test]
	fn operator_hooks_override_state() {
		let (guard, _) = guard(3, 60);

		guard.open_circuit();

		assert!(!guard.is_active());

		guard.reset();

		assert!(guard.is_active());
		assert_eq!(guard.status().consecutive_failures, 0);
	}
}
