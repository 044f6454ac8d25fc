use std::fmt::Display;

/// Turns a collaborator failure into a logged fallback value.
///
/// Failures that only affect auditability or enrichment go through this instead of `?`, so the
/// request continues with an empty or default value.
pub trait Degrade<T> {
	fn or_degrade(self, operation: &'static str) -> T
	where
		T: Default;

	/// `fallback` receives the rendered failure.
	fn or_degrade_with<F>(self, operation: &'static str, fallback: F) -> T
	where
		F: FnOnce(String) -> T;
}
impl<T, E> Degrade<T> for Result<T, E>
where
	E: Display,
{
	fn or_degrade(self, operation: &'static str) -> T
	where
		T: Default,
	{
		self.or_degrade_with(operation, |_| T::default())
	}

	fn or_degrade_with<F>(self, operation: &'static str, fallback: F) -> T
	where
		F: FnOnce(String) -> T,
	{
		match self {
			Ok(value) => value,
			Err(err) => {
				let message = err.to_string();

				tracing::warn!(error = %message, operation, "Collaborator call failed; degrading.");

				fallback(message)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn errors_fall_back_to_default() {
		let failed: Result<Vec<u32>, String> = Err("offline".to_string());

		assert!(failed.or_degrade("retrieve").is_empty());
	}

	#[test]
	fn values_pass_through() {
		let ok: Result<u32, String> = Ok(7);

		assert_eq!(ok.or_degrade_with("flag", |_| 0), 7);
	}

	#[test]
	fn fallback_sees_the_failure() {
		let failed: Result<u32, String> = Err("disk full".to_string());
		let mut seen = None;
		let value = failed.or_degrade_with("ledger_write", |message| {
			seen = Some(message);

			0
		});

		assert_eq!(value, 0);
		assert_eq!(seen.as_deref(), Some("disk full"));
	}
}
