use std::{collections::BTreeMap, sync::RwLock};

use crate::{Result, degrade::Degrade};

pub const ENHANCED_PIPELINE: &str = "enhanced_pipeline";
pub const TRACE_LEDGER: &str = "trace_ledger";

/// Feature-flag storage. `Ok(None)` means the flag is unknown to the source.
pub trait FlagSource
where
	Self: Send + Sync,
{
	fn flag(&self, name: &str) -> Result<Option<bool>>;
}

/// Reads a flag, falling back to `default` when the flag is unset or the source fails.
pub fn get_flag(source: &dyn FlagSource, name: &str, default: bool) -> bool {
	source.flag(name).map(|value| value.unwrap_or(default)).or_degrade_with("flag", |_| default)
}

/// Flags seeded from configuration and adjustable at runtime.
#[derive(Default)]
pub struct ConfigFlags {
	values: RwLock<BTreeMap<String, bool>>,
}
impl ConfigFlags {
	pub fn new(values: BTreeMap<String, bool>) -> Self {
		Self { values: RwLock::new(values) }
	}

	pub fn set(&self, name: &str, value: bool) {
		let mut values = self.values.write().unwrap_or_else(|err| err.into_inner());

		values.insert(name.to_string(), value);
	}
}
impl FlagSource for ConfigFlags {
	fn flag(&self, name: &str) -> Result<Option<bool>> {
		let values = self.values.read().unwrap_or_else(|err| err.into_inner());

		Ok(values.get(name).copied())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Error;

	struct UnavailableFlags;
	impl FlagSource for UnavailableFlags {
		fn flag(&self, _name: &str) -> Result<Option<bool>> {
			Err(Error::Storage { message: "flag store unreachable".to_string() })
		}
	}

	#[test]
	fn unknown_flags_use_default() {
		let flags = ConfigFlags::default();

		assert!(get_flag(&flags, ENHANCED_PIPELINE, true));
		assert!(!get_flag(&flags, ENHANCED_PIPELINE, false));
	}

	#[test]
	fn configured_values_override_default() {
		let flags = ConfigFlags::new(BTreeMap::from([(TRACE_LEDGER.to_string(), false)]));

		assert!(!get_flag(&flags, TRACE_LEDGER, true));

		flags.set(TRACE_LEDGER, true);

		assert!(get_flag(&flags, TRACE_LEDGER, false));
	}

	#[test]
	fn unavailable_source_degrades_to_default() {
		assert!(get_flag(&UnavailableFlags, ENHANCED_PIPELINE, true));
		assert!(!get_flag(&UnavailableFlags, ENHANCED_PIPELINE, false));
	}
}
