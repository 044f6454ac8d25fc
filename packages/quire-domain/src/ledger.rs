use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
	#[default]
	Sha256,
	Md5,
	Blake3,
}
impl HashAlgorithm {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Sha256 => "sha256",
			Self::Md5 => "md5",
			Self::Blake3 => "blake3",
		}
	}
}
impl FromStr for HashAlgorithm {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"sha256" => Ok(Self::Sha256),
			"md5" => Ok(Self::Md5),
			"blake3" => Ok(Self::Blake3),
			other => Err(format!("Unsupported hash algorithm {other:?}.")),
		}
	}
}
impl Display for HashAlgorithm {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One persisted trace, keyed by `(session_id, message_id)`. Never updated in place.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LedgerEntry {
	pub session_id: String,
	pub message_id: String,
	pub trace: Value,
	pub original_size: usize,
	pub stored_size: usize,
	pub is_truncated: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub trace_hash: Option<String>,
	#[serde(default)]
	pub hash_algorithm: HashAlgorithm,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}
impl LedgerEntry {
	/// Number of stages that survived truncation.
	pub fn stored_stage_count(&self) -> usize {
		self.trace.get("stages").and_then(Value::as_array).map(Vec::len).unwrap_or(0)
	}
}
