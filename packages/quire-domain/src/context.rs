use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Immutable per-request input to the pipeline.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct QueryContext {
	pub query: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	#[serde(default)]
	pub preferences: Map<String, Value>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
	/// Reference time for recency scoring. Replays pin it to the frozen value.
	#[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
	pub as_of: Option<OffsetDateTime>,
}
impl QueryContext {
	pub fn new(query: impl Into<String>) -> Self {
		Self { query: query.into(), ..Default::default() }
	}

	pub fn with_role(mut self, role: impl Into<String>) -> Self {
		self.role = Some(role.into());

		self
	}

	pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
		self.session_id = Some(session_id.into());

		self
	}

	pub fn with_as_of(mut self, as_of: OffsetDateTime) -> Self {
		self.as_of = Some(as_of);

		self
	}

	pub fn role_or_default(&self) -> &str {
		self.role.as_deref().unwrap_or("general")
	}
}
