use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// One candidate returned by the retrieval collaborator.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RetrievalResult {
	pub id: String,
	/// Relevance in [0, 1].
	pub score: f64,
	#[serde(rename = "type", default = "default_result_type")]
	pub result_type: String,
	#[serde(default)]
	pub source: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default)]
	pub text: String,
	#[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<OffsetDateTime>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}
impl RetrievalResult {
	pub fn new(id: impl Into<String>, score: f64, text: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			score,
			result_type: default_result_type(),
			text: text.into(),
			..Default::default()
		}
	}

	pub fn with_type(mut self, result_type: impl Into<String>) -> Self {
		self.result_type = result_type.into();

		self
	}

	pub fn with_title(mut self, title: impl Into<String>) -> Self {
		self.title = Some(title.into());

		self
	}

	pub fn with_source(mut self, source: impl Into<String>) -> Self {
		self.source = source.into();

		self
	}

	pub fn with_updated_at(mut self, updated_at: OffsetDateTime) -> Self {
		self.updated_at = Some(updated_at);

		self
	}

	/// Title and body joined for text heuristics.
	pub fn full_text(&self) -> String {
		match self.title.as_deref() {
			Some(title) if !title.is_empty() => format!("{title}. {}", self.text),
			_ => self.text.clone(),
		}
	}
}

fn default_result_type() -> String {
	"document".to_string()
}
