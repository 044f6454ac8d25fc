use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
	Temporal,
	Factual,
	Numerical,
	Content,
}
impl ContradictionKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Temporal => "temporal",
			Self::Factual => "factual",
			Self::Numerical => "numerical",
			Self::Content => "content",
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	Low,
	Medium,
	High,
}
impl Severity {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Low => "low",
			Self::Medium => "medium",
			Self::High => "high",
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Claim {
	pub text: String,
	pub source_id: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Contradiction {
	#[serde(rename = "type")]
	pub kind: ContradictionKind,
	pub subject: String,
	pub claim_a: Claim,
	pub claim_b: Claim,
	pub severity: Severity,
	pub confidence: f64,
}
impl Contradiction {
	pub fn involves(&self, source_id: &str) -> bool {
		self.claim_a.source_id == source_id || self.claim_b.source_id == source_id
	}

	/// Stable label such as `factual_contradiction`.
	pub fn label(&self) -> String {
		format!("{}_contradiction", self.kind.as_str())
	}
}
