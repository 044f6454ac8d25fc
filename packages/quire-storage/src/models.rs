use serde_json::Value;
use time::OffsetDateTime;

#[derive(Debug, sqlx::FromRow)]
pub struct LedgerRow {
	pub session_id: String,
	pub message_id: String,
	pub trace: Value,
	pub original_size: i64,
	pub stored_size: i64,
	pub is_truncated: bool,
	pub trace_hash: Option<String>,
	pub hash_algorithm: String,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub struct RelationRow {
	pub source_id: String,
	pub relation_type: String,
	pub target_id: String,
	pub weight: f32,
}

#[derive(Debug, sqlx::FromRow)]
pub struct MemoryRow {
	pub memory_id: String,
	pub title: String,
	pub content: String,
	pub role_view_level: Option<i16>,
	pub role_view: Vec<String>,
}
