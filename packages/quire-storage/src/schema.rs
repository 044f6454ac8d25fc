pub fn render_schema() -> &'static str {
	include_str!("../../../sql/init.sql")
}

/// Splits the schema into executable statements.
pub fn statements(sql: &str) -> impl Iterator<Item = &str> {
	sql.split(';').map(str::trim).filter(|statement| !statement.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn schema_declares_ledger_and_graph_tables() {
		let sql = render_schema();
		let creates = statements(sql).filter(|s| s.starts_with("CREATE TABLE")).count();

		assert!(sql.contains("CREATE TABLE IF NOT EXISTS trace_ledger"));
		assert!(sql.contains("PRIMARY KEY (session_id, message_id)"));
		assert_eq!(creates, 4);
	}
}
