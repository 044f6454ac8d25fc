use crate::{
	Error, QuireService, Result,
	summary::{self, AudienceRole, TraceSummary},
};
use quire_domain::LedgerEntry;

impl QuireService {
	pub async fn ledger_entry(&self, session_id: &str, message_id: &str) -> Result<LedgerEntry> {
		self.ledger.read(session_id, message_id).await?.ok_or_else(|| Error::NotFound {
			message: format!("Ledger entry {session_id}/{message_id} does not exist."),
		})
	}

	pub async fn ledger_session(&self, session_id: &str) -> Result<Vec<LedgerEntry>> {
		self.ledger.list_session(session_id).await
	}

	pub async fn ledger_summary(
		&self,
		session_id: &str,
		message_id: &str,
		role: AudienceRole,
	) -> Result<TraceSummary> {
		let entry = self.ledger_entry(session_id, message_id).await?;

		Ok(summary::summarize(&serde_json::to_value(&entry)?, role))
	}
}
