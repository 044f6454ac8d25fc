use std::{collections::BTreeMap, sync::Mutex};

use sqlx::PgPool;

use crate::{BoxFuture, Error, Result, models::LedgerRow};
use quire_domain::{HashAlgorithm, LedgerEntry};

/// Append-only storage for ledger entries keyed by `(session_id, message_id)`.
pub trait LedgerStore
where
	Self: Send + Sync,
{
	/// Inserts a new entry. Fails with [`Error::Conflict`] when the key already exists.
	fn put<'a>(&'a self, entry: &'a LedgerEntry) -> BoxFuture<'a, Result<()>>;

	fn get<'a>(
		&'a self,
		session_id: &'a str,
		message_id: &'a str,
	) -> BoxFuture<'a, Result<Option<LedgerEntry>>>;

	/// Entries for one session ordered by creation time.
	fn list_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>>;
}

#[derive(Default)]
pub struct MemoryLedgerStore {
	entries: Mutex<BTreeMap<(String, String), LedgerEntry>>,
}
impl MemoryLedgerStore {
	pub fn len(&self) -> usize {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
impl LedgerStore for MemoryLedgerStore {
	fn put<'a>(&'a self, entry: &'a LedgerEntry) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let key = (entry.session_id.clone(), entry.message_id.clone());
			let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

			if entries.contains_key(&key) {
				return Err(Error::Conflict(format!(
					"Ledger entry {}/{} already exists.",
					entry.session_id, entry.message_id
				)));
			}

			entries.insert(key, entry.clone());

			Ok(())
		})
	}

	fn get<'a>(
		&'a self,
		session_id: &'a str,
		message_id: &'a str,
	) -> BoxFuture<'a, Result<Option<LedgerEntry>>> {
		Box::pin(async move {
			let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

			Ok(entries.get(&(session_id.to_string(), message_id.to_string())).cloned())
		})
	}

	fn list_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>> {
		Box::pin(async move {
			let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
			let mut out = entries
				.iter()
				.filter(|((session, _), _)| session == session_id)
				.map(|(_, entry)| entry.clone())
				.collect::<Vec<_>>();

			out.sort_by(|a, b| {
				a.created_at.cmp(&b.created_at).then_with(|| a.message_id.cmp(&b.message_id))
			});

			Ok(out)
		})
	}
}

pub struct PgLedgerStore {
	pool: PgPool,
}
impl PgLedgerStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}
impl LedgerStore for PgLedgerStore {
	fn put<'a>(&'a self, entry: &'a LedgerEntry) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let result = sqlx::query(
				"\
INSERT INTO trace_ledger (
	session_id,
	message_id,
	trace,
	original_size,
	stored_size,
	is_truncated,
	trace_hash,
	hash_algorithm,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (session_id, message_id) DO NOTHING",
			)
			.bind(entry.session_id.as_str())
			.bind(entry.message_id.as_str())
			.bind(&entry.trace)
			.bind(i64::try_from(entry.original_size).unwrap_or(i64::MAX))
			.bind(i64::try_from(entry.stored_size).unwrap_or(i64::MAX))
			.bind(entry.is_truncated)
			.bind(entry.trace_hash.as_deref())
			.bind(entry.hash_algorithm.as_str())
			.bind(entry.created_at)
			.execute(&self.pool)
			.await?;

			if result.rows_affected() == 0 {
				return Err(Error::Conflict(format!(
					"Ledger entry {}/{} already exists.",
					entry.session_id, entry.message_id
				)));
			}

			Ok(())
		})
	}

	fn get<'a>(
		&'a self,
		session_id: &'a str,
		message_id: &'a str,
	) -> BoxFuture<'a, Result<Option<LedgerEntry>>> {
		Box::pin(async move {
			let row: Option<LedgerRow> = sqlx::query_as::<_, LedgerRow>(
				"\
SELECT
	session_id,
	message_id,
	trace,
	original_size,
	stored_size,
	is_truncated,
	trace_hash,
	hash_algorithm,
	created_at
FROM trace_ledger
WHERE session_id = $1 AND message_id = $2",
			)
			.bind(session_id)
			.bind(message_id)
			.fetch_optional(&self.pool)
			.await?;

			Ok(row.map(entry_from_row))
		})
	}

	fn list_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>> {
		Box::pin(async move {
			let rows: Vec<LedgerRow> = sqlx::query_as::<_, LedgerRow>(
				"\
SELECT
	session_id,
	message_id,
	trace,
	original_size,
	stored_size,
	is_truncated,
	trace_hash,
	hash_algorithm,
	created_at
FROM trace_ledger
WHERE session_id = $1
ORDER BY created_at ASC, message_id ASC",
			)
			.bind(session_id)
			.fetch_all(&self.pool)
			.await?;

			Ok(rows.into_iter().map(entry_from_row).collect())
		})
	}
}

fn entry_from_row(row: LedgerRow) -> LedgerEntry {
	let hash_algorithm = row.hash_algorithm.parse::<HashAlgorithm>().unwrap_or_else(|err| {
		tracing::warn!(error = %err, session_id = %row.session_id, "Unknown ledger hash algorithm.");

		HashAlgorithm::default()
	});

	LedgerEntry {
		session_id: row.session_id,
		message_id: row.message_id,
		trace: row.trace,
		original_size: usize::try_from(row.original_size).unwrap_or(0),
		stored_size: usize::try_from(row.stored_size).unwrap_or(0),
		is_truncated: row.is_truncated,
		trace_hash: row.trace_hash,
		hash_algorithm,
		created_at: row.created_at,
	}
}
