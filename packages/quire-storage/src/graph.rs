use std::collections::BTreeMap;

use sqlx::PgPool;

use crate::{
	BoxFuture, Result,
	models::{MemoryRow, RelationRow},
};
use quire_domain::{GraphMemory, GraphRelation};

/// Read access to the entity graph used for neighborhood expansion.
pub trait GraphAdapter
where
	Self: Send + Sync,
{
	fn entity_relations<'a>(
		&'a self,
		entity_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<GraphRelation>>>;

	fn entity_memories<'a>(
		&'a self,
		entity_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<GraphMemory>>>;

	/// Numeric clearance for a role, when the backing store tracks levels.
	fn role_level(&self, _role: &str) -> Option<u8> {
		None
	}
}

/// Static in-process graph, used when no database is configured and by tests.
#[derive(Default)]
pub struct MemoryGraphAdapter {
	relations: BTreeMap<String, Vec<GraphRelation>>,
	memories: BTreeMap<String, Vec<GraphMemory>>,
	role_levels: BTreeMap<String, u8>,
}
impl MemoryGraphAdapter {
	pub fn with_relation(
		mut self,
		source_id: &str,
		relation_type: &str,
		target_id: &str,
		weight: f64,
	) -> Self {
		self.relations.entry(source_id.to_string()).or_default().push(GraphRelation {
			source_id: source_id.to_string(),
			relation_type: relation_type.to_string(),
			target_id: target_id.to_string(),
			weight,
			depth: 0,
		});

		self
	}

	pub fn with_memory(mut self, entity_id: &str, memory: GraphMemory) -> Self {
		self.memories.entry(entity_id.to_string()).or_default().push(memory);

		self
	}

	pub fn with_role_level(mut self, role: &str, level: u8) -> Self {
		self.role_levels.insert(role.to_string(), level);

		self
	}
}
impl GraphAdapter for MemoryGraphAdapter {
	fn entity_relations<'a>(
		&'a self,
		entity_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<GraphRelation>>> {
		Box::pin(async move {
			Ok(self
				.relations
				.get(entity_id)
				.map(|relations| relations.iter().take(limit as usize).cloned().collect())
				.unwrap_or_default())
		})
	}

	fn entity_memories<'a>(
		&'a self,
		entity_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<GraphMemory>>> {
		Box::pin(async move {
			Ok(self
				.memories
				.get(entity_id)
				.map(|memories| memories.iter().take(limit as usize).cloned().collect())
				.unwrap_or_default())
		})
	}

	fn role_level(&self, role: &str) -> Option<u8> {
		self.role_levels.get(role).copied()
	}
}

pub struct PgGraphAdapter {
	pool: PgPool,
	role_levels: BTreeMap<String, u8>,
}
impl PgGraphAdapter {
	/// Loads role levels once; relations and memories are read per call.
	pub async fn load(pool: PgPool) -> Result<Self> {
		let rows: Vec<(String, i16)> =
			sqlx::query_as("SELECT role, level FROM graph_role_levels").fetch_all(&pool).await?;
		let role_levels = rows
			.into_iter()
			.filter_map(|(role, level)| u8::try_from(level).ok().map(|level| (role, level)))
			.collect();

		Ok(Self { pool, role_levels })
	}
}
impl GraphAdapter for PgGraphAdapter {
	fn entity_relations<'a>(
		&'a self,
		entity_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<GraphRelation>>> {
		Box::pin(async move {
			let rows: Vec<RelationRow> = sqlx::query_as::<_, RelationRow>(
				"\
SELECT
	source_id,
	relation_type,
	target_id,
	weight
FROM graph_relations
WHERE source_id = $1
ORDER BY weight DESC, relation_type ASC, target_id ASC
LIMIT $2",
			)
			.bind(entity_id)
			.bind(i64::from(limit))
			.fetch_all(&self.pool)
			.await?;

			Ok(rows
				.into_iter()
				.map(|row| GraphRelation {
					source_id: row.source_id,
					relation_type: row.relation_type,
					target_id: row.target_id,
					weight: f64::from(row.weight),
					depth: 0,
				})
				.collect())
		})
	}

	fn entity_memories<'a>(
		&'a self,
		entity_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<GraphMemory>>> {
		Box::pin(async move {
			let rows: Vec<MemoryRow> = sqlx::query_as::<_, MemoryRow>(
				"\
SELECT
	memory_id,
	title,
	content,
	role_view_level,
	role_view
FROM graph_memories
WHERE entity_id = $1
ORDER BY updated_at DESC, memory_id ASC
LIMIT $2",
			)
			.bind(entity_id)
			.bind(i64::from(limit))
			.fetch_all(&self.pool)
			.await?;

			Ok(rows
				.into_iter()
				.map(|row| GraphMemory {
					id: row.memory_id,
					title: row.title,
					content: row.content,
					role_view_level: row.role_view_level.and_then(|level| u8::try_from(level).ok()),
					role_view: row.role_view,
				})
				.collect())
		})
	}

	fn role_level(&self, role: &str) -> Option<u8> {
		self.role_levels.get(role).copied()
	}
}
