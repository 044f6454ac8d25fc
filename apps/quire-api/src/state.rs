use std::sync::Arc;

use quire_service::{Collaborators, QuireService};
use quire_storage::{db::Db, graph::PgGraphAdapter, ledger::PgLedgerStore};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<QuireService>,
}
impl AppState {
	/// Uses the Postgres ledger and graph when `storage.postgres` is set, in-process stores
	/// otherwise.
	pub async fn new(config: quire_config::Config) -> color_eyre::Result<Self> {
		let mut collaborators = Collaborators::from_config(&config);

		if let Some(postgres) = &config.storage.postgres {
			let db = Db::connect(postgres).await?;

			db.ensure_schema().await?;

			collaborators =
				collaborators.with_ledger_store(Arc::new(PgLedgerStore::new(db.pool.clone())));

			if config.graph.enabled {
				let graph = PgGraphAdapter::load(db.pool.clone()).await?;

				collaborators = collaborators.with_graph(Arc::new(graph));
			}
		}

		Ok(Self::from_service(QuireService::new(config, collaborators)))
	}

	pub fn from_service(service: QuireService) -> Self {
		Self { service: Arc::new(service) }
	}
}
