use crate::{BoxFuture, Error, Result};
use quire_domain::RetrievalResult;

/// Candidate source for a query. Implementations return at most `limit` results.
pub trait Retriever
where
	Self: Send + Sync,
{
	fn retrieve<'a>(
		&'a self,
		query: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<RetrievalResult>>>;
}

/// Embeds the query and runs a vector search against the configured providers.
pub struct HttpRetriever {
	providers: quire_config::Providers,
}
impl HttpRetriever {
	pub fn new(providers: quire_config::Providers) -> Self {
		Self { providers }
	}
}
impl Retriever for HttpRetriever {
	fn retrieve<'a>(
		&'a self,
		query: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<RetrievalResult>>> {
		Box::pin(async move {
			let vectors =
				quire_providers::embedding::embed(&self.providers.embedding, &[query.to_string()])
					.await?;
			let Some(vector) = vectors.into_iter().next() else {
				return Err(Error::Provider {
					message: "Embedding provider returned no vectors.".to_string(),
				});
			};
			let mut results =
				quire_providers::search::search(&self.providers.search, &vector, limit).await?;

			results.truncate(limit as usize);

			Ok(results)
		})
	}
}

/// Serves a fixed result list, best score first. Used when no providers are configured.
#[derive(Clone, Debug, Default)]
pub struct StaticRetriever {
	results: Vec<RetrievalResult>,
}
impl StaticRetriever {
	pub fn new(results: Vec<RetrievalResult>) -> Self {
		Self { results }
	}
}
impl Retriever for StaticRetriever {
	fn retrieve<'a>(
		&'a self,
		_query: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<RetrievalResult>>> {
		Box::pin(async move {
			let mut results = self.results.clone();

			results.sort_by(|a, b| b.score.total_cmp(&a.score));
			results.truncate(limit as usize);

			Ok(results)
		})
	}
}
