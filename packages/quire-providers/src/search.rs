use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{Error, Result};
use quire_domain::RetrievalResult;

/// Queries the vector index with a precomputed embedding.
pub async fn search(
	cfg: &quire_config::SearchProviderConfig,
	vector: &[f32],
	limit: u32,
) -> Result<Vec<RetrievalResult>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"collection": cfg.collection,
		"vector": vector,
		"limit": limit,
		"with_payload": true,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_search_response(json)
}

fn parse_search_response(json: Value) -> Result<Vec<RetrievalResult>> {
	let hits = json
		.get("results")
		.or_else(|| json.get("result"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Search response is missing results array.".to_string(),
		})?;
	let mut out = Vec::with_capacity(hits.len());

	for hit in hits {
		let id = match hit.get("id") {
			Some(Value::String(id)) => id.clone(),
			Some(Value::Number(id)) => id.to_string(),
			_ =>
				return Err(Error::InvalidResponse {
					message: "Search hit is missing an id.".to_string(),
				}),
		};
		let score = hit.get("score").and_then(|v| v.as_f64()).ok_or_else(|| {
			Error::InvalidResponse { message: format!("Search hit {id} is missing a score.") }
		})?;
		let mut payload = hit.get("payload").and_then(|v| v.as_object()).cloned().unwrap_or_default();
		let result_type = take_string(&mut payload, "type").unwrap_or_else(|| "document".to_string());
		let source = take_string(&mut payload, "source").unwrap_or_default();
		let title = take_string(&mut payload, "title");
		let text = take_string(&mut payload, "text").unwrap_or_default();
		let updated_at = take_string(&mut payload, "updated_at")
			.and_then(|raw| OffsetDateTime::parse(&raw, &Rfc3339).ok());

		out.push(RetrievalResult {
			id,
			score,
			result_type,
			source,
			title,
			text,
			updated_at,
			metadata: payload,
		});
	}

	Ok(out)
}

fn take_string(payload: &mut Map<String, Value>, key: &str) -> Option<String> {
	match payload.remove(key) {
		Some(Value::String(value)) => Some(value),
		Some(other) => {
			payload.insert(key.to_string(), other);

			None
		},
		None => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_hits_and_keeps_extra_payload_as_metadata() {
		let json = serde_json::json!({
			"results": [
				{
					"id": "doc-1",
					"score": 0.82,
					"payload": {
						"type": "fact",
						"source": "wiki",
						"title": "Paris",
						"text": "Paris is the capital of France.",
						"updated_at": "2024-05-01T00:00:00Z",
						"lang": "en"
					}
				},
				{ "id": 7, "score": 0.1 }
			]
		});
		let parsed = parse_search_response(json).expect("parse failed");

		assert_eq!(parsed.len(), 2);
		assert_eq!(parsed[0].result_type, "fact");
		assert_eq!(parsed[0].title.as_deref(), Some("Paris"));
		assert!(parsed[0].updated_at.is_some());
		assert_eq!(parsed[0].metadata.get("lang"), Some(&Value::String("en".to_string())));
		assert_eq!(parsed[1].id, "7");
		assert_eq!(parsed[1].result_type, "document");
	}

	#[test]
	fn missing_results_is_an_error() {
		assert!(parse_search_response(serde_json::json!({ "data": [] })).is_err());
	}
}
