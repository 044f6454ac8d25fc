use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StageInput, StageOutput, execute, round4};
use crate::randomness::RandomnessSource;
use quire_domain::{RetrievalResult, StageName, text};

const MAX_CONCEPTS: usize = 20;
const MAX_SYNTHESIZED: usize = 5;
const MIN_SYNTHESIS_RELEVANCE: f64 = 0.7;
const SYNTHESIZED_SCORE_FACTOR: f64 = 0.5;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionQuality {
	Excellent,
	Good,
	Fair,
	Poor,
}
impl ExpansionQuality {
	fn from_ratio(ratio: f64) -> Self {
		if ratio >= 0.5 {
			Self::Excellent
		} else if ratio >= 0.25 {
			Self::Good
		} else if ratio > 0.0 {
			Self::Fair
		} else {
			Self::Poor
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Excellent => "excellent",
			Self::Good => "good",
			Self::Fair => "fair",
			Self::Poor => "poor",
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Concept {
	pub text: String,
	/// Number of results mentioning the concept.
	pub frequency: u32,
	/// Highest score among the results mentioning the concept.
	pub relevance: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ExpandOutput {
	pub concepts: Vec<Concept>,
	/// Originals followed by synthesized results.
	pub expanded_results: Vec<RetrievalResult>,
	pub original_count: usize,
	pub expanded_count: usize,
	pub coverage_gaps: Vec<String>,
	pub quality: ExpansionQuality,
}
impl ExpandOutput {
	pub fn synthesized_count(&self) -> usize {
		self.expanded_count - self.original_count
	}
}

struct ConceptStats {
	frequency: u32,
	relevance: f64,
	origin_id: String,
}

pub fn run(input: &StageInput<'_>, rng: &mut RandomnessSource) -> StageOutput<ExpandOutput> {
	execute(StageName::Expand, |notes| {
		let stats = concept_stats(input.results);
		let mut ranked = stats.into_iter().collect::<Vec<_>>();

		ranked.sort_by(|(a_text, a), (b_text, b)| {
			b.relevance
				.total_cmp(&a.relevance)
				.then_with(|| b.frequency.cmp(&a.frequency))
				.then_with(|| a_text.cmp(b_text))
		});
		ranked.truncate(MAX_CONCEPTS);

		let titles = input
			.results
			.iter()
			.filter_map(|result| result.title.as_deref())
			.map(str::to_lowercase)
			.collect::<BTreeSet<_>>();
		let mut expanded_results = input.results.to_vec();

		for (concept, stat) in &ranked {
			if expanded_results.len() - input.results.len() >= MAX_SYNTHESIZED {
				break;
			}
			if stat.relevance < MIN_SYNTHESIS_RELEVANCE || titles.contains(&concept.to_lowercase())
			{
				continue;
			}

			let mut synthesized = RetrievalResult::new(
				format!("expanded-{}", rng.next_hex()),
				round4(stat.relevance * SYNTHESIZED_SCORE_FACTOR),
				format!("Related concept: {concept}"),
			)
			.with_type("expanded")
			.with_source("expansion")
			.with_title(concept.clone());

			synthesized
				.metadata
				.insert("origin_id".to_string(), Value::String(stat.origin_id.clone()));
			expanded_results.push(synthesized);
		}

		let coverage_gaps = coverage_gaps(input);
		let original_count = input.results.len();
		let synthesized = expanded_results.len() - original_count;
		let quality =
			ExpansionQuality::from_ratio(synthesized as f64 / original_count.max(1) as f64);

		if !coverage_gaps.is_empty() {
			notes.warnings.push(format!("{} query terms are not covered.", coverage_gaps.len()));
		}

		notes.custom.insert("synthesized".to_string(), Value::from(synthesized));

		Ok(ExpandOutput {
			concepts: ranked
				.into_iter()
				.map(|(text, stat)| Concept {
					text,
					frequency: stat.frequency,
					relevance: stat.relevance,
				})
				.collect(),
			expanded_count: expanded_results.len(),
			expanded_results,
			original_count,
			coverage_gaps,
			quality,
		})
	})
}

fn concept_stats(results: &[RetrievalResult]) -> BTreeMap<String, ConceptStats> {
	let mut stats: BTreeMap<String, ConceptStats> = BTreeMap::new();

	for result in results {
		let mut mentioned = text::capitalized_ngrams(result.title.as_deref().unwrap_or_default(), 3);

		mentioned.extend(text::capitalized_ngrams(&result.text, 3));

		let mentioned = mentioned.into_iter().collect::<BTreeSet<_>>();

		for concept in mentioned {
			let entry = stats.entry(concept).or_insert_with(|| ConceptStats {
				frequency: 0,
				relevance: result.score,
				origin_id: result.id.clone(),
			});

			entry.frequency += 1;

			if result.score > entry.relevance {
				entry.relevance = result.score;
				entry.origin_id = result.id.clone();
			}
		}
	}

	stats
}

/// Query terms that no result title or text mentions, case-insensitively.
fn coverage_gaps(input: &StageInput<'_>) -> Vec<String> {
	let corpus = input
		.results
		.iter()
		.map(|result| result.full_text().to_lowercase())
		.collect::<Vec<_>>()
		.join("\n");
	let mut seen = BTreeSet::new();
	let mut gaps = Vec::new();
	let terms = input
		.context
		.entities(input.query)
		.into_iter()
		.chain(input.context.keywords(input.query));

	for term in terms {
		let lowered = term.to_lowercase();

		if !corpus.contains(&lowered) && seen.insert(lowered.clone()) {
			gaps.push(lowered);
		}
	}

	gaps
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pipeline::PipelineContext;
	use time::OffsetDateTime;

	fn expand(query: &str, results: &[RetrievalResult], seed: u64) -> ExpandOutput {
		let context = PipelineContext::new(OffsetDateTime::UNIX_EPOCH);
		let mut rng = RandomnessSource::from_seed(seed);
		let output = run(&StageInput { query, context: &context, results }, &mut rng);

		output.value().cloned().expect("Expand must succeed.")
	}

	fn corpus() -> Vec<RetrievalResult> {
		vec![
			RetrievalResult::new("a", 0.9, "The Eiffel Tower stands in Paris.").with_title("Paris"),
			RetrievalResult::new("b", 0.6, "Paris hosts the Louvre Museum."),
		]
	}

	#[test]
	fn empty_input_keeps_counts_consistent() {
		let output = expand("What is the capital of France?", &[], 1);

		assert_eq!(output.original_count, 0);
		assert!(output.expanded_count >= output.original_count);
		assert_eq!(output.quality, ExpansionQuality::Poor);
		assert_eq!(output.coverage_gaps, vec!["france".to_string(), "capital".to_string()]);
	}

	#[test]
	fn synthesizes_high_relevance_concepts_only() {
		let output = expand("Tell me about Paris", &corpus(), 7);
		let synthesized = &output.expanded_results[output.original_count..];

		assert!(!synthesized.is_empty());
		assert!(synthesized.len() <= MAX_SYNTHESIZED);

		for result in synthesized {
			assert!(result.id.starts_with("expanded-"));
			assert_eq!(result.id.len(), "expanded-".len() + 16);
			assert_eq!(result.result_type, "expanded");
			assert_eq!(result.metadata["origin_id"], "a");
			assert_eq!(result.score, 0.45);
			// Existing titles are never re-synthesized.
			assert_ne!(result.title.as_deref(), Some("Paris"));
		}

		let louvre = output
			.concepts
			.iter()
			.find(|concept| concept.text == "Louvre Museum")
			.expect("Concept must be detected.");

		assert_eq!(louvre.frequency, 1);
		assert_eq!(louvre.relevance, 0.6);

		let paris = output.concepts.iter().find(|concept| concept.text == "Paris");

		assert_eq!(paris.map(|concept| concept.frequency), Some(2));
	}

	#[test]
	fn synthesized_ids_follow_the_seed() {
		let first = expand("Paris", &corpus(), 11);
		let again = expand("Paris", &corpus(), 11);
		let other = expand("Paris", &corpus(), 12);

		assert_eq!(first, again);
		assert_ne!(first.expanded_results.last(), other.expanded_results.last());
	}
}
