use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::{StageInput, StageOutput, execute, round4};
use quire_domain::{StageName, text};

const COMPLEXITY_PATTERNS: [&str; 9] = [
	" and ",
	" or ",
	"compare",
	"difference",
	" vs",
	"versus",
	"because",
	"relationship",
	"impact",
];

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
	What,
	How,
	Why,
	When,
	Where,
	Who,
	Which,
	Question,
	Statement,
}
impl QuestionType {
	pub fn classify(query: &str) -> Self {
		let lowered = query.trim().to_lowercase();
		let first = lowered.split_whitespace().next().unwrap_or_default();
		let by_prefix = match first.trim_end_matches(|c: char| !c.is_alphanumeric()) {
			"what" => Some(Self::What),
			"how" => Some(Self::How),
			"why" => Some(Self::Why),
			"when" => Some(Self::When),
			"where" => Some(Self::Where),
			"who" => Some(Self::Who),
			"which" => Some(Self::Which),
			_ => None,
		};

		match by_prefix {
			Some(kind) => kind,
			None if lowered.ends_with('?') => Self::Question,
			None => Self::Statement,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::What => "what",
			Self::How => "how",
			Self::Why => "why",
			Self::When => "when",
			Self::Where => "where",
			Self::Who => "who",
			Self::Which => "which",
			Self::Question => "question",
			Self::Statement => "statement",
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct QueryFeatures {
	pub length: usize,
	pub token_count: usize,
	pub complexity: f64,
	pub question_type: QuestionType,
	pub entities: Vec<String>,
	pub keywords: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RetrievalQuality {
	pub count: usize,
	pub mean_relevance: f64,
	pub max_relevance: f64,
	pub min_relevance: f64,
	pub source_types: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ObserveOutput {
	pub features: QueryFeatures,
	pub quality: RetrievalQuality,
	pub intent_confidence: f64,
}

pub fn run(input: &StageInput<'_>) -> StageOutput<ObserveOutput> {
	execute(StageName::Observe, |notes| {
		let features = query_features(input.query);
		let quality = retrieval_quality(input)?;
		let intent_confidence = intent_confidence(&features, &quality);

		if quality.count == 0 {
			notes.warnings.push("No retrieval results to observe.".to_string());
		}

		notes.tokens_processed = Some(features.token_count as u64);

		Ok(ObserveOutput { features, quality, intent_confidence })
	})
}

pub fn query_features(query: &str) -> QueryFeatures {
	let tokens = text::tokens(query);
	let lowered_tokens = tokens.iter().map(|token| token.to_lowercase()).collect::<Vec<_>>();
	let unique = lowered_tokens.iter().collect::<HashSet<_>>().len();

	QueryFeatures {
		length: query.chars().count(),
		token_count: tokens.len(),
		complexity: complexity(query, &lowered_tokens, unique),
		question_type: QuestionType::classify(query),
		entities: text::capitalized_terms(query),
		keywords: text::keywords(query),
	}
}

fn complexity(query: &str, lowered_tokens: &[String], unique: usize) -> f64 {
	let lowered = query.to_lowercase();
	let length_part = 0.3 * (query.chars().count() as f64 / 200.0).min(1.0);
	let unique_part = if lowered_tokens.is_empty() {
		0.0
	} else {
		0.3 * unique as f64 / lowered_tokens.len() as f64
	};
	let hits = COMPLEXITY_PATTERNS.iter().filter(|pattern| lowered.contains(*pattern)).count();
	let pattern_part = (0.1 * hits as f64).min(0.2);
	let has_question_word =
		lowered_tokens.iter().any(|token| text::QUESTION_WORDS.contains(&token.as_str()));
	let question_part = if has_question_word { 0.2 } else { 0.0 };

	round4((length_part + unique_part + pattern_part + question_part).clamp(0.0, 1.0))
}

fn retrieval_quality(input: &StageInput<'_>) -> Result<RetrievalQuality, String> {
	if let Some(bad) = input.results.iter().find(|result| !result.score.is_finite()) {
		return Err(format!("Result {} has a non-finite relevance score.", bad.id));
	}
	if input.results.is_empty() {
		return Ok(RetrievalQuality::default());
	}

	let scores = input.results.iter().map(|result| result.score).collect::<Vec<_>>();
	let sum: f64 = scores.iter().sum();
	let source_types = input
		.results
		.iter()
		.map(|result| result.result_type.clone())
		.collect::<BTreeSet<_>>()
		.into_iter()
		.collect();

	Ok(RetrievalQuality {
		count: scores.len(),
		mean_relevance: round4(sum / scores.len() as f64),
		max_relevance: scores.iter().copied().fold(f64::MIN, f64::max),
		min_relevance: scores.iter().copied().fold(f64::MAX, f64::min),
		source_types,
	})
}

fn intent_confidence(features: &QueryFeatures, quality: &RetrievalQuality) -> f64 {
	let mut confidence = 0.5;

	if quality.count == 0 {
		confidence -= 0.1;
	} else if quality.mean_relevance >= 0.7 {
		confidence += 0.2;
	} else if quality.mean_relevance >= 0.4 {
		confidence += 0.1;
	} else {
		confidence -= 0.1;
	}

	if features.complexity > 0.7 {
		confidence -= 0.1;
	} else if features.complexity < 0.3 {
		confidence += 0.1;
	}
	if features.question_type != QuestionType::Statement {
		confidence += 0.1;
	}

	round4(f64::clamp(confidence, 0.0, 1.0))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pipeline::PipelineContext;
	use quire_domain::RetrievalResult;
	use time::OffsetDateTime;

	fn observe(query: &str, results: &[RetrievalResult]) -> StageOutput<ObserveOutput> {
		let context = PipelineContext::new(OffsetDateTime::UNIX_EPOCH);

		run(&StageInput { query, context: &context, results })
	}

	#[test]
	fn classifies_questions_by_prefix() {
		assert_eq!(QuestionType::classify("What is Rust?"), QuestionType::What);
		assert_eq!(QuestionType::classify("how, exactly"), QuestionType::How);
		assert_eq!(QuestionType::classify("Is Rust fast?"), QuestionType::Question);
		assert_eq!(QuestionType::classify("Rust is fast."), QuestionType::Statement);
	}

	#[test]
	fn extracts_entities_and_keywords() {
		let features = query_features("What is the capital of France?");

		assert_eq!(features.entities, vec!["France".to_string()]);
		assert_eq!(features.keywords, vec!["capital".to_string(), "france".to_string()]);
		assert_eq!(features.token_count, 6);
		assert!((0.0..=1.0).contains(&features.complexity));
	}

	#[test]
	fn comparison_queries_score_more_complex() {
		let simple = query_features("Rust");
		let compound = query_features("Compare Rust and Go because of their impact on latency");

		assert!(compound.complexity > simple.complexity);
	}

	#[test]
	fn confidence_rises_with_strong_results() {
		let strong = vec![
			RetrievalResult::new("a", 0.9, "Paris is the capital of France."),
			RetrievalResult::new("b", 0.8, "France borders Spain.").with_type("fact"),
		];
		let weak = observe("What is the capital of France?", &[])
			.value()
			.map(|out| out.intent_confidence)
			.expect("Observe must succeed.");
		let output = observe("What is the capital of France?", &strong);
		let observed = output.value().expect("Observe must succeed.");

		assert!(observed.intent_confidence > weak);
		assert_eq!(observed.quality.count, 2);
		assert_eq!(observed.quality.source_types, vec!["document".to_string(), "fact".to_string()]);
	}

	#[test]
	fn non_finite_scores_fail_the_stage() {
		let results = vec![RetrievalResult::new("nan", f64::NAN, "broken")];
		let output = observe("What?", &results);

		assert!(output.error().is_some_and(|error| error.contains("nan")));
	}
}
