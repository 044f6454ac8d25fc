use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::{QuestionType, StageInput, StageOutput, execute, round4};
use crate::randomness::RandomnessSource;
use quire_domain::{RetrievalResult, Severity, StageName};

const SCORE_WEIGHT: f64 = 0.4;
const MATCH_BONUS_STEP: f64 = 0.05;
const MATCH_BONUS_CAP: f64 = 0.25;
const DETAILED_COMPLEXITY: f64 = 0.6;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
	Primary,
	Supporting,
	Background,
	Contradictory,
}
impl Bucket {
	pub const ALL: [Bucket; 4] =
		[Bucket::Primary, Bucket::Supporting, Bucket::Background, Bucket::Contradictory];

	fn for_priority(priority: f64) -> Self {
		if priority > 0.7 {
			Self::Primary
		} else if priority > 0.4 {
			Self::Supporting
		} else if priority > 0.2 {
			Self::Background
		} else {
			Self::Contradictory
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Primary => "primary",
			Self::Supporting => "supporting",
			Self::Background => "background",
			Self::Contradictory => "contradictory",
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
	Concise,
	Detailed,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RankedItem {
	pub id: String,
	/// Dense rank starting at 1; equal priorities share a rank.
	pub rank: u32,
	pub priority: f64,
	pub bucket: Bucket,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ResponseSection {
	pub name: String,
	pub bucket: Bucket,
	pub item_ids: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ResponseStructure {
	pub question_type: QuestionType,
	pub sections: Vec<ResponseSection>,
	pub format: ResponseFormat,
	pub total_sections: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct OrderOutput {
	pub ranking: Vec<RankedItem>,
	pub buckets: BTreeMap<Bucket, Vec<String>>,
	pub response_structure: ResponseStructure,
}
impl OrderOutput {
	/// Ranked ids outside the contradictory bucket, best first.
	pub fn selectable_ids(&self) -> impl Iterator<Item = &str> {
		self.ranking
			.iter()
			.filter(|item| item.bucket != Bucket::Contradictory)
			.map(|item| item.id.as_str())
	}
}

pub fn run(input: &StageInput<'_>, rng: &mut RandomnessSource) -> StageOutput<OrderOutput> {
	execute(StageName::Order, |notes| {
		if let Some(bad) = input.results.iter().find(|result| !result.score.is_finite()) {
			return Err(format!("Result {} has a non-finite relevance score.", bad.id));
		}

		let terms = input
			.context
			.entities(input.query)
			.into_iter()
			.chain(input.context.keywords(input.query))
			.map(|term| term.to_lowercase())
			.collect::<BTreeSet<_>>();
		// One tie-break key per result in input order keeps the stream position stable.
		let mut scored = input
			.results
			.iter()
			.map(|result| {
				let priority = priority(result, input, &terms);

				(result, priority, rng.numeric_key())
			})
			.collect::<Vec<_>>();

		scored.sort_by(|(_, a, a_key), (_, b, b_key)| b.total_cmp(a).then_with(|| a_key.cmp(b_key)));

		let mut ranking = Vec::with_capacity(scored.len());
		let mut rank = 0;
		let mut previous = None;

		for (result, priority, _) in scored {
			if previous != Some(priority) {
				rank += 1;
				previous = Some(priority);
			}

			ranking.push(RankedItem {
				id: result.id.clone(),
				rank,
				priority,
				bucket: Bucket::for_priority(priority),
			});
		}

		let mut buckets: BTreeMap<Bucket, Vec<String>> = BTreeMap::new();

		for item in &ranking {
			buckets.entry(item.bucket).or_default().push(item.id.clone());
		}

		let response_structure = response_structure(input, &buckets);

		if ranking.is_empty() {
			notes.warnings.push("Nothing to rank.".to_string());
		}

		notes.custom.insert("ranked".to_string(), Value::from(ranking.len()));

		Ok(OrderOutput { ranking, buckets, response_structure })
	})
}

fn priority(result: &RetrievalResult, input: &StageInput<'_>, terms: &BTreeSet<String>) -> f64 {
	let haystack = result.full_text().to_lowercase();
	let matches = terms.iter().filter(|term| haystack.contains(term.as_str())).count();
	let match_bonus = (MATCH_BONUS_STEP * matches as f64).min(MATCH_BONUS_CAP);
	let mut priority = SCORE_WEIGHT * result.score
		+ type_bonus(&result.result_type)
		+ recency_bonus(result.updated_at, input.context.as_of)
		+ match_bonus;

	match input.context.contrast.as_ref().and_then(|contrast| contrast.severity_for(&result.id)) {
		Some(Severity::High) => priority *= 0.3,
		Some(Severity::Medium) => priority *= 0.7,
		_ => {},
	}

	round4(priority.clamp(0.0, 1.0))
}

fn type_bonus(result_type: &str) -> f64 {
	match result_type {
		"fact" => 0.2,
		"document" => 0.15,
		"memory" | "note" => 0.1,
		"expanded" => 0.0,
		_ => 0.05,
	}
}

fn recency_bonus(updated_at: Option<OffsetDateTime>, as_of: OffsetDateTime) -> f64 {
	let Some(updated_at) = updated_at else {
		return 0.0;
	};
	let age_days = (as_of - updated_at).whole_days().max(0);

	match age_days {
		0..=30 => 0.15,
		31..=365 => 0.1,
		366..=1825 => 0.05,
		_ => 0.0,
	}
}

fn section_names(question_type: QuestionType) -> [&'static str; 3] {
	match question_type {
		QuestionType::What => ["definition", "details", "context"],
		QuestionType::How => ["steps", "details", "background"],
		QuestionType::Why => ["explanation", "evidence", "background"],
		QuestionType::When => ["timeline", "details", "context"],
		QuestionType::Where => ["location", "details", "context"],
		QuestionType::Who => ["profile", "details", "context"],
		QuestionType::Which => ["comparison", "details", "context"],
		QuestionType::Question | QuestionType::Statement =>
			["answer", "supporting_points", "context"],
	}
}

fn response_structure(
	input: &StageInput<'_>,
	buckets: &BTreeMap<Bucket, Vec<String>>,
) -> ResponseStructure {
	let (question_type, complexity) = match &input.context.observe {
		Some(observe) => (observe.features.question_type, observe.features.complexity),
		None => (QuestionType::classify(input.query), 0.0),
	};
	let names = section_names(question_type);
	let sections = Bucket::ALL
		.iter()
		.filter_map(|bucket| {
			let ids = buckets.get(bucket).filter(|ids| !ids.is_empty())?;
			let name = match bucket {
				Bucket::Primary => names[0],
				Bucket::Supporting => names[1],
				Bucket::Background => names[2],
				Bucket::Contradictory => "conflicting_evidence",
			};

			Some(ResponseSection { name: name.to_string(), bucket: *bucket, item_ids: ids.clone() })
		})
		.collect::<Vec<_>>();
	let format = if complexity > DETAILED_COMPLEXITY {
		ResponseFormat::Detailed
	} else {
		ResponseFormat::Concise
	};

	ResponseStructure { question_type, total_sections: sections.len(), sections, format }
}
