//! Naive lexical heuristics shared by the pipeline stages.
//!
//! These rules are intentionally simple. Their exact behavior is part of the replay contract, so
//! changing them changes trace hashes.

use std::{
	collections::{BTreeSet, HashSet},
	sync::LazyLock,
};

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

pub const STOP_WORDS: &[&str] = &[
	"a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
	"been", "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had",
	"has", "have", "he", "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "may",
	"me", "more", "most", "my", "no", "not", "of", "on", "only", "or", "our", "she", "should",
	"so", "some", "such", "than", "that", "the", "their", "them", "then", "there", "these",
	"they", "this", "those", "to", "was", "we", "were", "what", "when", "where", "which", "who",
	"whom", "why", "will", "with", "would", "you", "your",
];

pub const QUESTION_WORDS: &[&str] = &["what", "how", "why", "when", "where", "who", "which"];

/// Units recognized for numeric comparison; `percent` folds into `%`.
pub const NUMERIC_UNITS: &[&str] =
	&["%", "percent", "million", "billion", "thousand", "km", "kg", "miles", "users", "years"];

static STOP_WORD_SET: LazyLock<HashSet<&'static str>> =
	LazyLock::new(|| STOP_WORDS.iter().copied().collect());
static YEAR_RE: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"\b(1[5-9]\d{2}|20\d{2})\b").ok());
static NUMBER_UNIT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
	Regex::new(
		r"(?i)(\d[\d,]*(?:\.\d+)?)\s*(%|(?:percent|million|billion|thousand|km|kg|miles|users|years)\b)",
	)
	.ok()
});

pub fn is_stop_word(word: &str) -> bool {
	STOP_WORD_SET.contains(word.to_lowercase().as_str())
}

pub fn is_capitalized(word: &str) -> bool {
	word.chars().next().map(char::is_uppercase).unwrap_or(false)
}

pub fn tokens(text: &str) -> Vec<&str> {
	text.unicode_words().collect()
}

/// Capitalized tokens that are not stop words, deduplicated in first-seen order.
pub fn capitalized_terms(text: &str) -> Vec<String> {
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for token in text.unicode_words() {
		if !is_capitalized(token) || is_stop_word(token) {
			continue;
		}
		if seen.insert(token.to_string()) {
			out.push(token.to_string());
		}
	}

	out
}

/// Lowercased tokens longer than two characters that are not stop words, first-seen order.
pub fn keywords(text: &str) -> Vec<String> {
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for token in text.unicode_words() {
		let lowered = token.to_lowercase();

		if lowered.chars().count() <= 2 || is_stop_word(&lowered) {
			continue;
		}
		if seen.insert(lowered.clone()) {
			out.push(lowered);
		}
	}

	out
}

/// Every 1..=`max_n` word window inside runs of capitalized, non-stop-word tokens. Punctuation
/// breaks a run; whitespace does not.
pub fn capitalized_ngrams(text: &str, max_n: usize) -> Vec<String> {
	let mut runs: Vec<Vec<&str>> = Vec::new();
	let mut current: Vec<&str> = Vec::new();

	for segment in text.split_word_bounds() {
		if segment.chars().all(char::is_whitespace) {
			continue;
		}
		if is_capitalized(segment) && !is_stop_word(segment) {
			current.push(segment);

			continue;
		}
		if !current.is_empty() {
			runs.push(std::mem::take(&mut current));
		}
	}
	if !current.is_empty() {
		runs.push(current);
	}

	let mut out = Vec::new();

	for run in runs {
		for n in 1..=max_n.max(1) {
			for window in run.windows(n) {
				out.push(window.join(" "));
			}
		}
	}

	out
}

pub fn years(text: &str) -> BTreeSet<u32> {
	let Some(re) = YEAR_RE.as_ref() else {
		return BTreeSet::new();
	};

	re.captures_iter(text)
		.filter_map(|caps| caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()))
		.collect()
}

/// Numbers followed by a recognized unit, as `(value, unit)` with the unit normalized.
pub fn numbers_with_units(text: &str) -> Vec<(f64, String)> {
	let Some(re) = NUMBER_UNIT_RE.as_ref() else {
		return Vec::new();
	};
	let mut out = Vec::new();

	for caps in re.captures_iter(text) {
		let (Some(raw_value), Some(raw_unit)) = (caps.get(1), caps.get(2)) else {
			continue;
		};
		let Ok(value) = raw_value.as_str().replace(',', "").parse::<f64>() else {
			continue;
		};
		let unit = match raw_unit.as_str().to_lowercase().as_str() {
			"percent" => "%".to_string(),
			other => other.to_string(),
		};

		out.push((value, unit));
	}

	out
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
	if text.chars().count() <= max_chars {
		return text.to_string();
	}

	let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();

	out.push_str("...");

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn capitalized_terms_skip_stop_words_and_duplicates() {
		let terms = capitalized_terms("What is Paris? Paris is in France and The Seine runs.");

		assert_eq!(terms, vec!["Paris", "France", "Seine"]);
	}

	#[test]
	fn keywords_drop_short_and_stop_words() {
		let words = keywords("What is the capital of France?");

		assert_eq!(words, vec!["capital", "france"]);
	}

	#[test]
	fn ngrams_break_on_punctuation() {
		let grams = capitalized_ngrams("New York City. Boston is near", 3);

		assert!(grams.contains(&"New York City".to_string()));
		assert!(grams.contains(&"Boston".to_string()));
		assert!(!grams.iter().any(|gram| gram.contains("City Boston")));
	}

	#[test]
	fn years_and_units_are_extracted() {
		assert_eq!(years("Built in 1889, renovated 2004.").into_iter().collect::<Vec<_>>(), vec![
			1889, 2004
		]);

		let numbers = numbers_with_units("Adoption grew to 45 percent and 1,200 users in 3 km.");

		assert_eq!(numbers, vec![
			(45.0, "%".to_string()),
			(1200.0, "users".to_string()),
			(3.0, "km".to_string())
		]);
	}

	#[test]
	fn truncate_keeps_short_text() {
		assert_eq!(truncate_chars("short", 10), "short");
		assert_eq!(truncate_chars("abcdefghijkl", 8), "abcde...");
	}
}
