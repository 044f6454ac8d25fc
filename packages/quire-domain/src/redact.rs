use std::sync::LazyLock;

use regex::Regex;

// Applied in order; code and quotes first so their contents are not partially rewritten.
const PII_PATTERNS: [(&str, &str); 6] = [
	(r"(?s)```.*?```", "[code]"),
	(r#""[^"\n]{40,}""#, "[quote]"),
	(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b", "[email]"),
	(r"\b\d{3}-\d{2}-\d{4}\b", "[ssn]"),
	(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b", "[ip]"),
	(r"(?:\+?\d{1,2}[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b", "[phone]"),
];

static COMPILED: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
	PII_PATTERNS
		.iter()
		.filter_map(|(pattern, label)| Regex::new(pattern).ok().map(|re| (re, *label)))
		.collect()
});

/// Replaces emails, phone numbers, SSN-like ids, IPv4 addresses, long quotes, and fenced code.
pub fn redact_pii(text: &str) -> String {
	let mut out = text.to_string();

	for (re, label) in COMPILED.iter() {
		if re.is_match(&out) {
			out = re.replace_all(&out, *label).into_owned();
		}
	}

	out
}

pub fn contains_pii(text: &str) -> bool {
	COMPILED.iter().any(|(re, _)| re.is_match(text))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn redacts_contact_details() {
		let text = "Mail jane.doe@example.com or call (555) 123-4567 from 10.0.0.12.";
		let redacted = redact_pii(text);

		assert_eq!(redacted, "Mail [email] or call [phone] from [ip].");
	}

	#[test]
	fn redacts_ssn_before_phone() {
		assert_eq!(redact_pii("SSN 123-45-6789 on file"), "SSN [ssn] on file");
	}

	#[test]
	fn redacts_long_quotes_and_code() {
		let text = "He said \"this sentence is long enough to count as a raw source quote\" and ```let x = 1;```";
		let redacted = redact_pii(text);

		assert_eq!(redacted, "He said [quote] and [code]");
		assert!(!contains_pii(&redacted));
	}

	#[test]
	fn leaves_plain_text_alone() {
		let text = "What is the capital of France?";

		assert_eq!(redact_pii(text), text);
		assert!(!contains_pii(text));
	}
}
