use serde_json::json;

use quire_domain::{
	Claim, Contradiction, ContradictionKind, GraphExpansionResult, HashAlgorithm, QueryContext,
	RetrievalResult, Severity, StageName, TruncationReason,
};

#[test]
fn stage_names_serialize_in_snake_case_and_pipeline_order() {
	let names = serde_json::to_value(StageName::ALL).expect("Failed to serialize stage names.");

	assert_eq!(names, json!(["observe", "expand", "contrast", "order"]));
}

#[test]
fn contradiction_uses_type_tag() {
	let contradiction = Contradiction {
		kind: ContradictionKind::Factual,
		subject: "Rust".to_string(),
		claim_a: Claim { text: "Rust is fully supported.".to_string(), source_id: "a".to_string() },
		claim_b: Claim { text: "Rust is only allowed.".to_string(), source_id: "b".to_string() },
		severity: Severity::High,
		confidence: 0.8,
	};
	let value = serde_json::to_value(&contradiction).expect("Failed to serialize contradiction.");

	assert_eq!(value["type"], "factual");
	assert_eq!(value["severity"], "high");
	assert_eq!(contradiction.label(), "factual_contradiction");
	assert!(contradiction.involves("b"));
	assert!(!contradiction.involves("c"));
}

#[test]
fn retrieval_result_defaults_type_when_missing() {
	let result: RetrievalResult =
		serde_json::from_value(json!({ "id": "doc-1", "score": 0.4, "text": "Body" }))
			.expect("Failed to decode retrieval result.");

	assert_eq!(result.result_type, "document");
	assert_eq!(result.full_text(), "Body");
	assert_eq!(result.clone().with_title("Title").full_text(), "Title. Body");
}

#[test]
fn first_truncation_reason_wins() {
	let mut result = GraphExpansionResult::default();

	result.mark_truncated(TruncationReason::NodeBudgetExceeded);
	result.mark_truncated(TruncationReason::TimeoutAfterMemories);

	assert!(result.truncated);
	assert_eq!(result.truncation_reason, Some(TruncationReason::NodeBudgetExceeded));
	assert!(result.exceeded.nodes);
	assert!(result.exceeded.time);
	assert!(!result.exceeded.error);

	let value = serde_json::to_value(&result).expect("Failed to serialize expansion result.");

	assert_eq!(value["truncation_reason"], "node_budget_exceeded");
}

#[test]
fn error_reasons_carry_their_message() {
	let reason = TruncationReason::Error("adapter offline".to_string());

	assert_eq!(reason.as_label(), "error: adapter offline");
	assert_eq!(reason.metric_key(), "error");
}

#[test]
fn hash_algorithm_parses_case_insensitively() {
	assert_eq!("SHA256".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Sha256));
	assert_eq!("blake3".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Blake3));
	assert_eq!(" Md5 ".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Md5));
	assert!("sha1".parse::<HashAlgorithm>().is_err());
}

#[test]
fn query_context_defaults_role_to_general() {
	let ctx = QueryContext::new("What is Rust?");

	assert_eq!(ctx.role_or_default(), "general");
	assert_eq!(ctx.clone().with_role("ops").role_or_default(), "ops");
}
