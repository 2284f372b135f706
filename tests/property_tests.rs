//! Property tests for the retrieval ordering and prompt budget invariants.

use metis::config::{AssemblerConfig, RetrievalConfig};
use metis::models::{CaseMetadata, ThoughtStep};
use metis::store::InMemoryMethodologyStore;
use metis::{
    CaseId, ChainOfThoughtCase, EmbeddingIndex, HashedEmbedder, HybridRetriever, Intent,
    IntentClassifier, MethodologyStore, PromptAssembler,
};
use proptest::prelude::*;
use std::sync::Arc;

fn sample_case(id: &str, question: &str, answer: &str) -> ChainOfThoughtCase {
    ChainOfThoughtCase {
        id: CaseId::new(id),
        question: question.to_string(),
        thought_process: vec![ThoughtStep {
            step: 1,
            action: "analyze".to_string(),
            detail: "work through the figures".to_string(),
        }],
        final_answer: answer.to_string(),
        metadata: CaseMetadata::default(),
    }
}

proptest! {
    /// The rendered prompt never exceeds the budget, and the untrimmable
    /// sections are always present, regardless of how much context is
    /// offered.
    #[test]
    fn prompt_stays_within_budget_with_mandatory_sections(
        question in "[a-z ]{1,60}",
        answers in proptest::collection::vec("[a-z ]{10,300}", 0..6),
        budget in 400usize..2_000,
    ) {
        // The generated budgets always clear the skeleton, so construction
        // cannot fail here.
        let assembler = PromptAssembler::new(AssemblerConfig {
            budget,
            ..AssemblerConfig::default()
        })
        .unwrap();
        let cases: Vec<(ChainOfThoughtCase, f32)> = answers
            .iter()
            .enumerate()
            .map(|(i, answer)| {
                (
                    sample_case(&format!("c{i}"), "a prior question", answer),
                    1.0 - 0.1 * i as f32,
                )
            })
            .collect();

        let manifest = assembler.assemble(&question, &cases, &[]);

        prop_assert!(manifest.text.chars().count() <= budget);
        prop_assert!(manifest.text.contains("rigorous analyst"));
        prop_assert!(manifest.text.contains("step by step"));
        let question_line = format!("Question: {question}");
        prop_assert!(manifest.text.contains(&question_line));
        prop_assert!(manifest.case_refs.len() <= cases.len());
    }

    /// Retrieval never returns more than K hits, orders them by descending
    /// score, and never repeats an entity id.
    #[test]
    fn retrieval_respects_k_ordering_and_uniqueness(
        docs in proptest::collection::vec("[a-z]{3,8}( [a-z]{3,8}){2,6}", 1..12),
        query in "[a-z]{3,8}( [a-z]{3,8}){1,4}",
        k in 0usize..5,
    ) {
        let client: Arc<dyn metis::EmbeddingClient> =
            Arc::new(HashedEmbedder::new("hashed-v1"));
        let case_index = Arc::new(EmbeddingIndex::new("cases", Arc::clone(&client)));
        let method_index = Arc::new(EmbeddingIndex::new("methods", client));
        for (i, doc) in docs.iter().enumerate() {
            case_index.upsert(&format!("d{i}"), 1, doc).unwrap();
        }
        let retriever = HybridRetriever::new(
            case_index,
            method_index,
            Arc::new(InMemoryMethodologyStore::new()) as Arc<dyn MethodologyStore>,
            RetrievalConfig {
                k_case: k,
                min_score: 0.0,
                ..RetrievalConfig::default()
            },
        );

        let ctx = retriever.retrieve(&query, Intent::other());

        prop_assert!(ctx.cases.len() <= k);
        for pair in ctx.cases.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
        let mut ids: Vec<&str> = ctx.cases.iter().map(|h| h.entity.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), ctx.cases.len());
    }

    /// Identical corpora and query always produce identical rankings.
    #[test]
    fn retrieval_is_deterministic(
        docs in proptest::collection::vec("[a-z]{3,8}( [a-z]{3,8}){2,6}", 1..8),
        query in "[a-z]{3,8}( [a-z]{3,8}){1,4}",
    ) {
        let build = || {
            let index = EmbeddingIndex::new(
                "cases",
                Arc::new(HashedEmbedder::new("hashed-v1")),
            );
            for (i, doc) in docs.iter().enumerate() {
                index.upsert(&format!("d{i}"), 1, doc).unwrap();
            }
            index.query(&query, 5).unwrap()
        };
        prop_assert_eq!(build(), build());
    }

    /// Classification always yields a known label, and `other` always means
    /// zero confidence.
    #[test]
    fn classifier_labels_are_closed_and_consistent(question in "\\PC{0,40}") {
        let intent = IntentClassifier::default().classify(&question);
        let known = [
            "attribution", "comparison", "trend",
            "calculation", "evaluation", "forecast", "other",
        ];
        prop_assert!(known.contains(&intent.label.as_str()));
        if intent.label == "other" {
            prop_assert!(intent.confidence.abs() < f32::EPSILON);
        } else {
            prop_assert!(intent.confidence > 0.0 && intent.confidence < 1.0);
        }
    }
}
