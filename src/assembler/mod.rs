//! Deterministic prompt assembly under a character budget.
//!
//! The rendered prompt always follows the same section order: persona,
//! methodology blocks, case blocks, execution instruction, the literal
//! question. When the render exceeds the budget the lowest-scored tail
//! entry is dropped, alternating between the methodology and case lists
//! (methodology side first), and the prompt is re-rendered until it fits.
//! Persona, instruction, and question are never dropped.
//!
//! Braces are template delimiters downstream, so every piece of embedded
//! content has `{` and `}` doubled before rendering.

use crate::config::AssemblerConfig;
use crate::models::{ChainOfThoughtCase, EntityRef, MethodologyCard, PromptManifest};
use crate::{Error, Result};

/// Methodology cards carry no revision chain; their manifest refs always
/// point at version 1.
const METHOD_VERSION: u32 = 1;

/// Renders retrieved context into a bounded, reproducible prompt.
pub struct PromptAssembler {
    config: AssemblerConfig,
}

impl PromptAssembler {
    /// Creates an assembler, validating that the budget can hold the
    /// untrimmable skeleton (persona, instruction, question scaffolding).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] when the budget is smaller than the
    /// skeleton rendered with an empty question.
    pub fn new(config: AssemblerConfig) -> Result<Self> {
        let assembler = Self { config };
        let skeleton = assembler.render("", &[], &[]).chars().count();
        if assembler.config.budget < skeleton {
            return Err(Error::MalformedInput(format!(
                "budget {} cannot hold the prompt skeleton ({skeleton} chars)",
                assembler.config.budget
            )));
        }
        Ok(assembler)
    }

    /// Assembles a prompt from scored cases and methodology cards.
    ///
    /// Inputs may arrive in any order; they are rendered descending by score
    /// and trimmed from the low-score tail when over budget. The returned
    /// manifest lists exactly the `(id, version)` pairs that survived, in
    /// rendered order. The `degraded` flag is the caller's to set; it starts
    /// out false here because trimming is not degradation.
    #[must_use]
    pub fn assemble(
        &self,
        question: &str,
        cases: &[(ChainOfThoughtCase, f32)],
        methods: &[(MethodologyCard, f32)],
    ) -> PromptManifest {
        let mut cases: Vec<&(ChainOfThoughtCase, f32)> = cases.iter().collect();
        cases.sort_by(|(_, a), (_, b)| b.total_cmp(a));
        let mut methods: Vec<&(MethodologyCard, f32)> = methods.iter().collect();
        methods.sort_by(|(_, a), (_, b)| b.total_cmp(a));

        let mut method_blocks: Vec<String> =
            methods.iter().map(|(card, _)| render_method(card)).collect();
        let mut case_blocks: Vec<String> =
            cases.iter().map(|(case, _)| render_case(case)).collect();

        let mut text = self.render(question, &method_blocks, &case_blocks);
        // Alternate trim sides, methodology first.
        let mut trim_methods = true;
        while text.chars().count() > self.config.budget {
            let dropped = if trim_methods && !method_blocks.is_empty() {
                method_blocks.pop();
                methods.pop().map(|(card, _)| card.method_id.to_string())
            } else if !case_blocks.is_empty() {
                case_blocks.pop();
                cases.pop().map(|(case, _)| case.id.to_string())
            } else if !method_blocks.is_empty() {
                method_blocks.pop();
                methods.pop().map(|(card, _)| card.method_id.to_string())
            } else {
                // Nothing left to trim; the skeleton plus question exceeds
                // the budget and the mandatory sections stay.
                tracing::warn!(
                    budget = self.config.budget,
                    "prompt exceeds budget with no trimmable sections left"
                );
                break;
            };
            trim_methods = !trim_methods;
            if let Some(id) = dropped {
                metrics::counter!("assembler_trims_total").increment(1);
                tracing::warn!(entity_id = %id, "trimmed prompt section to fit budget");
            }
            text = self.render(question, &method_blocks, &case_blocks);
        }

        metrics::histogram!("assembler_prompt_chars").record(text.chars().count() as f64);

        PromptManifest {
            text,
            case_refs: cases
                .iter()
                .map(|(case, _)| EntityRef::new(case.id.as_str(), case.metadata.version))
                .collect(),
            method_refs: methods
                .iter()
                .map(|(card, _)| EntityRef::new(card.method_id.as_str(), METHOD_VERSION))
                .collect(),
            degraded: false,
        }
    }

    fn render(&self, question: &str, method_blocks: &[String], case_blocks: &[String]) -> String {
        let mut out = String::new();
        out.push_str(&escape(&self.config.persona));
        out.push('\n');
        for block in method_blocks {
            out.push('\n');
            out.push_str(block);
        }
        for block in case_blocks {
            out.push('\n');
            out.push_str(block);
        }
        out.push('\n');
        out.push_str(&escape(&self.config.instruction));
        out.push_str("\n\nQuestion: ");
        out.push_str(&escape(question));
        out.push('\n');
        out
    }
}

fn render_method(card: &MethodologyCard) -> String {
    let mut block = format!(
        "### Methodology: {}\n{}\n",
        escape(&card.name),
        escape(&card.description)
    );
    for step in &card.steps {
        block.push_str(&format!(
            "{}. {}: {}\n",
            step.step,
            escape(&step.action),
            escape(&step.prompt)
        ));
    }
    if let Some(cue) = &card.example_cue {
        block.push_str(&format!("Typical use: {}\n", escape(cue)));
    }
    block
}

fn render_case(case: &ChainOfThoughtCase) -> String {
    let mut block = format!("### Worked example\nQuestion: {}\n", escape(&case.question));
    for step in &case.thought_process {
        block.push_str(&format!(
            "{}. {}: {}\n",
            step.step,
            escape(&step.action),
            escape(&step.detail)
        ));
    }
    block.push_str(&format!("Final answer: {}\n", escape(&case.final_answer)));
    block
}

/// Doubles template delimiters in embedded content.
fn escape(content: &str) -> String {
    content.replace('{', "{{").replace('}', "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaseId, CaseMetadata, MethodId, MethodStep, ThoughtStep};

    fn case(id: &str, question: &str, answer: &str, version: u32) -> ChainOfThoughtCase {
        ChainOfThoughtCase {
            id: CaseId::new(id),
            question: question.to_string(),
            thought_process: vec![ThoughtStep {
                step: 1,
                action: "analyze".to_string(),
                detail: "inspect the drivers".to_string(),
            }],
            final_answer: answer.to_string(),
            metadata: CaseMetadata {
                version,
                ..CaseMetadata::default()
            },
        }
    }

    fn card(id: &str, name: &str) -> MethodologyCard {
        MethodologyCard {
            method_id: MethodId::new(id),
            name: name.to_string(),
            description: "decompose the metric into drivers".to_string(),
            applicability_scope: ["attribution".to_string()].into(),
            steps: vec![MethodStep {
                step: 1,
                action: "decompose".to_string(),
                prompt: "list the drivers".to_string(),
            }],
            example_cue: None,
        }
    }

    fn assembler(budget: usize) -> PromptAssembler {
        PromptAssembler::new(AssemblerConfig {
            budget,
            ..AssemblerConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_budget_below_skeleton() {
        let result = PromptAssembler::new(AssemblerConfig {
            budget: 10,
            ..AssemblerConfig::default()
        });
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_section_order_is_fixed() {
        let assembler = assembler(6_000);
        let manifest = assembler.assemble(
            "why did margin fall",
            &[(case("c1", "prior margin question", "costs rose", 1), 0.9)],
            &[(card("m1", "variance attribution"), 0.8)],
        );
        let text = &manifest.text;
        let persona_at = text.find("rigorous analyst").unwrap();
        let method_at = text.find("### Methodology").unwrap();
        let case_at = text.find("### Worked example").unwrap();
        let instruction_at = text.find("step by step").unwrap();
        let question_at = text.rfind("Question: why did margin fall").unwrap();
        assert!(persona_at < method_at);
        assert!(method_at < case_at);
        assert!(case_at < instruction_at);
        assert!(instruction_at < question_at);
    }

    #[test]
    fn test_final_answer_rendered_verbatim() {
        let assembler = assembler(6_000);
        let manifest = assembler.assemble(
            "q",
            &[(case("c1", "prior question", "Non-operating income offset it.", 2), 0.9)],
            &[],
        );
        assert!(manifest.text.contains("Non-operating income offset it."));
        assert_eq!(manifest.case_refs, vec![EntityRef::new("c1", 2)]);
    }

    #[test]
    fn test_braces_are_doubled() {
        let assembler = assembler(6_000);
        let manifest = assembler.assemble(
            "what does {placeholder} mean",
            &[(case("c1", "prior {x} question", "use {{x}} syntax", 1), 0.9)],
            &[],
        );
        assert!(manifest.text.contains("what does {{placeholder}} mean"));
        assert!(manifest.text.contains("prior {{x}} question"));
        assert!(manifest.text.contains("use {{{{x}}}} syntax"));
    }

    #[test]
    fn test_trimming_respects_budget_and_manifest() {
        let long_answer = "a detailed driver-by-driver explanation ".repeat(20);
        let cases = vec![
            (case("c1", "first question", &long_answer, 1), 0.9),
            (case("c2", "second question", &long_answer, 1), 0.8),
            (case("c3", "third question", &long_answer, 1), 0.7),
        ];
        let methods = vec![(card("m1", "variance attribution"), 0.85)];
        let assembler = assembler(1_200);
        let manifest = assembler.assemble("why", &cases, &methods);

        assert!(manifest.text.chars().count() <= 1_200);
        // Mandatory sections survive every trim.
        assert!(manifest.text.contains("rigorous analyst"));
        assert!(manifest.text.contains("step by step"));
        assert!(manifest.text.contains("Question: why"));
        // Trimming dropped from the low-score tail.
        let total = manifest.case_refs.len() + manifest.method_refs.len();
        assert!(total < 4);
        for (i, r) in manifest.case_refs.iter().enumerate() {
            assert_eq!(r.id, format!("c{}", i + 1));
        }
    }

    #[test]
    fn test_trim_starts_with_methodology() {
        let filler = "driver analysis context ".repeat(10);
        let cases = vec![(case("c1", "question", &filler, 1), 0.9)];
        let mut big_card = card("m1", "variance attribution");
        big_card.description = filler.clone();
        let methods = vec![(big_card, 0.95)];

        // Budget fits the skeleton plus the case block but not both blocks.
        let skeleton_and_case = assembler(6_000)
            .assemble("question", &cases, &[])
            .text
            .chars()
            .count();
        let assembler = assembler(skeleton_and_case + 10);
        let manifest = assembler.assemble("question", &cases, &methods);
        assert!(manifest.method_refs.is_empty());
        assert_eq!(manifest.case_refs.len(), 1);
    }

    #[test]
    fn test_empty_context_still_renders_skeleton() {
        let assembler = assembler(6_000);
        let manifest = assembler.assemble("standalone question", &[], &[]);
        assert!(manifest.case_refs.is_empty());
        assert!(manifest.method_refs.is_empty());
        assert!(manifest.text.contains("standalone question"));
        assert!(!manifest.degraded);
    }

    #[test]
    fn test_inputs_rendered_descending_by_score() {
        let assembler = assembler(6_000);
        let manifest = assembler.assemble(
            "q",
            &[
                (case("low", "low scored", "answer", 1), 0.5),
                (case("high", "high scored", "answer", 1), 0.9),
            ],
            &[],
        );
        assert_eq!(manifest.case_ids(), vec!["high", "low"]);
        let high_at = manifest.text.find("high scored").unwrap();
        let low_at = manifest.text.find("low scored").unwrap();
        assert!(high_at < low_at);
    }
}
