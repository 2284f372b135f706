//! Keyword-based intent classification.
//!
//! Retrieval boosts methodology cards whose applicability scope contains the
//! question's intent, so classification has to be cheap and deterministic.
//! The classifier walks an ordered category table and the first category with
//! any keyword hit wins; table order is the only priority mechanism.

use std::fmt;

/// A classified intent with a rough confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    /// Category label, `other` when nothing matched.
    pub label: String,
    /// Confidence in [0, 1); 0.0 for the unmatched default.
    pub confidence: f32,
}

impl Intent {
    /// The fallback intent for questions no category matches.
    #[must_use]
    pub fn other() -> Self {
        Self {
            label: "other".to_string(),
            confidence: 0.0,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2})", self.label, self.confidence)
    }
}

/// One entry in the classification table.
#[derive(Debug, Clone)]
pub struct IntentCategory {
    /// Label assigned when this category matches.
    pub label: String,
    /// Keywords matched as lowercase substrings of the question.
    pub keywords: Vec<String>,
}

impl IntentCategory {
    /// Creates a category from a label and keyword list.
    #[must_use]
    pub fn new(label: impl Into<String>, keywords: &[&str]) -> Self {
        Self {
            label: label.into(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

/// Ordered first-match keyword classifier.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    categories: Vec<IntentCategory>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(default_categories())
    }
}

impl IntentClassifier {
    /// Creates a classifier from an ordered category table.
    ///
    /// Earlier categories take priority; the order given here is preserved
    /// exactly.
    #[must_use]
    pub fn new(categories: Vec<IntentCategory>) -> Self {
        Self { categories }
    }

    /// Classifies a question.
    ///
    /// The question is lowercased and each category's keywords are tried as
    /// substring matches in table order. The first category with at least one
    /// hit wins; additional hits within that category raise the confidence.
    /// No hit anywhere yields `other` with confidence 0.
    #[must_use]
    pub fn classify(&self, question: &str) -> Intent {
        let lowered = question.to_lowercase();
        for category in &self.categories {
            let hits = category
                .keywords
                .iter()
                .filter(|k| !k.is_empty() && lowered.contains(k.as_str()))
                .count();
            if hits > 0 {
                let confidence = keyword_confidence(hits);
                metrics::counter!("intent_classifications_total", "label" => category.label.clone())
                    .increment(1);
                tracing::debug!(label = %category.label, hits, "classified intent");
                return Intent {
                    label: category.label.clone(),
                    confidence,
                };
            }
        }
        metrics::counter!("intent_classifications_total", "label" => "other").increment(1);
        Intent::other()
    }
}

/// Maps a within-category keyword hit count to a confidence below 1.0.
fn keyword_confidence(hits: usize) -> f32 {
    let extra = hits.saturating_sub(1).min(3) as f32;
    0.1f32.mul_add(extra, 0.6)
}

/// The default financial-analysis category table.
///
/// Attribution comes before calculation on purpose: a question like
/// "毛利率下降的原因" contains both a ratio term and a causal term, and the
/// causal reading is the useful one for methodology selection.
fn default_categories() -> Vec<IntentCategory> {
    vec![
        IntentCategory::new(
            "attribution",
            &["原因", "为什么", "为何", "导致", "why", "cause", "driver", "attribut"],
        ),
        IntentCategory::new(
            "comparison",
            &["对比", "相比", "比较", "差异", "compare", "versus", " vs ", "difference"],
        ),
        IntentCategory::new(
            "trend",
            &["趋势", "变化", "走势", "同比", "环比", "trend", "over time", "growth"],
        ),
        IntentCategory::new(
            "calculation",
            &["计算", "毛利率", "净利率", "周转率", "率", "calculate", "ratio", "margin"],
        ),
        IntentCategory::new(
            "evaluation",
            &["评估", "评价", "健康", "风险", "evaluate", "assess", "health", "risk"],
        ),
        IntentCategory::new(
            "forecast",
            &["预测", "预计", "展望", "forecast", "predict", "outlook", "estimate"],
        ),
    ]
}
