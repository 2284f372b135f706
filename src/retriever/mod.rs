//! Hybrid two-corpus retrieval.
//!
//! One query fans out to the case index and the methodology index. The two
//! corpus queries run concurrently, each under its own deadline; a corpus
//! that times out or loses its embedding service degrades to an empty result
//! list instead of failing the query. Methodology hits whose applicability
//! scope contains the question's intent get an additive score boost before
//! ranking.

use crate::config::RetrievalConfig;
use crate::index::EmbeddingIndex;
use crate::intent::Intent;
use crate::models::EntityRef;
use crate::store::MethodologyStore;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// One retrieval hit with its raw similarity and final score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHit {
    /// The versioned entity this hit refers to.
    pub entity: EntityRef,
    /// Final ranking score (similarity plus any intent boost).
    pub score: f32,
    /// Raw cosine similarity, never altered by boosting.
    pub similarity: f32,
}

/// The retrieval result for one query.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    /// Case hits, descending by score, at most `k_case`.
    pub cases: Vec<ScoredHit>,
    /// Methodology hits, descending by score, at most `k_method`.
    pub methods: Vec<ScoredHit>,
    /// The intent the query was classified as.
    pub intent: Intent,
    /// True when at least one corpus fell back to an empty result.
    pub degraded: bool,
}

/// Retriever spanning the case and methodology corpora.
pub struct HybridRetriever {
    case_index: Arc<EmbeddingIndex>,
    method_index: Arc<EmbeddingIndex>,
    methods: Arc<dyn MethodologyStore>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    /// Creates a retriever over the two corpus indices.
    #[must_use]
    pub fn new(
        case_index: Arc<EmbeddingIndex>,
        method_index: Arc<EmbeddingIndex>,
        methods: Arc<dyn MethodologyStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            case_index,
            method_index,
            methods,
            config,
        }
    }

    /// Retrieves context for a question under an already-classified intent.
    ///
    /// Never fails: a corpus that cannot answer in time contributes an empty
    /// list and sets `degraded`. Both corpora empty is a valid outcome for a
    /// cold system.
    #[must_use]
    pub fn retrieve(&self, question: &str, intent: Intent) -> RetrievedContext {
        metrics::counter!("retrieval_queries_total").increment(1);
        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.corpus_timeout_ms.max(1));

        // Over-fetch so the min-score filter cannot starve the final top-K.
        let case_fetch = self.config.k_case.saturating_mul(2);
        let method_fetch = self.config.k_method.saturating_mul(2);

        let case_rx = spawn_query(&self.case_index, question, case_fetch);
        let method_rx = spawn_query(&self.method_index, question, method_fetch);

        let mut degraded = false;
        let raw_cases = collect_corpus(&case_rx, deadline, "cases", &mut degraded);
        let raw_methods = collect_corpus(&method_rx, deadline, "methods", &mut degraded);

        let cases = self.rank(raw_cases, None, self.config.k_case);
        let methods = self.rank(raw_methods, Some(&intent), self.config.k_method);

        metrics::histogram!("retrieval_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(
            intent = %intent.label,
            cases = cases.len(),
            methods = methods.len(),
            degraded,
            "retrieved context"
        );

        RetrievedContext {
            cases,
            methods,
            intent,
            degraded,
        }
    }

    /// Boosts, filters, dedupes, and truncates one corpus's raw hits.
    fn rank(
        &self,
        raw: Vec<(String, u32, f32)>,
        boost_intent: Option<&Intent>,
        k: usize,
    ) -> Vec<ScoredHit> {
        let mut hits: Vec<ScoredHit> = raw
            .into_iter()
            .map(|(id, version, similarity)| {
                let boosted = boost_intent.is_some_and(|intent| {
                    self.methods
                        .get(&crate::models::MethodId::new(id.as_str()))
                        .is_some_and(|card| card.applies_to(&intent.label))
                });
                let score = if boosted {
                    metrics::counter!("retrieval_boosts_total").increment(1);
                    similarity + self.config.boost_weight
                } else {
                    similarity
                };
                ScoredHit {
                    entity: EntityRef::new(id, version),
                    score,
                    similarity,
                }
            })
            .collect();

        // Stable sort keeps the index's deterministic tie-break for equal
        // scores (insertion order, then id).
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.retain(|h| h.score >= self.config.min_score);

        let mut best_by_id: HashMap<String, ScoredHit> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for hit in hits {
            match best_by_id.get(&hit.entity.id) {
                Some(existing) if existing.score >= hit.score => {},
                Some(_) => {
                    best_by_id.insert(hit.entity.id.clone(), hit);
                },
                None => {
                    order.push(hit.entity.id.clone());
                    best_by_id.insert(hit.entity.id.clone(), hit);
                },
            }
        }

        let mut deduped: Vec<ScoredHit> = order
            .into_iter()
            .filter_map(|id| best_by_id.remove(&id))
            .collect();
        deduped.truncate(k);
        deduped
    }
}

/// Runs an index query on a background thread, returning the receiver.
fn spawn_query(
    index: &Arc<EmbeddingIndex>,
    question: &str,
    k: usize,
) -> mpsc::Receiver<Result<Vec<(String, u32, f32)>>> {
    let index = Arc::clone(index);
    let question = question.to_string();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(index.query(&question, k));
    });
    rx
}

/// Waits for one corpus result, degrading to empty on timeout or failure.
fn collect_corpus(
    rx: &mpsc::Receiver<Result<Vec<(String, u32, f32)>>>,
    deadline: Duration,
    corpus: &'static str,
    degraded: &mut bool,
) -> Vec<(String, u32, f32)> {
    let failure = match rx.recv_timeout(deadline) {
        Ok(Ok(hits)) => return hits,
        Ok(Err(err)) => err,
        Err(mpsc::RecvTimeoutError::Timeout) => Error::Timeout {
            operation: format!("query_{corpus}"),
            elapsed_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        },
        Err(mpsc::RecvTimeoutError::Disconnected) => Error::OperationFailed {
            operation: format!("query_{corpus}"),
            cause: "corpus query worker dropped without result".to_string(),
        },
    };
    metrics::counter!("retrieval_corpus_failures_total", "corpus" => corpus).increment(1);
    tracing::warn!(corpus, "corpus query degraded to empty: {failure}");
    *degraded = true;
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClient, HashedEmbedder};
    use crate::models::{MethodId, MethodStep, MethodologyCard};
    use crate::store::InMemoryMethodologyStore;

    fn card(id: &str, scope: &[&str], name: &str, description: &str) -> MethodologyCard {
        MethodologyCard {
            method_id: MethodId::new(id),
            name: name.to_string(),
            description: description.to_string(),
            applicability_scope: scope.iter().map(|s| (*s).to_string()).collect(),
            steps: vec![MethodStep {
                step: 1,
                action: "apply".to_string(),
                prompt: "apply the framework".to_string(),
            }],
            example_cue: None,
        }
    }

    fn intent(label: &str) -> Intent {
        Intent {
            label: label.to_string(),
            confidence: 0.6,
        }
    }

    struct Fixture {
        case_index: Arc<EmbeddingIndex>,
        method_index: Arc<EmbeddingIndex>,
        methods: Arc<InMemoryMethodologyStore>,
    }

    fn fixture() -> Fixture {
        let client: Arc<dyn EmbeddingClient> = Arc::new(HashedEmbedder::new("hashed-v1"));
        Fixture {
            case_index: Arc::new(EmbeddingIndex::new("cases", Arc::clone(&client))),
            method_index: Arc::new(EmbeddingIndex::new("methods", client)),
            methods: Arc::new(InMemoryMethodologyStore::new()),
        }
    }

    fn retriever(f: &Fixture, config: RetrievalConfig) -> HybridRetriever {
        HybridRetriever::new(
            Arc::clone(&f.case_index),
            Arc::clone(&f.method_index),
            Arc::clone(&f.methods) as Arc<dyn MethodologyStore>,
            config,
        )
    }

    #[test]
    fn test_empty_corpora_is_valid_not_degraded() {
        let f = fixture();
        let ctx = retriever(&f, RetrievalConfig::default())
            .retrieve("gross margin decline", intent("attribution"));
        assert!(ctx.cases.is_empty());
        assert!(ctx.methods.is_empty());
        assert!(!ctx.degraded);
    }

    #[test]
    fn test_respects_k_and_ordering() {
        let f = fixture();
        f.case_index
            .upsert("a", 1, "gross margin decline drivers analysis")
            .unwrap();
        f.case_index
            .upsert("b", 1, "gross margin decline in manufacturing")
            .unwrap();
        f.case_index
            .upsert("c", 1, "gross margin decline quarterly review")
            .unwrap();
        f.case_index
            .upsert("d", 1, "gross margin decline root cause")
            .unwrap();
        let config = RetrievalConfig {
            min_score: 0.0,
            ..RetrievalConfig::default()
        };
        let ctx = retriever(&f, config).retrieve("gross margin decline", intent("other"));
        assert!(ctx.cases.len() <= 3);
        for pair in ctx.cases.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_min_score_filters_weak_hits() {
        let f = fixture();
        f.case_index
            .upsert("weak", 1, "kubernetes pod scheduling policy")
            .unwrap();
        let ctx = retriever(&f, RetrievalConfig::default())
            .retrieve("gross margin decline", intent("other"));
        assert!(ctx.cases.is_empty());
        assert!(!ctx.degraded);
    }

    #[test]
    fn test_boost_requires_scope_overlap() {
        let f = fixture();
        f.methods.put(card(
            "m-in",
            &["attribution"],
            "variance attribution",
            "gross margin decline decomposition",
        ));
        f.methods.put(card(
            "m-out",
            &["forecast"],
            "projection",
            "gross margin decline projection",
        ));
        f.method_index
            .upsert("m-in", 1, "variance attribution\ngross margin decline decomposition")
            .unwrap();
        f.method_index
            .upsert("m-out", 1, "projection\ngross margin decline projection")
            .unwrap();
        let config = RetrievalConfig {
            min_score: 0.0,
            ..RetrievalConfig::default()
        };
        let ctx = retriever(&f, config).retrieve("gross margin decline", intent("attribution"));

        let boosted = ctx
            .methods
            .iter()
            .find(|h| h.entity.id == "m-in")
            .unwrap();
        let unboosted = ctx
            .methods
            .iter()
            .find(|h| h.entity.id == "m-out")
            .unwrap();
        assert!((boosted.score - boosted.similarity - 0.15).abs() < 1e-6);
        assert!((unboosted.score - unboosted.similarity).abs() < 1e-6);
    }

    #[test]
    fn test_boost_can_reorder_but_not_rewrite_similarity() {
        let f = fixture();
        f.methods.put(card(
            "m-scoped",
            &["attribution"],
            "scoped method",
            "margin decline analysis framework",
        ));
        f.methods.put(card(
            "m-generic",
            &[],
            "generic method",
            "margin decline analysis framework detailed",
        ));
        f.method_index
            .upsert("m-scoped", 1, "margin decline analysis")
            .unwrap();
        f.method_index
            .upsert("m-generic", 1, "margin decline analysis framework detailed")
            .unwrap();
        let config = RetrievalConfig {
            min_score: 0.0,
            ..RetrievalConfig::default()
        };
        let ctx = retriever(&f, config).retrieve("margin decline analysis", intent("attribution"));
        for hit in &ctx.methods {
            assert!(hit.similarity <= 1.0);
            assert!(hit.score >= hit.similarity);
        }
        assert_eq!(ctx.methods[0].entity.id, "m-scoped");
    }

    /// Succeeds for the first `allowed` calls, then reports the service down.
    struct DyingClient {
        inner: HashedEmbedder,
        calls: std::sync::atomic::AtomicU32,
        allowed: u32,
    }

    impl EmbeddingClient for DyingClient {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call < self.allowed {
                self.inner.embed(text)
            } else {
                Err(Error::EmbeddingUnavailable("service down".to_string()))
            }
        }
    }

    #[test]
    fn test_failed_corpus_degrades_to_empty() {
        // The case index embeds once at upsert, then its service dies; the
        // methodology index stays healthy.
        let dying: Arc<dyn EmbeddingClient> = Arc::new(DyingClient {
            inner: HashedEmbedder::new("hashed-v1"),
            calls: std::sync::atomic::AtomicU32::new(0),
            allowed: 1,
        });
        let working: Arc<dyn EmbeddingClient> = Arc::new(HashedEmbedder::new("hashed-v1"));
        let case_index = Arc::new(EmbeddingIndex::new("cases", dying));
        case_index
            .upsert("c1", 1, "gross margin decline drivers")
            .unwrap();
        let method_index = Arc::new(EmbeddingIndex::new("methods", working));
        method_index
            .upsert("m1", 1, "variance attribution\ngross margin decline decomposition")
            .unwrap();
        let methods = Arc::new(InMemoryMethodologyStore::new());
        methods.put(card(
            "m1",
            &["attribution"],
            "variance attribution",
            "gross margin decline decomposition",
        ));

        let config = RetrievalConfig {
            min_score: 0.0,
            ..RetrievalConfig::default()
        };
        let retriever = HybridRetriever::new(
            case_index,
            method_index,
            methods as Arc<dyn MethodologyStore>,
            config,
        );
        let ctx = retriever.retrieve("gross margin decline", intent("attribution"));
        assert!(ctx.degraded);
        assert!(ctx.cases.is_empty());
        assert!(!ctx.methods.is_empty());
    }
}
