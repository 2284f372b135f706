//! Validated, idempotent case ingestion.
//!
//! Approved, well-scored reasoning traces are admitted into the case corpus.
//! Admission is guarded three ways: a review approval flag, a minimum
//! (source-weighted) evaluation score, and structural validation of the
//! trace. A content hash over the normalized question, thought process, and
//! final answer makes ingestion idempotent; resubmitting identical content
//! is a no-op that reports the already-stored case.
//!
//! The store is written before the index. When embedding fails, the case
//! persists flagged as unindexed so no accepted feedback is lost; a later
//! [`FeedbackIngestor::reindex_unindexed`] pass picks it up.

use crate::config::IngestConfig;
use crate::index::EmbeddingIndex;
use crate::models::{CaseId, CaseMetadata, ChainOfThoughtCase, ThoughtStep};
use crate::store::CaseStore;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A candidate case submitted through the feedback loop.
#[derive(Debug, Clone)]
pub struct CasePayload {
    /// The question that was answered.
    pub question: String,
    /// The reasoning trace.
    pub thought_process: Vec<ThoughtStep>,
    /// The final answer.
    pub final_answer: String,
    /// Problem domain.
    pub domain: String,
    /// Difficulty label.
    pub difficulty: String,
    /// Browsing keywords.
    pub keywords: BTreeSet<String>,
    /// When set, this payload revises the named logical case.
    pub supersedes: Option<CaseId>,
    /// Source label of the record the trace was built from, if any.
    /// Weighted against the evaluation score at admission.
    pub source: Option<String>,
}

impl CasePayload {
    /// Creates a payload from the three content fields.
    #[must_use]
    pub fn new(
        question: impl Into<String>,
        thought_process: Vec<ThoughtStep>,
        final_answer: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            thought_process,
            final_answer: final_answer.into(),
            domain: String::new(),
            difficulty: String::new(),
            keywords: BTreeSet::new(),
            supersedes: None,
            source: None,
        }
    }

    /// Sets the domain label.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Sets the difficulty label.
    #[must_use]
    pub fn with_difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.difficulty = difficulty.into();
        self
    }

    /// Sets the keyword set.
    #[must_use]
    pub fn with_keywords(mut self, keywords: BTreeSet<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Marks this payload as a revision of an existing case.
    #[must_use]
    pub fn with_supersedes(mut self, id: CaseId) -> Self {
        self.supersedes = Some(id);
        self
    }

    /// Attaches record-source provenance.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches provenance from the record the trace was built on: the
    /// source label drives score weighting and the record's tags join the
    /// keyword set.
    #[must_use]
    pub fn with_provenance(mut self, record: &crate::models::SourceRecord) -> Self {
        self.source = Some(record.source.clone());
        self.keywords.extend(record.tags.iter().cloned());
        self
    }
}

/// The outcome of one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The case was stored (and indexed unless embedding failed).
    Accepted {
        /// Assigned logical id.
        id: CaseId,
        /// Assigned version.
        version: u32,
    },
    /// Identical content is already stored; nothing changed.
    Duplicate {
        /// Id of the already-stored case.
        id: CaseId,
    },
    /// The payload did not pass the admission policy.
    Rejected {
        /// Human-readable rejection reason.
        reason: String,
    },
}

/// Admits reviewed feedback into the case corpus.
pub struct FeedbackIngestor {
    store: Arc<dyn CaseStore>,
    index: Arc<EmbeddingIndex>,
    config: IngestConfig,
}

impl FeedbackIngestor {
    /// Creates an ingestor writing to the given store and index.
    #[must_use]
    pub fn new(
        store: Arc<dyn CaseStore>,
        index: Arc<EmbeddingIndex>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            index,
            config,
        }
    }

    /// Ingests one payload.
    ///
    /// Policy rejections (missing approval, score below threshold) come back
    /// as [`IngestOutcome::Rejected`]; structurally invalid payloads are an
    /// error and nothing is stored in either failure mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedCase`] when the trace fails structural
    /// validation and [`Error::MalformedInput`] when `supersedes` names an
    /// unknown case.
    pub fn ingest(
        &self,
        payload: CasePayload,
        evaluation_score: f64,
        review_approved: bool,
    ) -> Result<IngestOutcome> {
        if !review_approved {
            return Ok(self.reject("review approval missing"));
        }
        let weight = payload
            .source
            .as_deref()
            .map_or(1.0, |s| self.config.source_weight(s));
        let weighted = evaluation_score * weight;
        if weighted < self.config.min_score {
            return Ok(self.reject(&format!(
                "weighted evaluation score {weighted:.3} below threshold {:.3}",
                self.config.min_score
            )));
        }

        let (id, version) = match &payload.supersedes {
            Some(prior) => {
                let latest = self.store.latest_version(prior).ok_or_else(|| {
                    Error::MalformedInput(format!("supersedes unknown case {prior}"))
                })?;
                (prior.clone(), latest + 1)
            },
            None => (CaseId::new(uuid::Uuid::new_v4().to_string()), 1),
        };

        let case = ChainOfThoughtCase {
            id: id.clone(),
            question: payload.question,
            thought_process: payload.thought_process,
            final_answer: payload.final_answer,
            metadata: CaseMetadata {
                domain: payload.domain,
                difficulty: payload.difficulty,
                keywords: payload.keywords,
                version,
            },
        };
        case.validate()?;

        if let Some(existing) = self.store.find_by_hash(&case.content_hash()) {
            metrics::counter!("ingest_outcomes_total", "outcome" => "duplicate").increment(1);
            tracing::debug!(id = %existing.id, "duplicate content, ingestion is a no-op");
            return Ok(IngestOutcome::Duplicate { id: existing.id });
        }

        // Persist before indexing so an embedding outage cannot lose the case.
        self.store.put(case.clone());
        match self.index.upsert(id.as_str(), version, &case.canonical_text()) {
            Ok(()) => self.store.mark_indexed(&id, version),
            Err(err) => {
                self.store.mark_unindexed(&id, version);
                metrics::counter!("ingest_unindexed_total").increment(1);
                tracing::warn!(id = %id, version, "case stored but not indexed: {err}");
            },
        }

        metrics::counter!("ingest_outcomes_total", "outcome" => "accepted").increment(1);
        tracing::info!(id = %id, version, "ingested case");
        Ok(IngestOutcome::Accepted { id, version })
    }

    /// Retries indexing for cases that were stored during an embedding
    /// outage. Returns how many were indexed this pass; the rest stay
    /// flagged for the next one.
    pub fn reindex_unindexed(&self) -> usize {
        let mut indexed = 0;
        for case in self.store.unindexed() {
            let version = case.metadata.version;
            match self
                .index
                .upsert(case.id.as_str(), version, &case.canonical_text())
            {
                Ok(()) => {
                    self.store.mark_indexed(&case.id, version);
                    indexed += 1;
                },
                Err(err) => {
                    tracing::warn!(id = %case.id, version, "reindex attempt failed: {err}");
                },
            }
        }
        if indexed > 0 {
            metrics::counter!("ingest_reindexed_total").increment(indexed as u64);
        }
        indexed
    }

    fn reject(&self, reason: &str) -> IngestOutcome {
        metrics::counter!("ingest_outcomes_total", "outcome" => "rejected").increment(1);
        tracing::debug!(reason, "rejected ingestion");
        IngestOutcome::Rejected {
            reason: reason.to_string(),
        }
    }
}
