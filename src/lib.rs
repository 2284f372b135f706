//! # Metis
//!
//! Retrieval-guided reasoning core for LLM pipelines.
//!
//! Metis retrieves prior knowledge before generation: concrete worked
//! examples ("chain-of-thought cases") and abstract reasoning frameworks
//! ("methodology cards"). It ranks and merges them, and assembles a bounded,
//! reproducible prompt. A feedback loop admits newly reviewed cases back
//! into the case corpus.
//!
//! ## Architecture
//!
//! - Two [`index::EmbeddingIndex`] instances (case corpus, methodology corpus)
//! - [`intent::IntentClassifier`] for meta-intent labeling
//! - [`retriever::HybridRetriever`] for boosted, deduplicated two-corpus retrieval
//! - [`assembler::PromptAssembler`] for deterministic prompt construction
//! - [`ingest::FeedbackIngestor`] for validated, idempotent corpus growth
//! - [`pipeline::QueryPipeline`] tying the stages together per query
//!
//! The embedding model and the LLM are external services, injected through
//! the [`embedding::EmbeddingClient`] and [`pipeline::LlmService`] traits.
//!
//! ## Example
//!
//! ```rust,ignore
//! use metis::{MetisConfig, QueryPipeline};
//!
//! let pipeline = QueryPipeline::new(config, embedder, case_store, method_store)?;
//! let context = pipeline.submit_query("毛利率下降但净利润上升的原因");
//! let manifest = pipeline.assemble_prompt("毛利率下降但净利润上升的原因", &context);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod assembler;
pub mod config;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod intent;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod store;

// Re-exports for convenience
pub use assembler::PromptAssembler;
pub use config::MetisConfig;
pub use embedding::{EmbeddingClient, HashedEmbedder};
pub use index::EmbeddingIndex;
pub use ingest::{CasePayload, FeedbackIngestor, IngestOutcome};
pub use intent::{Intent, IntentClassifier};
pub use models::{
    CaseId, CaseMetadata, ChainOfThoughtCase, EntityRef, MethodId, MethodStep, MethodologyCard,
    PromptManifest, SourceRecord, ThoughtStep,
};
pub use pipeline::{LlmService, PipelineResponse, QueryPipeline};
pub use retriever::{HybridRetriever, RetrievedContext, ScoredHit};
pub use store::{CaseStore, InMemoryCaseStore, InMemoryMethodologyStore, MethodologyStore};

/// Error type for metis operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `EmbeddingUnavailable` | Embedding service unreachable after bounded retry |
/// | `MalformedInput` | Empty text for upsert, invalid budget, bad config values |
/// | `MalformedCase` | Ingested case is missing fields or has broken step order |
/// | `MalformedMethodology` | Methodology card is missing required fields |
/// | `StaleIndex` | Explicit read of an entry embedded under a retired model id |
/// | `Timeout` | A deadline-bounded external call did not finish in time |
/// | `OperationFailed` | Store lookups fail, poisoned state, other internal faults |
///
/// An empty corpus is never an error: queries over it return empty results.
/// Prompt overflow is never an error either: it is absorbed by the trimming
/// policy in [`assembler`].
#[derive(Debug, ThisError)]
pub enum Error {
    /// The embedding service could not be reached.
    ///
    /// Raised after bounded retry with backoff has been exhausted. Queries
    /// degrade by skipping the affected corpus; ingestion persists the case
    /// but flags it unindexed.
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - `upsert` is called with empty or blank text
    /// - A prompt budget is smaller than the untrimmable skeleton
    /// - A config file has out-of-range values
    #[error("invalid input: {0}")]
    MalformedInput(String),

    /// A chain-of-thought case failed structural validation.
    ///
    /// Nothing is partially stored when this is raised.
    #[error("malformed case: {0}")]
    MalformedCase(String),

    /// A methodology card failed structural validation.
    #[error("malformed methodology: {0}")]
    MalformedMethodology(String),

    /// An embedding entry was computed under a model id the index no longer
    /// uses. Stale entries are silently excluded from similarity queries;
    /// this variant surfaces only on explicit per-version reads.
    #[error("stale entry for '{entity_id}' v{version}: embedded with model '{found}', index expects '{expected}'")]
    StaleIndex {
        /// The entity whose entry is stale.
        entity_id: String,
        /// The stale entry's version.
        version: u32,
        /// Model id the entry was embedded with.
        found: String,
        /// Model id the index currently expects.
        expected: String,
    },

    /// A deadline-bounded external call (embedding, LLM) timed out.
    ///
    /// The pipeline degrades to the best partial result rather than failing
    /// the whole request; callers see `degraded: true` on the result.
    #[error("operation '{operation}' timed out after {elapsed_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Elapsed time in milliseconds when the deadline fired.
        elapsed_ms: u64,
    },

    /// An internal operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for metis operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MalformedInput("empty text".to_string());
        assert_eq!(err.to_string(), "invalid input: empty text");

        let err = Error::EmbeddingUnavailable("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));

        let err = Error::Timeout {
            operation: "embed_query".to_string(),
            elapsed_ms: 250,
        };
        assert_eq!(err.to_string(), "operation 'embed_query' timed out after 250ms");

        let err = Error::StaleIndex {
            entity_id: "cot-1".to_string(),
            version: 2,
            found: "model-a".to_string(),
            expected: "model-b".to_string(),
        };
        assert!(err.to_string().contains("cot-1"));
        assert!(err.to_string().contains("model-b"));
    }
}
