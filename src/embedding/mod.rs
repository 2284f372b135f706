//! Embedding client abstraction.
//!
//! The embedding model is an external service. Everything in this crate
//! talks to it through [`EmbeddingClient`]; the deterministic
//! [`HashedEmbedder`] stands in where no service is reachable (and in
//! tests), keeping retrieval usable offline.

// Hash-based embedding math casts between integer and float widths.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

mod bulkhead;
mod hashed;
mod resilience;

pub use bulkhead::{BulkheadClient, BulkheadConfig};
pub use hashed::HashedEmbedder;
pub use resilience::ResilientEmbeddingClient;

use crate::Result;

/// Trait for text-to-vector embedding clients.
///
/// Implementations must be `Send + Sync`; calls are treated as fallible and
/// latency-bound throughout the crate.
pub trait EmbeddingClient: Send + Sync {
    /// The id of the model producing the vectors.
    fn model_id(&self) -> &str;

    /// The dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    /// Embeds the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedding service cannot produce a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

impl<T: EmbeddingClient + ?Sized> EmbeddingClient for std::sync::Arc<T> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }
}

/// Computes cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero norm or the lengths differ.
/// The result is clamped to [-1, 1] to absorb floating point drift.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
