//! Deterministic hash-based embedder.
//!
//! Produces bag-of-token vectors by hashing tokens into a fixed number of
//! buckets and L2-normalizing. Not a semantic model, but deterministic:
//! the same text under the same model id always yields the same vector,
//! which is exactly what offline use and retrieval tests need. Lexically
//! overlapping texts land close in cosine space.

use super::EmbeddingClient;
use crate::Result;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Default number of hash buckets.
const DEFAULT_DIMENSIONS: usize = 256;

/// Deterministic bag-of-token embedder.
///
/// ASCII text is tokenized on non-alphanumeric boundaries; CJK text is
/// tokenized into overlapping character bigrams, since there are no spaces
/// to split on.
pub struct HashedEmbedder {
    model_id: String,
    dimensions: usize,
}

impl HashedEmbedder {
    /// Creates an embedder with the given model id and default dimensions.
    #[must_use]
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            dimensions: DEFAULT_DIMENSIONS,
        }
    }

    /// Creates an embedder with explicit dimensions.
    #[must_use]
    pub fn with_dimensions(model_id: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimensions: dimensions.max(1),
        }
    }

    /// Splits text into hashable tokens.
    fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut prev_cjk: Option<char> = None;

        for c in text.chars() {
            if is_cjk(c) {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
                // Single char plus the bigram with its predecessor.
                tokens.push(c.to_string());
                if let Some(prev) = prev_cjk {
                    tokens.push(format!("{prev}{c}"));
                }
                prev_cjk = Some(c);
            } else if c.is_alphanumeric() {
                prev_cjk = None;
                word.extend(c.to_lowercase());
            } else {
                prev_cjk = None;
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
            }
        }
        if !word.is_empty() {
            tokens.push(word);
        }
        tokens
    }

    fn bucket(&self, token: &str) -> usize {
        // DefaultHasher is only guaranteed stable within one compiled
        // binary; these vectors live in memory and are never persisted.
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions
    }
}

impl EmbeddingClient for HashedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in Self::tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Returns whether a char falls in the common CJK ranges.
const fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = HashedEmbedder::new("hashed-v1");
        let a = embedder.embed("gross margin declined").unwrap();
        let b = embedder.embed("gross margin declined").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalized() {
        let embedder = HashedEmbedder::new("hashed-v1");
        let v = embedder.embed("net profit increased year over year").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashedEmbedder::new("hashed-v1");
        let v = embedder.embed("").unwrap();
        assert!(v.iter().all(|x| x.abs() < f32::EPSILON));
    }

    #[test]
    fn test_overlapping_text_is_closer_than_unrelated() {
        let embedder = HashedEmbedder::new("hashed-v1");
        let q = embedder.embed("why did gross margin decline").unwrap();
        let related = embedder.embed("gross margin decline drivers").unwrap();
        let unrelated = embedder.embed("kubernetes pod scheduling policy").unwrap();
        assert!(cosine_similarity(&q, &related) > cosine_similarity(&q, &unrelated));
    }

    #[test]
    fn test_cjk_bigrams_give_overlap() {
        let embedder = HashedEmbedder::new("hashed-v1");
        let a = embedder.embed("毛利率下降的原因").unwrap();
        let b = embedder.embed("毛利率下降但净利润上升的原因").unwrap();
        assert!(cosine_similarity(&a, &b) > 0.5);
    }

    #[test]
    fn test_case_insensitive_ascii() {
        let embedder = HashedEmbedder::new("hashed-v1");
        let a = embedder.embed("Gross Margin").unwrap();
        let b = embedder.embed("gross margin").unwrap();
        assert_eq!(a, b);
    }
}
