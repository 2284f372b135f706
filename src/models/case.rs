//! Chain-of-thought case types and identifiers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Unique identifier for a chain-of-thought case.
///
/// Identifies a *logical* case; a specific revision is addressed by the pair
/// `(CaseId, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    /// Creates a new case ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CaseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CaseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One step of a recorded reasoning trace.
///
/// Step indices are contiguous starting at 1 and their order is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoughtStep {
    /// 1-based position in the trace.
    pub step: u32,
    /// Short name of what the step does.
    pub action: String,
    /// Full description of the step.
    pub detail: String,
}

/// Metadata attached to a stored case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMetadata {
    /// Problem domain, e.g. "finance".
    pub domain: String,
    /// Difficulty label, e.g. "easy", "hard".
    pub difficulty: String,
    /// Keyword set for browsing and filtering.
    pub keywords: BTreeSet<String>,
    /// Monotonically increasing revision number, starting at 1.
    pub version: u32,
}

impl Default for CaseMetadata {
    fn default() -> Self {
        Self {
            domain: String::new(),
            difficulty: String::new(),
            keywords: BTreeSet::new(),
            version: 1,
        }
    }
}

/// A stored worked example: a question, an ordered reasoning trace, and a
/// final answer.
///
/// Cases are immutable once stored. An edit produces a new case with a
/// higher `metadata.version` under the same logical id; prior versions stay
/// addressable so that prompt manifests referencing them remain
/// reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOfThoughtCase {
    /// Logical identifier.
    pub id: CaseId,
    /// The question this case answers.
    pub question: String,
    /// Ordered reasoning trace.
    pub thought_process: Vec<ThoughtStep>,
    /// The final answer.
    pub final_answer: String,
    /// Attached metadata, including the revision number.
    pub metadata: CaseMetadata,
}

impl ChainOfThoughtCase {
    /// Returns the canonical text embedded for this case.
    ///
    /// The same text must be re-embedded whenever it changes, which always
    /// happens through a new version rather than in-place mutation.
    #[must_use]
    pub fn canonical_text(&self) -> String {
        format!("{}\n{}", self.question, self.final_answer)
    }

    /// Computes the content hash used for deduplication at ingestion.
    ///
    /// Covers question, thought process, and final answer. Text is
    /// normalized (trimmed, lowercased, whitespace collapsed) so that
    /// formatting-only variants hash identically. Returns the lowercase
    /// hex-encoded SHA256 digest (64 chars).
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalize(&self.question).as_bytes());
        hasher.update([0u8]);
        for step in &self.thought_process {
            hasher.update(step.step.to_le_bytes());
            hasher.update(normalize(&step.action).as_bytes());
            hasher.update([0u8]);
            hasher.update(normalize(&step.detail).as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(normalize(&self.final_answer).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Validates the structural invariants of the case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedCase`] when the question or final answer is
    /// blank, the trace is empty, or step indices are not contiguous from 1.
    pub fn validate(&self) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(Error::MalformedCase("question is empty".to_string()));
        }
        if self.final_answer.trim().is_empty() {
            return Err(Error::MalformedCase("final answer is empty".to_string()));
        }
        if self.thought_process.is_empty() {
            return Err(Error::MalformedCase("thought process is empty".to_string()));
        }
        for (i, step) in self.thought_process.iter().enumerate() {
            let expected = u32::try_from(i).unwrap_or(u32::MAX).saturating_add(1);
            if step.step != expected {
                return Err(Error::MalformedCase(format!(
                    "step indices must be contiguous from 1: position {i} has step {}",
                    step.step
                )));
            }
            if step.action.trim().is_empty() {
                return Err(Error::MalformedCase(format!("step {expected} has an empty action")));
            }
        }
        if self.metadata.version == 0 {
            return Err(Error::MalformedCase("version must start at 1".to_string()));
        }
        Ok(())
    }
}

/// Normalizes text for hashing: trim, lowercase, collapse whitespace.
fn normalize(content: &str) -> String {
    content
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
