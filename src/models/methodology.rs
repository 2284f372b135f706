//! Methodology card types.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique identifier for a methodology card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(String);

impl MethodId {
    /// Creates a new method ID.
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

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MethodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One generic step of a reasoning framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodStep {
    /// 1-based position.
    pub step: u32,
    /// Short name of the step.
    pub action: String,
    /// The guidance prompt for this step.
    pub prompt: String,
}

/// A stored abstract reasoning framework with a declared applicability scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodologyCard {
    /// Unique identifier.
    pub method_id: MethodId,
    /// Human-readable name.
    pub name: String,
    /// What the framework does and when to use it.
    pub description: String,
    /// Intent labels this methodology is eligible for (matched
    /// case-insensitively during retrieval boosting).
    pub applicability_scope: BTreeSet<String>,
    /// Ordered generic steps.
    pub steps: Vec<MethodStep>,
    /// Optional short cue pointing at a typical example.
    pub example_cue: Option<String>,
}

impl MethodologyCard {
    /// Returns the canonical text embedded for this card: name, description,
    /// and the applicability scope joined.
    #[must_use]
    pub fn canonical_text(&self) -> String {
        let scope = self
            .applicability_scope
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        format!("{}\n{}\n{scope}", self.name, self.description)
    }

    /// Returns whether the given intent label falls inside the applicability
    /// scope. Comparison is case-insensitive on both sides.
    #[must_use]
    pub fn applies_to(&self, intent_label: &str) -> bool {
        let needle = intent_label.to_lowercase();
        self.applicability_scope
            .iter()
            .any(|s| s.to_lowercase() == needle)
    }

    /// Validates the structural invariants of the card.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMethodology`] when the name or description
    /// is blank, or step indices are not contiguous from 1.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::MalformedMethodology("name is empty".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(Error::MalformedMethodology("description is empty".to_string()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            let expected = u32::try_from(i).unwrap_or(u32::MAX).saturating_add(1);
            if step.step != expected {
                return Err(Error::MalformedMethodology(format!(
                    "step indices must be contiguous from 1: position {i} has step {}",
                    step.step
                )));
            }
        }
        Ok(())
    }
}
