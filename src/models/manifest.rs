//! Prompt manifest types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A versioned reference to a stored entity (case or methodology).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// The entity's logical id.
    pub id: String,
    /// The specific version used.
    pub version: u32,
}

impl EntityRef {
    /// Creates a new reference.
    #[must_use]
    pub fn new(id: impl Into<String>, version: u32) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.id, self.version)
    }
}

/// The assembled prompt plus the exact versioned entities it was built from.
///
/// Given the manifest and the corpora, the rendered text can be reproduced
/// byte-for-byte: the refs are listed in rendered order and nothing outside
/// them contributed retrieved content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptManifest {
    /// The rendered prompt text.
    pub text: String,
    /// Case references that survived trimming, in rendered order.
    pub case_refs: Vec<EntityRef>,
    /// Methodology references that survived trimming, in rendered order.
    pub method_refs: Vec<EntityRef>,
    /// Whether any pipeline stage fell back to a partial result
    /// (timed-out corpus, unavailable embedding service, trimmed sections
    /// do not count).
    pub degraded: bool,
}

impl PromptManifest {
    /// Returns the case ids in rendered order, without versions.
    #[must_use]
    pub fn case_ids(&self) -> Vec<&str> {
        self.case_refs.iter().map(|r| r.id.as_str()).collect()
    }

    /// Returns the methodology ids in rendered order, without versions.
    #[must_use]
    pub fn method_ids(&self) -> Vec<&str> {
        self.method_refs.iter().map(|r| r.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_display() {
        let r = EntityRef::new("cot-00123", 2);
        assert_eq!(r.to_string(), "cot-00123@v2");
    }

    #[test]
    fn test_manifest_id_accessors() {
        let manifest = PromptManifest {
            text: String::new(),
            case_refs: vec![EntityRef::new("cot-1", 1), EntityRef::new("cot-2", 3)],
            method_refs: vec![EntityRef::new("m-1", 1)],
            degraded: false,
        };
        assert_eq!(manifest.case_ids(), vec!["cot-1", "cot-2"]);
        assert_eq!(manifest.method_ids(), vec!["m-1"]);
    }

    #[test]
    fn test_manifest_serde_round_trip() {
        let manifest = PromptManifest {
            text: "prompt".to_string(),
            case_refs: vec![EntityRef::new("cot-1", 1)],
            method_refs: Vec::new(),
            degraded: true,
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let back: PromptManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }
}
