//! Read-only view of the external record store.
//!
//! The record store (CRUD UI, file upload, graph visualization) lives
//! outside this crate. Ingestion may read a record's content and tags as raw
//! material for a new case but never owns or mutates record lifecycle.

use serde::{Deserialize, Serialize};

/// One record as exposed by the external record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Record id (UUID assigned by the store).
    pub id: String,
    /// Display name, typically the uploaded file name.
    pub name: String,
    /// Source label, e.g. "official_reports", "web_scraped".
    pub source: String,
    /// MIME-like type string.
    #[serde(rename = "type")]
    pub record_type: String,
    /// Classification tags.
    pub tags: Vec<String>,
    /// Lifecycle status in the store ("new", "classified", ...).
    pub status: String,
    /// Content summary or extracted text.
    pub content: String,
    /// Quality score in [0, 1] assigned by the store's processor.
    pub quality_score: f64,
    /// Creation timestamp (ISO 8601 string, as the store emits it).
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_deserializes_store_shape() {
        let json = r#"{
            "id": "7c3a", "name": "q2_report.txt", "source": "official_reports",
            "type": "text/plain", "tags": ["finance", "报告"], "status": "classified",
            "content": "Revenue grew 12%...", "quality_score": 0.82,
            "created_at": "2026-05-01T09:00:00Z"
        }"#;
        let record: SourceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.record_type, "text/plain");
        assert_eq!(record.tags.len(), 2);
        assert!((record.quality_score - 0.82).abs() < f64::EPSILON);
    }
}
