//! Domain models: cases, methodologies, manifests, external records.

mod case;
mod manifest;
mod methodology;
mod record;

pub use case::{CaseId, CaseMetadata, ChainOfThoughtCase, ThoughtStep};
pub use manifest::{EntityRef, PromptManifest};
pub use methodology::{MethodId, MethodStep, MethodologyCard};
pub use record::SourceRecord;
