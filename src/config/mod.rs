//! Configuration management.

use serde::Deserialize;
use std::path::Path;

/// Main configuration for metis.
#[derive(Debug, Clone)]
pub struct MetisConfig {
    /// Embedding client settings.
    pub embedding: EmbeddingConfig,
    /// Retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Prompt assembly settings.
    pub assembler: AssemblerConfig,
    /// Feedback ingestion settings.
    pub ingest: IngestConfig,
    /// Deadline for the external LLM dispatch in milliseconds.
    pub llm_timeout_ms: u64,
}

/// Embedding client configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Model id the embedding client must report. Pipeline construction
    /// rejects a client with a different id, since its vectors would be
    /// unqueryable under the configured model.
    pub model_id: String,
    /// Maximum retries for a failed embedding call.
    pub max_retries: u32,
    /// Backoff between retries in milliseconds (doubled per attempt).
    pub retry_backoff_ms: u64,
    /// Deadline for one embedding call in milliseconds.
    pub timeout_ms: u64,
    /// Maximum concurrent embedding calls (bulkhead permits).
    pub max_concurrent: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "text-embedding-v1".to_string(),
            max_retries: 2,
            retry_backoff_ms: 100,
            timeout_ms: 5_000,
            max_concurrent: 2,
        }
    }
}

impl EmbeddingConfig {
    /// Applies `METIS_EMBEDDING_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("METIS_EMBEDDING_MODEL_ID") {
            if !v.trim().is_empty() {
                self.model_id = v;
            }
        }
        if let Ok(v) = std::env::var("METIS_EMBEDDING_MAX_RETRIES") {
            if let Ok(parsed) = v.parse::<u32>() {
                self.max_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("METIS_EMBEDDING_RETRY_BACKOFF_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.retry_backoff_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("METIS_EMBEDDING_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.timeout_ms = parsed.max(1);
            }
        }
        if let Ok(v) = std::env::var("METIS_EMBEDDING_MAX_CONCURRENT") {
            if let Ok(parsed) = v.parse::<usize>() {
                self.max_concurrent = parsed.max(1);
            }
        }
        self
    }
}

/// Hybrid retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Maximum case results per query.
    pub k_case: usize,
    /// Maximum methodology results per query.
    pub k_method: usize,
    /// Additive boost applied when the query intent falls inside a
    /// methodology's applicability scope.
    pub boost_weight: f32,
    /// Entries whose final score falls below this are dropped.
    pub min_score: f32,
    /// Deadline for one corpus query (including query embedding) in
    /// milliseconds.
    pub corpus_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_case: 3,
            k_method: 2,
            boost_weight: 0.15,
            min_score: 0.35,
            corpus_timeout_ms: 2_000,
        }
    }
}

/// Prompt assembly configuration.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Maximum rendered prompt length in characters.
    pub budget: usize,
    /// Persona line rendered first. Never trimmed.
    pub persona: String,
    /// Execution instruction rendered before the question. Never trimmed.
    pub instruction: String,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            budget: 6_000,
            persona: "You are a rigorous analyst. Ground every conclusion in the \
                      reference material below."
                .to_string(),
            instruction: "Reason step by step in the style of the reference cases, \
                          then state your final answer."
                .to_string(),
        }
    }
}

/// Feedback ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Minimum (source-weighted) evaluation score for admission.
    pub min_score: f64,
    /// Per-source quality weights applied to the evaluation score when the
    /// ingested payload carries record provenance. First match wins.
    pub source_weights: Vec<(String, f64)>,
    /// Weight applied when the source label has no entry above.
    pub default_source_weight: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_score: 0.75,
            source_weights: vec![
                ("official_reports".to_string(), 1.2),
                ("internal_data".to_string(), 1.15),
                ("manual_upload".to_string(), 1.0),
                ("web_scraped".to_string(), 0.85),
            ],
            default_source_weight: 1.0,
        }
    }
}

impl IngestConfig {
    /// Returns the quality weight for a source label.
    #[must_use]
    pub fn source_weight(&self, source: &str) -> f64 {
        self.source_weights
            .iter()
            .find(|(label, _)| label == source)
            .map_or(self.default_source_weight, |(_, w)| *w)
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Embedding section.
    pub embedding: Option<ConfigFileEmbedding>,
    /// Retrieval section.
    pub retrieval: Option<ConfigFileRetrieval>,
    /// Assembler section.
    pub assembler: Option<ConfigFileAssembler>,
    /// Ingest section.
    pub ingest: Option<ConfigFileIngest>,
    /// LLM dispatch deadline in milliseconds.
    pub llm_timeout_ms: Option<u64>,
}

/// Embedding section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileEmbedding {
    /// Model id.
    pub model_id: Option<String>,
    /// Max retries.
    pub max_retries: Option<u32>,
    /// Retry backoff in milliseconds.
    pub retry_backoff_ms: Option<u64>,
    /// Per-call deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Bulkhead permits.
    pub max_concurrent: Option<usize>,
}

/// Retrieval section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRetrieval {
    /// Case corpus K.
    pub k_case: Option<usize>,
    /// Methodology corpus K.
    pub k_method: Option<usize>,
    /// Boost weight.
    pub boost_weight: Option<f32>,
    /// Minimum final score.
    pub min_score: Option<f32>,
    /// Corpus query deadline in milliseconds.
    pub corpus_timeout_ms: Option<u64>,
}

/// Assembler section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileAssembler {
    /// Character budget.
    pub budget: Option<usize>,
    /// Persona line.
    pub persona: Option<String>,
    /// Execution instruction.
    pub instruction: Option<String>,
}

/// Ingest section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileIngest {
    /// Acceptance threshold.
    pub min_score: Option<f64>,
    /// Ordered source weight rows; replaces the default table when present.
    pub source_weights: Option<Vec<ConfigFileSourceWeight>>,
    /// Weight for sources without a row above.
    pub default_source_weight: Option<f64>,
}

/// One source weight row in the config file.
#[derive(Debug, Deserialize)]
pub struct ConfigFileSourceWeight {
    /// Source label as it appears in record provenance.
    pub source: String,
    /// Multiplier applied to the evaluation score.
    pub weight: f64,
}

impl MetisConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: e.to_string(),
            })?;

        let file: ConfigFile =
            toml::from_str(&contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Converts a `ConfigFile` to `MetisConfig`, defaulting missing fields.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(embedding) = file.embedding {
            if let Some(model_id) = embedding.model_id {
                config.embedding.model_id = model_id;
            }
            if let Some(v) = embedding.max_retries {
                config.embedding.max_retries = v;
            }
            if let Some(v) = embedding.retry_backoff_ms {
                config.embedding.retry_backoff_ms = v;
            }
            if let Some(v) = embedding.timeout_ms {
                config.embedding.timeout_ms = v.max(1);
            }
            if let Some(v) = embedding.max_concurrent {
                config.embedding.max_concurrent = v.max(1);
            }
        }
        if let Some(retrieval) = file.retrieval {
            if let Some(v) = retrieval.k_case {
                config.retrieval.k_case = v;
            }
            if let Some(v) = retrieval.k_method {
                config.retrieval.k_method = v;
            }
            if let Some(v) = retrieval.boost_weight {
                config.retrieval.boost_weight = v;
            }
            if let Some(v) = retrieval.min_score {
                config.retrieval.min_score = v;
            }
            if let Some(v) = retrieval.corpus_timeout_ms {
                config.retrieval.corpus_timeout_ms = v;
            }
        }
        if let Some(assembler) = file.assembler {
            if let Some(v) = assembler.budget {
                config.assembler.budget = v;
            }
            if let Some(v) = assembler.persona {
                config.assembler.persona = v;
            }
            if let Some(v) = assembler.instruction {
                config.assembler.instruction = v;
            }
        }
        if let Some(ingest) = file.ingest {
            if let Some(v) = ingest.min_score {
                config.ingest.min_score = v;
            }
            if let Some(rows) = ingest.source_weights {
                config.ingest.source_weights = rows
                    .into_iter()
                    .map(|row| (row.source, row.weight))
                    .collect();
            }
            if let Some(v) = ingest.default_source_weight {
                config.ingest.default_source_weight = v;
            }
        }
        if let Some(v) = file.llm_timeout_ms {
            config.llm_timeout_ms = v;
        }

        config
    }

    /// Sets the embedding model id.
    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.embedding.model_id = model_id.into();
        self
    }

    /// Sets the prompt character budget.
    #[must_use]
    pub const fn with_budget(mut self, budget: usize) -> Self {
        self.assembler.budget = budget;
        self
    }
}

impl Default for MetisConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            assembler: AssemblerConfig::default(),
            ingest: IngestConfig::default(),
            llm_timeout_ms: 30_000,
        }
    }
}
