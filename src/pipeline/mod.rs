//! The query pipeline: the crate's main API surface.
//!
//! A query moves through fixed stages: received, classified, retrieved,
//! assembled, dispatched. Failures degrade stage by stage rather than
//! failing the query: a lost corpus shrinks the context, a lost embedding
//! service shrinks it further, and a timed-out LLM still leaves the caller
//! holding the assembled manifest with `degraded` set.

use crate::assembler::PromptAssembler;
use crate::config::MetisConfig;
use crate::embedding::{BulkheadClient, BulkheadConfig, EmbeddingClient, ResilientEmbeddingClient};
use crate::index::EmbeddingIndex;
use crate::ingest::{CasePayload, FeedbackIngestor, IngestOutcome};
use crate::intent::IntentClassifier;
use crate::models::{ChainOfThoughtCase, MethodologyCard, PromptManifest};
use crate::retriever::{HybridRetriever, RetrievedContext};
use crate::store::{CaseStore, MethodologyStore};
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// External LLM dispatch target.
///
/// Implementations are expected to be remote and slow; the pipeline bounds
/// every call with the configured deadline.
pub trait LlmService: Send + Sync {
    /// Generates a completion for the assembled prompt.
    ///
    /// # Errors
    ///
    /// Returns an error when the service cannot produce a completion.
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// The result of a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResponse {
    /// The LLM answer, absent when dispatch timed out or failed.
    pub answer: Option<String>,
    /// The assembled prompt and its exact entity references.
    pub manifest: PromptManifest,
}

/// Orchestrates classification, retrieval, assembly, ingestion, and
/// dispatch over shared corpora.
pub struct QueryPipeline {
    classifier: IntentClassifier,
    retriever: HybridRetriever,
    assembler: PromptAssembler,
    ingestor: FeedbackIngestor,
    cases: Arc<dyn CaseStore>,
    methods: Arc<dyn MethodologyStore>,
    case_index: Arc<EmbeddingIndex>,
    method_index: Arc<EmbeddingIndex>,
    llm_timeout: Duration,
}

impl std::fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPipeline").finish_non_exhaustive()
    }
}

impl QueryPipeline {
    /// Builds a pipeline over the given embedding client and stores.
    ///
    /// The client is wrapped in the concurrency bulkhead and the
    /// retry/deadline layer before either corpus index sees it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] when the assembler budget cannot
    /// hold the prompt skeleton, or when the embedding client reports a
    /// different model id than the configuration expects. Accepting the
    /// mismatch would fill the indices with vectors the configured model
    /// cannot query against.
    pub fn new(
        config: MetisConfig,
        client: Arc<dyn EmbeddingClient>,
        cases: Arc<dyn CaseStore>,
        methods: Arc<dyn MethodologyStore>,
    ) -> Result<Self> {
        if client.model_id() != config.embedding.model_id {
            return Err(Error::MalformedInput(format!(
                "embedding client reports model '{}' but configuration expects '{}'",
                client.model_id(),
                config.embedding.model_id
            )));
        }
        let bulkhead = BulkheadClient::new(
            client,
            BulkheadConfig::new()
                .with_max_concurrent(config.embedding.max_concurrent)
                .with_acquire_timeout_ms(config.embedding.timeout_ms),
        );
        let resilient: Arc<dyn EmbeddingClient> = Arc::new(ResilientEmbeddingClient::new(
            Arc::new(bulkhead),
            &config.embedding,
        ));

        let case_index = Arc::new(EmbeddingIndex::new("cases", Arc::clone(&resilient)));
        let method_index = Arc::new(EmbeddingIndex::new("methods", resilient));

        let retriever = HybridRetriever::new(
            Arc::clone(&case_index),
            Arc::clone(&method_index),
            Arc::clone(&methods),
            config.retrieval,
        );
        let assembler = PromptAssembler::new(config.assembler)?;
        let ingestor =
            FeedbackIngestor::new(Arc::clone(&cases), Arc::clone(&case_index), config.ingest);

        Ok(Self {
            classifier: IntentClassifier::default(),
            retriever,
            assembler,
            ingestor,
            cases,
            methods,
            case_index,
            method_index,
            llm_timeout: Duration::from_millis(config.llm_timeout_ms.max(1)),
        })
    }

    /// Replaces the default intent classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Registers a methodology card: validates it, stores it, and indexes
    /// its canonical text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMethodology`] for invalid cards and
    /// [`Error::EmbeddingUnavailable`] when the card cannot be indexed.
    pub fn register_methodology(&self, card: MethodologyCard) -> Result<()> {
        card.validate()?;
        let id = card.method_id.to_string();
        let text = card.canonical_text();
        self.methods.put(card);
        self.method_index.upsert(&id, 1, &text)
    }

    /// Registers a pre-built case, e.g. when bootstrapping the corpus from
    /// curated data. Unlike [`Self::ingest_feedback`] this keeps the case's
    /// own id and version and skips the admission policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedCase`] for invalid cases and
    /// [`Error::EmbeddingUnavailable`] when the case cannot be indexed.
    pub fn register_case(&self, case: ChainOfThoughtCase) -> Result<()> {
        case.validate()?;
        let id = case.id.to_string();
        let version = case.metadata.version;
        let text = case.canonical_text();
        self.cases.put(case);
        self.case_index.upsert(&id, version, &text)
    }

    /// Classifies and retrieves context for a question.
    #[must_use]
    pub fn submit_query(&self, question: &str) -> RetrievedContext {
        let span = tracing::info_span!("submit_query");
        let _guard = span.enter();
        metrics::counter!("pipeline_queries_total").increment(1);
        let intent = self.classifier.classify(question);
        self.retriever.retrieve(question, intent)
    }

    /// Assembles a prompt from previously retrieved context.
    ///
    /// Hits whose backing entity has vanished from the store are skipped
    /// with a warning rather than failing the prompt. The manifest carries
    /// the context's `degraded` flag.
    #[must_use]
    pub fn assemble_prompt(&self, question: &str, ctx: &RetrievedContext) -> PromptManifest {
        let mut cases: Vec<(ChainOfThoughtCase, f32)> = Vec::with_capacity(ctx.cases.len());
        for hit in &ctx.cases {
            match self.cases.get(&hit.entity.id.as_str().into(), hit.entity.version) {
                Some(case) => cases.push((case, hit.score)),
                None => {
                    tracing::warn!(entity = %hit.entity, "retrieved case missing from store");
                },
            }
        }
        let mut methods: Vec<(MethodologyCard, f32)> = Vec::with_capacity(ctx.methods.len());
        for hit in &ctx.methods {
            match self.methods.get(&hit.entity.id.as_str().into()) {
                Some(card) => methods.push((card, hit.score)),
                None => {
                    tracing::warn!(entity = %hit.entity, "retrieved methodology missing from store");
                },
            }
        }

        let mut manifest = self.assembler.assemble(question, &cases, &methods);
        manifest.degraded = ctx.degraded;
        manifest
    }

    /// Runs the full pipeline: classify, retrieve, assemble, dispatch.
    ///
    /// The LLM call is bounded by the configured deadline. On timeout or
    /// dispatch failure the response carries no answer, the manifest is
    /// flagged degraded, and no error is surfaced.
    #[must_use]
    pub fn run(&self, question: &str, llm: Arc<dyn LlmService>) -> PipelineResponse {
        let span = tracing::info_span!("pipeline_run");
        let _guard = span.enter();
        let started = Instant::now();

        let ctx = self.submit_query(question);
        let mut manifest = self.assemble_prompt(question, &ctx);

        let answer = match dispatch_with_deadline(llm, &manifest.text, self.llm_timeout) {
            Ok(answer) => Some(answer),
            Err(err) => {
                metrics::counter!("pipeline_dispatch_failures_total").increment(1);
                tracing::warn!("llm dispatch degraded: {err}");
                manifest.degraded = true;
                None
            },
        };

        metrics::histogram!("pipeline_duration_seconds").record(started.elapsed().as_secs_f64());
        PipelineResponse { answer, manifest }
    }

    /// Ingests reviewed feedback into the case corpus.
    ///
    /// # Errors
    ///
    /// See [`FeedbackIngestor::ingest`].
    pub fn ingest_feedback(
        &self,
        payload: CasePayload,
        evaluation_score: f64,
        review_approved: bool,
    ) -> Result<IngestOutcome> {
        self.ingestor.ingest(payload, evaluation_score, review_approved)
    }

    /// Retries indexing for cases stored during an embedding outage.
    pub fn reindex_unindexed(&self) -> usize {
        self.ingestor.reindex_unindexed()
    }
}

/// Dispatches one LLM call on a background thread under a deadline.
fn dispatch_with_deadline(
    llm: Arc<dyn LlmService>,
    prompt: &str,
    deadline: Duration,
) -> Result<String> {
    let prompt = prompt.to_string();
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    std::thread::spawn(move || {
        let _ = tx.send(llm.generate(&prompt));
    });

    match rx.recv_timeout(deadline) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            metrics::counter!("pipeline_llm_timeouts_total").increment(1);
            Err(Error::Timeout {
                operation: "llm_generate".to_string(),
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            })
        },
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::OperationFailed {
            operation: "llm_generate".to_string(),
            cause: "llm worker dropped without result".to_string(),
        }),
    }
}
