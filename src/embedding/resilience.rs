//! Deadline and retry wrapper for embedding calls.
//!
//! Every embedding call carries a per-attempt deadline; failed attempts are
//! retried with bounded exponential backoff. Once retries are exhausted the
//! error collapses to [`Error::EmbeddingUnavailable`] so callers can apply
//! the degradation policy (skip corpus, persist-but-flag-unindexed).

use super::EmbeddingClient;
use crate::config::EmbeddingConfig;
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Embedding client wrapper with per-attempt deadline and bounded retry.
pub struct ResilientEmbeddingClient {
    inner: Arc<dyn EmbeddingClient>,
    max_retries: u32,
    backoff: Duration,
    timeout: Duration,
}

impl ResilientEmbeddingClient {
    /// Wraps a client using the retry/deadline settings from `config`.
    #[must_use]
    pub fn new(inner: Arc<dyn EmbeddingClient>, config: &EmbeddingConfig) -> Self {
        Self {
            inner,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
        }
    }

    /// Runs one embedding attempt on a background thread, bounded by the
    /// configured deadline.
    ///
    /// On timeout the result is discarded and the thread completes in the
    /// background; Rust threads cannot be killed, and embedding calls finish
    /// quickly once the service responds.
    fn attempt(&self, text: &str) -> Result<Vec<f32>> {
        let inner = Arc::clone(&self.inner);
        let owned = text.to_string();
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();

        std::thread::spawn(move || {
            let _ = tx.send(inner.embed(&owned));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                metrics::counter!("embedding_timeouts_total").increment(1);
                Err(Error::Timeout {
                    operation: "embed".to_string(),
                    elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                })
            },
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::OperationFailed {
                operation: "embed".to_string(),
                cause: "embedding worker dropped without result".to_string(),
            }),
        }
    }
}

impl EmbeddingClient for ResilientEmbeddingClient {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let max_attempts = self.max_retries + 1;
        let mut backoff = self.backoff;
        let mut last_cause = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(text) {
                Ok(vector) => {
                    metrics::counter!("embedding_requests_total", "status" => "success")
                        .increment(1);
                    return Ok(vector);
                },
                Err(err) => {
                    metrics::counter!("embedding_requests_total", "status" => "error")
                        .increment(1);
                    last_cause = err.to_string();
                    if attempt < max_attempts {
                        tracing::warn!(
                            attempt,
                            max_attempts,
                            "embedding call failed, retrying: {last_cause}"
                        );
                        metrics::counter!("embedding_retries_total").increment(1);
                        if !backoff.is_zero() {
                            std::thread::sleep(backoff);
                            backoff = backoff.saturating_mul(2);
                        }
                    }
                },
            }
        }

        Err(Error::EmbeddingUnavailable(format!(
            "{max_attempts} attempt(s) failed, last error: {last_cause}"
        )))
    }
}
