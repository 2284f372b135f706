//! Bulkhead pattern for embedding calls.
//!
//! Embedding is a slow, externally dispatched operation; the bulkhead caps
//! how many calls run at once so that a burst of ingestion work cannot
//! starve unrelated read queries. Uses a semaphore-based approach.

use super::EmbeddingClient;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Configuration for the embedding bulkhead.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum concurrent embedding operations allowed.
    pub max_concurrent: usize,
    /// Timeout for acquiring a permit in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Whether to fail immediately when the bulkhead is full.
    pub fail_fast: bool,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            acquire_timeout_ms: 30_000,
            fail_fast: false,
        }
    }
}

impl BulkheadConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_concurrent: 2,
            acquire_timeout_ms: 30_000,
            fail_fast: false,
        }
    }

    /// Sets the maximum concurrent operations.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the permit acquisition timeout.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Sets whether to fail fast when full.
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// Embedding client wrapper with concurrency limiting.
pub struct BulkheadClient<C: EmbeddingClient> {
    inner: C,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
}

impl<C: EmbeddingClient> BulkheadClient<C> {
    /// Creates a new bulkhead-wrapped client.
    #[must_use]
    pub fn new(inner: C, config: BulkheadConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner,
            config,
            semaphore,
        }
    }

    /// Returns the current number of available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn acquire_permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            metrics::counter!("embedding_bulkhead_permits_acquired_total").increment(1);
            return Ok(permit);
        }

        if self.config.fail_fast {
            metrics::counter!("embedding_bulkhead_rejections_total", "reason" => "full")
                .increment(1);
            return Err(Error::OperationFailed {
                operation: "embedding_bulkhead_acquire".to_string(),
                cause: format!(
                    "embedding bulkhead full (max: {})",
                    self.config.max_concurrent
                ),
            });
        }

        let timeout = Duration::from_millis(self.config.acquire_timeout_ms.max(1));
        let start = std::time::Instant::now();
        loop {
            if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
                metrics::counter!("embedding_bulkhead_permits_acquired_total").increment(1);
                return Ok(permit);
            }
            if start.elapsed() >= timeout {
                metrics::counter!("embedding_bulkhead_rejections_total", "reason" => "timeout")
                    .increment(1);
                return Err(Error::Timeout {
                    operation: "embedding_bulkhead_acquire".to_string(),
                    elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl<C: EmbeddingClient> EmbeddingClient for BulkheadClient<C> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self.acquire_permit()?;
        tracing::trace!("acquired embedding bulkhead permit");
        self.inner.embed(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;

    #[test]
    fn test_config_builder() {
        let config = BulkheadConfig::new()
            .with_max_concurrent(4)
            .with_acquire_timeout_ms(10_000)
            .with_fail_fast(true);
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.acquire_timeout_ms, 10_000);
        assert!(config.fail_fast);
    }

    #[test]
    fn test_allows_operations_within_limit() {
        let bulkhead = BulkheadClient::new(HashedEmbedder::new("m"), BulkheadConfig::default());
        let result = bulkhead.embed("margin analysis");
        assert!(result.is_ok());
        assert_eq!(bulkhead.available_permits(), 2);
    }

    struct SlowClient;

    impl EmbeddingClient for SlowClient {
        fn model_id(&self) -> &str {
            "slow"
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            std::thread::sleep(Duration::from_millis(100));
            Ok(vec![0.0, 1.0])
        }
    }

    #[test]
    fn test_fail_fast_when_full() {
        let config = BulkheadConfig::new()
            .with_max_concurrent(1)
            .with_fail_fast(true);
        let bulkhead = Arc::new(BulkheadClient::new(SlowClient, config));

        let background = Arc::clone(&bulkhead);
        let handle = std::thread::spawn(move || background.embed("slow"));
        std::thread::sleep(Duration::from_millis(20));

        let result = bulkhead.embed("fast");
        let _ = handle.join();

        if let Err(err) = result {
            assert!(err.to_string().contains("bulkhead full"));
        }
    }

    #[test]
    fn test_metadata_passthrough() {
        let bulkhead = BulkheadClient::new(HashedEmbedder::new("m"), BulkheadConfig::default());
        assert_eq!(bulkhead.model_id(), "m");
        assert_eq!(bulkhead.dimensions(), 256);
    }
}
