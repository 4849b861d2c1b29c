//! Async front door to an [`EmbeddingProvider`].
//!
//! Each attempt runs the provider on the blocking pool under a timeout.
//! Transient failures and timeouts are retried with exponential backoff;
//! fatal failures and exhausted retries surface as
//! [`MemoryError::EmbeddingUnavailable`]. Vectors are checked before they are
//! returned: wrong dimension, non-finite components or zero norm are rejected,
//! never replaced with a fallback.

use std::sync::Arc;
use std::time::Duration;

use super::{EmbeddingProvider, ProviderError};
use crate::config::EmbeddingConfig;
use crate::error::{MemoryError, Result};

/// Backoff schedule between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Delay before retry number `attempt + 1` (attempt counts from 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let ms = if base.is_finite() {
            (base as u64).min(self.max_backoff_ms)
        } else {
            self.max_backoff_ms
        };
        Duration::from_millis(ms)
    }
}

pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            policy: RetryPolicy::from_config(config),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
        }
    }

    pub fn with_policy(
        provider: Arc<dyn EmbeddingProvider>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            policy,
            timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed one text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::EmbeddingUnavailable("provider returned no vector".into()))
    }

    /// Embed several texts; output order matches input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut attempt = 0u32;
        loop {
            let failure = match self.attempt(texts).await {
                Ok(vectors) => {
                    self.check_vectors(&vectors, texts.len())?;
                    return Ok(vectors);
                }
                Err(e) => e,
            };

            if !failure.is_transient() || attempt >= self.policy.max_retries {
                tracing::error!(
                    attempts = attempt + 1,
                    model = self.model_name(),
                    error = %failure,
                    "embedding failed"
                );
                return Err(MemoryError::EmbeddingUnavailable(failure.to_string()));
            }

            let delay = self.policy.delay(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "retrying embedding request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One provider call on the blocking pool, bounded by the timeout.
    async fn attempt(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let provider = Arc::clone(&self.provider);
        let owned = texts.to_vec();
        let task = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
            provider.embed_batch(&refs)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ProviderError::Fatal(format!(
                "embedding task failed: {join_err}"
            ))),
            Err(_) => Err(ProviderError::Transient(format!(
                "embedding timed out after {} ms",
                self.timeout.as_millis()
            ))),
        }
    }

    fn check_vectors(&self, vectors: &[Vec<f32>], expected: usize) -> Result<()> {
        if vectors.len() != expected {
            return Err(MemoryError::EmbeddingUnavailable(format!(
                "provider returned {} vectors for {expected} inputs",
                vectors.len()
            )));
        }
        let dim = self.provider.dimensions();
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dim {
                return Err(MemoryError::EmbeddingUnavailable(format!(
                    "vector {i} has {} dimensions, expected {dim}",
                    v.len()
                )));
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(MemoryError::EmbeddingUnavailable(format!(
                    "vector {i} contains non-finite values"
                )));
            }
            if v.iter().map(|x| x * x).sum::<f32>() == 0.0 {
                return Err(MemoryError::EmbeddingUnavailable(format!(
                    "vector {i} has zero norm"
                )));
            }
        }
        Ok(())
    }
}
