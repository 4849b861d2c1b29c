//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait, three implementations (local ONNX,
//! OpenAI-compatible HTTP, deterministic hashing) and the [`gateway`] that wraps
//! a provider with a per-call timeout, retries and output validation. Providers
//! are created via [`create_provider`] from configuration.

pub mod gateway;
pub mod hashed;
pub mod http;
pub mod local;

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

pub use gateway::EmbeddingGateway;

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Provider failure, classified for the retry loop.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Worth retrying: timeouts, connection failures, rate limits, 5xx.
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying will not help: bad credentials, malformed responses, model errors.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`EMBEDDING_DIM`] dimensions.
/// All methods are synchronous. Callers in async contexts go through
/// [`EmbeddingGateway`], which runs them on the blocking pool.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError>;

    /// Embed a batch of text strings, preserving order. Implementations may
    /// override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Identifier recorded in `schema_meta` and logs.
    fn model_name(&self) -> &str;
}

/// Create an embedding provider from config.
///
/// `local` returns an error if model files are not found; run
/// `mnemos model download` first.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Arc::new(provider))
        }
        "http" => {
            let provider = http::HttpEmbeddingProvider::new(config)?;
            Ok(Arc::new(provider))
        }
        "hashed" => Ok(Arc::new(hashed::HashedEmbeddingProvider::new(EMBEDDING_DIM))),
        other => anyhow::bail!(
            "unknown embedding provider: {other}. Supported: local, http, hashed"
        ),
    }
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;

    #[test]
    fn test_l2_normalize() {
        let v = vec![3.0, 4.0];
        let normalized = l2_normalize(&v);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let v = vec![0.0, 0.0, 0.0];
        assert_eq!(l2_normalize(&v), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn create_hashed_provider() {
        let config = EmbeddingConfig {
            provider: "hashed".into(),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.dimensions(), EMBEDDING_DIM);
        assert_eq!(provider.model_name(), hashed::HASHED_MODEL_NAME);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "telepathy".into(),
            ..Default::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("unknown embedding provider"));
    }

    #[test]
    fn provider_error_classification() {
        assert!(ProviderError::Transient("429".into()).is_transient());
        assert!(!ProviderError::Fatal("401".into()).is_transient());
    }
}
