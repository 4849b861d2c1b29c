//! OpenAI-compatible HTTP embedding provider.
//!
//! `POST {api_base}/embeddings` with `{"model", "input", "dimensions"}` and a
//! bearer token. Rate limits, server errors and connection failures are
//! reported as [`ProviderError::Transient`]; everything else is fatal.

use std::time::Duration;

use anyhow::Result;

use super::{l2_normalize, EmbeddingProvider, ProviderError, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// Longest slice of an error body quoted in a provider error.
const ERROR_BODY_PREVIEW: usize = 240;

pub struct HttpEmbeddingProvider {
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_base = config.api_base.trim_end_matches('/').to_string();
        anyhow::ensure!(!api_base.is_empty(), "embedding.api_base must not be empty");
        anyhow::ensure!(!config.model.trim().is_empty(), "embedding.model must not be empty");

        tracing::info!(
            api_base = %api_base,
            model = %config.model,
            "http embedding provider configured"
        );

        Ok(Self {
            api_base,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
        })
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::Fatal("embedding response was empty".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // The blocking client owns a runtime; build and drop it on this
        // (blocking) thread rather than holding it across async contexts.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::Fatal(format!("failed to build embedding client: {e}")))?;

        let mut request = client
            .post(format!("{}/embeddings", self.api_base))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
                "dimensions": EMBEDDING_DIM,
            }));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = format!(
                "embedding request failed with status {}: {}",
                status.as_u16(),
                body.chars().take(ERROR_BODY_PREVIEW).collect::<String>()
            );
            return Err(if is_transient_status(status.as_u16()) {
                ProviderError::Transient(message)
            } else {
                ProviderError::Fatal(message)
            });
        }

        let payload = response
            .json::<serde_json::Value>()
            .map_err(|e| ProviderError::Fatal(format!("failed to parse embedding response: {e}")))?;

        parse_embeddings(&payload, texts.len())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn classify_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ProviderError::Transient(format!("embedding request failed: {e}"))
    } else {
        ProviderError::Fatal(format!("embedding request failed: {e}"))
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

/// Pull `data[*].embedding` out of the response, ordered by `index` when present.
fn parse_embeddings(
    payload: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = payload
        .get("data")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| ProviderError::Fatal("embedding response missing data array".into()))?;
    if data.len() != expected {
        return Err(ProviderError::Fatal(format!(
            "embedding response size mismatch: expected {expected}, got {}",
            data.len()
        )));
    }

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(serde_json::Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        let raw = item
            .get("embedding")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| ProviderError::Fatal("embedding item missing embedding array".into()))?;
        let vector = raw
            .iter()
            .map(|component| {
                component
                    .as_f64()
                    .map(|value| value as f32)
                    .ok_or_else(|| {
                        ProviderError::Fatal("embedding component must be numeric".into())
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if vector.len() != EMBEDDING_DIM {
            return Err(ProviderError::Fatal(format!(
                "embedding has {} dimensions, expected {EMBEDDING_DIM}",
                vector.len()
            )));
        }
        indexed.push((index, l2_normalize(&vector)));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
