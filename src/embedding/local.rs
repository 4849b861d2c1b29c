//! Local ONNX Runtime embedding provider.
//!
//! Implements [`EmbeddingProvider`] using the all-MiniLM-L6-v2 model via `ort`.
//! Handles tokenization, inference, mean pooling, and L2 normalization. Every
//! failure here is deterministic for a given input, so all are reported as
//! [`ProviderError::Fatal`].

use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider, ProviderError, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256).
const MAX_SEQ_LEN: usize = 256;

/// Local ONNX-based embedding provider using all-MiniLM-L6-v2.
pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model: String,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
// The Mutex guarantees exclusive access during run().
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `mnemos model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `mnemos model download` first.",
            tokenizer_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(tokenizer = %tokenizer_path.display(), "tokenizer loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model: config.model.clone(),
        })
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| ProviderError::Fatal("batch of one produced no embedding".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.run_batch(texts).map_err(|e| ProviderError::Fatal(format!("{e:#}")))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Token ids and attention mask for a padded batch, flattened row-major.
struct EncodedBatch {
    ids: Vec<i64>,
    mask: Vec<i64>,
    rows: usize,
    width: usize,
}

impl EncodedBatch {
    fn shape(&self) -> Vec<i64> {
        vec![self.rows as i64, self.width as i64]
    }
}

impl LocalEmbeddingProvider {
    fn encode(&self, texts: &[&str]) -> Result<EncodedBatch> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        // BatchLongest padding gives every row the same width
        let width = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);
        let mut batch = EncodedBatch {
            ids: Vec::with_capacity(encodings.len() * width),
            mask: Vec::with_capacity(encodings.len() * width),
            rows: encodings.len(),
            width,
        };
        for encoding in &encodings {
            batch.ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            batch.mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }
        Ok(batch)
    }

    fn run_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let batch = self.encode(texts)?;

        let input_ids = Tensor::from_array((batch.shape(), batch.ids.clone().into_boxed_slice()))?;
        let attention_mask =
            Tensor::from_array((batch.shape(), batch.mask.clone().into_boxed_slice()))?;
        // Single-segment input
        let token_type_ids = Tensor::from_array((
            batch.shape(),
            vec![0i64; batch.rows * batch.width].into_boxed_slice(),
        ))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids,
        })?;

        // Output naming differs between exports
        let hidden = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (shape, data) = hidden
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] as usize == batch.rows && dims[2] == EMBEDDING_DIM as i64,
            "unexpected token embedding shape {dims:?}, expected [{}, seq, {EMBEDDING_DIM}]",
            batch.rows
        );

        Ok(mean_pool(data, &batch.mask, batch.width, dims[1] as usize, EMBEDDING_DIM)
            .iter()
            .map(|v| l2_normalize(v))
            .collect())
    }
}

/// Average each row's token vectors over the positions its mask keeps.
///
/// `token_embeddings` is `[rows, seq_len, dim]`; `mask` is `[rows, mask_width]`.
/// A row with nothing kept pools to zeros.
fn mean_pool(
    token_embeddings: &[f32],
    mask: &[i64],
    mask_width: usize,
    seq_len: usize,
    dim: usize,
) -> Vec<Vec<f32>> {
    let rows = if mask_width == 0 { 0 } else { mask.len() / mask_width };
    (0..rows)
        .map(|row| {
            let mut pooled = vec![0.0f32; dim];
            let mut kept = 0.0f32;
            for pos in 0..seq_len.min(mask_width) {
                if mask[row * mask_width + pos] == 0 {
                    continue;
                }
                let offset = (row * seq_len + pos) * dim;
                for (acc, x) in pooled.iter_mut().zip(&token_embeddings[offset..offset + dim]) {
                    *acc += x;
                }
                kept += 1.0;
            }
            if kept > 0.0 {
                pooled.iter_mut().for_each(|x| *x /= kept);
            }
            pooled
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_pool_skips_padding() {
        // 2 rows, 3 positions, dim 2; second row has one padded position
        let tokens = [
            1.0, 0.0, 3.0, 0.0, 5.0, 0.0, //
            0.0, 2.0, 0.0, 4.0, 9.0, 9.0,
        ];
        let mask = [1, 1, 1, 1, 1, 0];
        let pooled = mean_pool(&tokens, &mask, 3, 3, 2);
        assert_eq!(pooled, vec![vec![3.0, 0.0], vec![0.0, 3.0]]);
    }

    #[test]
    fn mean_pool_of_fully_masked_row_is_zero() {
        let pooled = mean_pool(&[1.0, 1.0], &[0], 1, 1, 2);
        assert_eq!(pooled, vec![vec![0.0, 0.0]]);
        assert!(mean_pool(&[], &[], 0, 0, 2).is_empty());
    }

    #[test]
    fn missing_model_files_point_at_download() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig {
            provider: "local".into(),
            cache_dir: dir.path().display().to_string(),
            ..Default::default()
        };
        let err = LocalEmbeddingProvider::new(&config).err().unwrap();
        assert!(err.to_string().contains("mnemos model download"));
    }

    #[test]
    #[ignore] // Requires model files: run `mnemos model download`, then cargo test -- --ignored
    fn downloaded_model_embeds_and_ranks() {
        let provider = LocalEmbeddingProvider::new(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "all-MiniLM-L6-v2");

        let batch = provider
            .embed_batch(&[
                "The cat sat on the mat",
                "A cat was sitting on a mat",
                "Quantum computing uses qubits",
            ])
            .unwrap();
        assert_eq!(batch.len(), 3);
        for v in &batch {
            assert_eq!(v.len(), EMBEDDING_DIM);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&batch[0], &batch[1]) > 0.7);
        assert!(dot(&batch[0], &batch[2]) < dot(&batch[0], &batch[1]));
        assert_eq!(provider.embed("The cat sat on the mat").unwrap(), batch[0]);
    }
}
