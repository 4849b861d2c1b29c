//! Deterministic hashing embedder.
//!
//! Each lowercase alphanumeric token is hashed (FNV-1a) into one of the
//! output dimensions with a sign taken from the hash, then the vector is
//! L2-normalized. Texts sharing words get positive cosine similarity. No model
//! files or network needed, so it backs offline deployments and tests.

use super::{l2_normalize, EmbeddingProvider, ProviderError};

pub const HASHED_MODEL_NAME: &str = "fnv1a-token-hash";

pub struct HashedEmbeddingProvider {
    dimensions: usize,
}

impl HashedEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn hash_into(&self, vector: &mut [f32], bytes: &[u8]) {
        let hash = fnv1a_hash(bytes);
        let index = (hash % self.dimensions as u64) as usize;
        // top bit picks the sign
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
}

impl EmbeddingProvider for HashedEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vector = vec![0.0f32; self.dimensions];
        let mut tokens = 0usize;
        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            if raw.is_empty() {
                continue;
            }
            self.hash_into(&mut vector, raw.to_lowercase().as_bytes());
            tokens += 1;
        }
        // Punctuation-only text still gets a stable vector
        if tokens == 0 && !text.trim().is_empty() {
            self.hash_into(&mut vector, text.trim().as_bytes());
        }
        Ok(l2_normalize(&vector))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        HASHED_MODEL_NAME
    }
}

fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
