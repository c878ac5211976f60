//! Deterministic offline embedder.
//!
//! Lowercased word unigrams and bigrams are hashed into a fixed number of
//! buckets with a signed feature-hashing scheme, then L2-normalised. Texts
//! sharing vocabulary land close together, identical texts map to identical
//! vectors, and no model download or network access is needed.
//!
//! Features are hashed with BLAKE3, whose output is fixed by its
//! specification, so vectors persisted by one build stay comparable with
//! queries from any other.

use super::{Embedder, Embedding};
use crate::error::EmbeddingError;

#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimensions: usize,
    model: String,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model: format!("hashed-{dimensions}"),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = blake3::hash(feature.as_bytes());
        let b = digest.as_bytes();
        let h = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        let bucket = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

const BLANK_FEATURE: &str = "\u{0}blank";

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl Embedder for HashedEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = tokenize(text);

        // Blank and punctuation-only pages share one fixed direction
        if tokens.is_empty() {
            self.add_feature(&mut vector, BLANK_FEATURE, 1.0);
        }
        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
