pub mod hashed;
pub mod ollama;

use std::sync::Arc;

use crate::config::EmbedBackend;
use crate::error::EmbeddingError;

pub type Embedding = Vec<f32>;

/// Maps text to a fixed-length vector. Same model, same text, same vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Build the embedder selected in config.
pub fn from_backend(backend: &EmbedBackend) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let embedder: Arc<dyn Embedder> = match backend {
        EmbedBackend::Hashed { dimensions } => Arc::new(hashed::HashedEmbedder::new(*dimensions)),
        EmbedBackend::Ollama { model, url } => Arc::new(ollama::OllamaEmbedder::new(url, model)?),
    };
    Ok(embedder)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// Relevance in [0, 1] from the squared euclidean distance between the
/// unit-length versions of `a` and `b`: `1 - d^2 / sqrt(2)`, which for unit
/// vectors is `1 - sqrt(2) * (1 - cos)`. Identical directions score 1; anything
/// at or beyond `cos = 1 - 1/sqrt(2)` is clamped to 0.
pub fn relevance(a: &[f32], b: &[f32]) -> f32 {
    let cos = cosine_similarity(a, b).clamp(-1.0, 1.0);
    (1.0 - std::f32::consts::SQRT_2 * (1.0 - cos)).clamp(0.0, 1.0)
}
