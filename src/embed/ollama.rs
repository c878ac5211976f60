use serde::Deserialize;

use super::{Embedder, Embedding};
use crate::error::EmbeddingError;

pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Result<Self, EmbeddingError> {
        let mut embedder = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions: 0,
        };

        // Learn the dimensions from a short test string
        let test = embedder.embed("test")?;
        embedder.dimensions = test.len();
        Ok(embedder)
    }
}

/// Cut `text` to at most `max` bytes without splitting a character.
fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        // Blank pages still get a vector
        let text = if text.trim().is_empty() { " " } else { text };
        let text = truncate_bytes(text, 8192);

        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let mut response = match ureq::post(&url).send_json(&body) {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => return Err(EmbeddingError::Status(code)),
            Err(e) => return Err(EmbeddingError::Request(e.to_string())),
        };

        let resp: EmbeddingResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| EmbeddingError::Response(e.to_string()))?;

        if resp.embedding.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        Ok(resp.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
