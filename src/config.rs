use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_COLLECTION: &str = "research_papers";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub policy: Policy,
    pub display: DisplayConfig,
    pub embed: EmbedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where the index database lives (default: .pagecheck/db under the root)
    pub path: Option<PathBuf>,
    /// Collection shared by ingestion and checking
    pub collection: String,
}

/// Match scoring policy. Changing it never requires re-indexing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Scores strictly above this are potential plagiarism
    pub similarity_threshold: f32,
    /// Scores at or below this are noise and are dropped
    pub noise_threshold: f32,
    /// Neighbours fetched per page
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Characters of page text shown as a preview
    pub preview_length: usize,
    /// Characters of matched text kept per match
    pub match_text_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Max pages queried concurrently during a check
    pub max_concurrent: usize,
    pub backend: EmbedBackend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbedBackend {
    #[serde(rename = "hashed")]
    Hashed { dimensions: usize },
    #[serde(rename = "ollama")]
    Ollama { model: String, url: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            noise_threshold: 0.6,
            top_k: 3,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            preview_length: 300,
            match_text_length: 1200,
        }
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            backend: EmbedBackend::Hashed { dimensions: 384 },
        }
    }
}

impl Policy {
    /// Check the thresholds. `noise_threshold < similarity_threshold` is required.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("noise_threshold", self.noise_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdRange { name, value });
            }
        }
        if self.noise_threshold >= self.similarity_threshold {
            return Err(ConfigError::ThresholdOrder {
                noise: self.noise_threshold,
                similarity: self.similarity_threshold,
            });
        }
        if self.top_k == 0 {
            return Err(ConfigError::ZeroTopK);
        }
        Ok(())
    }

    /// Apply per-call overrides on top of the configured policy.
    pub fn with_overrides(
        mut self,
        similarity_threshold: Option<f32>,
        noise_threshold: Option<f32>,
        top_k: Option<usize>,
    ) -> Self {
        if let Some(v) = similarity_threshold {
            self.similarity_threshold = v;
        }
        if let Some(v) = noise_threshold {
            self.noise_threshold = v;
        }
        if let Some(v) = top_k {
            self.top_k = v;
        }
        self
    }
}

/// Collection names: 1-63 chars of ASCII alphanumerics, `_`, `-` or `.`.
pub fn validate_collection_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::CollectionName(name.to_string()))
    }
}

impl Config {
    /// Load config from a .pagecheck/config.toml file, falling back to defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(".pagecheck").join("config.toml");
        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading config from {}", config_path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("parsing config from {}", config_path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Everything that must hold before a pipeline may be built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;
        validate_collection_name(&self.storage.collection)?;
        if let EmbedBackend::Hashed { dimensions: 0 } = self.embed.backend {
            return Err(ConfigError::Zero("embed.backend.dimensions"));
        }
        if self.embed.max_concurrent == 0 {
            return Err(ConfigError::Zero("embed.max_concurrent"));
        }
        Ok(())
    }

    /// Resolve the actual index directory path.
    pub fn storage_dir(&self, root: &Path) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| root.join(".pagecheck").join("db"))
    }

    /// Write current config to disk (for `pagecheck init`).
    pub fn save(&self, root: &Path) -> Result<PathBuf> {
        let dir = root.join(".pagecheck");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating config dir {}", dir.display()))?;
        let config_path = dir.join("config.toml");
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("writing config to {}", config_path.display()))?;
        Ok(config_path)
    }
}
