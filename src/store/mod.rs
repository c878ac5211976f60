pub mod schema;
pub mod sqlite;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::IndexError;

/// Provenance attached to an indexed record. `source` is always present.
pub type Metadata = BTreeMap<String, String>;

pub const SOURCE_KEY: &str = "source";
pub const PAGE_KEY: &str = "page";

/// A stored record returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub text: String,
    pub metadata: Metadata,
    /// Relevance in [0, 1], 1 = identical
    pub score: f32,
}

impl ScoredRecord {
    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .map(String::as_str)
            .unwrap_or("N/A")
    }
}

/// Persistent named collection of embedded text records.
///
/// `insert` embeds and stages; staged records count towards `count` but are
/// only durable, and only visible to `query_similar`, after `persist`.
pub trait VectorIndex: Send + Sync {
    fn insert(&self, text: &str, metadata: Metadata) -> Result<(), IndexError>;

    /// Flush staged records to durable storage.
    fn persist(&self) -> Result<(), IndexError>;

    /// Discard staged records. Returns how many were dropped.
    fn rollback(&self) -> Result<usize, IndexError>;

    /// Top-`k` records by descending relevance to `text`.
    fn query_similar(&self, text: &str, k: usize) -> Result<Vec<ScoredRecord>, IndexError>;

    fn count(&self) -> Result<u64, IndexError>;
}
