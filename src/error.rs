use thiserror::Error;

/// A document could not be turned into pages. Nothing has touched the index yet.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported document type: {0}")]
    Unsupported(String),

    #[error("not a PDF document: {0}")]
    NotPdf(String),

    #[error("parsing {source_id}: {details}")]
    Parse { source_id: String, details: String },

    #[error("{0} is not valid UTF-8 text")]
    Encoding(String),
}

/// The embedding provider failed for a piece of text.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding backend returned HTTP {0}")]
    Status(u16),

    #[error("malformed embedding response: {0}")]
    Response(String),

    #[error("embedding backend returned an empty vector")]
    Empty,
}

/// The vector index is unreachable, inconsistent, or rejected an operation.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("opening index at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("collection {collection} was built with model {stored}, not {requested}")]
    ModelMismatch {
        collection: String,
        stored: String,
        requested: String,
    },

    #[error("embedding has {actual} dimensions, collection {collection} expects {expected}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("record metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("corrupt record {id}: {details}")]
    Corrupt { id: i64, details: String },

    #[error("index lock poisoned")]
    Poisoned,
}

/// Thresholds or collection settings that must stop the pipeline from starting.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdRange { name: &'static str, value: f32 },

    #[error("noise_threshold ({noise}) must be below similarity_threshold ({similarity})")]
    ThresholdOrder { noise: f32, similarity: f32 },

    #[error("top_k must be at least 1")]
    ZeroTopK,

    #[error("invalid collection name {0:?}")]
    CollectionName(String),

    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

/// A whole-document ingest failure. In atomic mode nothing from the document was persisted.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("document {source_id} has no pages")]
    EmptyDocument { source_id: String },

    #[error("indexing page {page_number} of {source_id}: {cause}")]
    Page {
        source_id: String,
        page_number: u32,
        #[source]
        cause: IndexError,
    },

    #[error("ingest of {source_id} cancelled before page {page_number}")]
    Cancelled { source_id: String, page_number: u32 },

    #[error("persisting {source_id}: {cause}")]
    Persist {
        source_id: String,
        #[source]
        cause: IndexError,
    },
}

/// A query failure isolated to one page of a checked document.
#[derive(Debug, Clone, Error, serde::Serialize)]
#[error("checking page {page_number} of {source_id}: {cause}")]
pub struct PageError {
    pub source_id: String,
    pub page_number: u32,
    pub cause: String,
}
