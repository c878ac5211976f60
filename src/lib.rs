//! Page-level semantic overlap detection.
//!
//! Documents are split into pages by a [`loader::DocumentLoader`], embedded,
//! and stored one record per page in a persistent [`store::VectorIndex`].
//! [`ingest::Ingestor`] grows the corpus; [`check::Checker`] compares each page
//! of a candidate document against it and classifies the matches.

pub mod cancel;
pub mod check;
pub mod config;
pub mod embed;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod report;
pub mod store;
