use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::IngestError;
use crate::loader::Page;
use crate::store::{Metadata, PAGE_KEY, SOURCE_KEY, VectorIndex};

/// What happens to a document when one of its pages cannot be indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestMode {
    /// Any failure discards the whole document.
    #[default]
    Atomic,
    /// Failed pages are skipped and reported; the rest are persisted.
    BestEffort,
}

#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub inserted: usize,
    /// Page numbers that could not be indexed (best-effort mode only)
    pub failed: Vec<u32>,
    /// Page numbers never attempted because the ingest was cancelled
    /// (best-effort mode only)
    pub unstarted: Vec<u32>,
    /// Collection size after the ingest
    pub total: u64,
}

/// Write path: one indexed record per page, tagged with its document.
pub struct Ingestor<'a> {
    index: &'a dyn VectorIndex,
    mode: IngestMode,
    cancel: Option<CancelToken>,
}

impl<'a> Ingestor<'a> {
    pub fn new(index: &'a dyn VectorIndex) -> Self {
        Self {
            index,
            mode: IngestMode::default(),
            cancel: None,
        }
    }

    pub fn with_mode(mut self, mode: IngestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Checked before each page. Atomic ingests roll back when it trips;
    /// best-effort ingests persist what was staged.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Index every page of `document_id` in order and persist.
    pub fn ingest(&self, document_id: &str, pages: &[Page]) -> Result<IngestOutcome, IngestError> {
        if pages.is_empty() {
            return Err(IngestError::EmptyDocument {
                source_id: document_id.to_string(),
            });
        }

        let mut inserted = 0;
        let mut failed = Vec::new();
        let mut unstarted = Vec::new();

        for (i, page) in pages.iter().enumerate() {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                if self.mode == IngestMode::Atomic {
                    self.discard(document_id);
                    return Err(IngestError::Cancelled {
                        source_id: document_id.to_string(),
                        page_number: page.page_number,
                    });
                }
                unstarted = pages[i..].iter().map(|p| p.page_number).collect();
                warn!(document_id, unstarted = unstarted.len(), "ingest cancelled");
                break;
            }

            let metadata = Metadata::from([
                (SOURCE_KEY.to_string(), document_id.to_string()),
                (PAGE_KEY.to_string(), page.page_number.to_string()),
            ]);

            match self.index.insert(&page.text, metadata) {
                Ok(()) => {
                    debug!(document_id, page = page.page_number, "staged page");
                    inserted += 1;
                }
                Err(cause) if self.mode == IngestMode::BestEffort => {
                    warn!(document_id, page = page.page_number, error = %cause, "skipping page");
                    failed.push(page.page_number);
                }
                Err(cause) => {
                    self.discard(document_id);
                    return Err(IngestError::Page {
                        source_id: document_id.to_string(),
                        page_number: page.page_number,
                        cause,
                    });
                }
            }
        }

        if let Err(cause) = self.index.persist() {
            self.discard(document_id);
            return Err(IngestError::Persist {
                source_id: document_id.to_string(),
                cause,
            });
        }

        let total = self.index.count().map_err(|cause| IngestError::Persist {
            source_id: document_id.to_string(),
            cause,
        })?;

        info!(document_id, inserted, failed = failed.len(), total, "ingested document");

        Ok(IngestOutcome {
            document_id: document_id.to_string(),
            inserted,
            failed,
            unstarted,
            total,
        })
    }

    fn discard(&self, document_id: &str) {
        match self.index.rollback() {
            Ok(dropped) => warn!(document_id, dropped, "rolled back staged pages"),
            Err(e) => warn!(document_id, error = %e, "rollback failed"),
        }
    }
}
