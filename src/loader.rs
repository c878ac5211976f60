use serde::Serialize;
use std::path::Path;

use crate::error::LoaderError;

const PAGE_BREAK: char = '\x0C';

/// One page of extracted text. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub text: String,
    pub source_id: String,
    /// 1-based position within the source document
    pub page_number: u32,
}

impl Page {
    pub fn new(source_id: impl Into<String>, page_number: u32, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            page_number,
        }
    }
}

/// Turns raw document bytes into ordered pages.
pub trait DocumentLoader {
    fn load(&self, bytes: &[u8], source_id: &str) -> Result<Vec<Page>, LoaderError>;
}

/// PDF text extraction via pdf-extract. Pages are split on form feeds and
/// padded with blank pages up to the document's page count.
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn load(&self, bytes: &[u8], source_id: &str) -> Result<Vec<Page>, LoaderError> {
        if bytes.len() < 4 || &bytes[0..4] != b"%PDF" {
            return Err(LoaderError::NotPdf(source_id.to_string()));
        }

        let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| LoaderError::Parse {
            source_id: source_id.to_string(),
            details: e.to_string(),
        })?;

        let page_count = pdf_extract::Document::load_mem(bytes)
            .map(|doc| doc.get_pages().len())
            .unwrap_or(1);

        let mut pages = split_pages(&text, source_id);
        // pdf-extract ends each page with a form feed
        if pages.len() > page_count && pages.last().is_some_and(|p| p.text.trim().is_empty()) {
            pages.pop();
        }
        while pages.len() < page_count {
            pages.push(Page::new(source_id, pages.len() as u32 + 1, ""));
        }
        Ok(pages)
    }
}

/// UTF-8 text with form-feed page breaks. No form feeds means one page.
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, bytes: &[u8], source_id: &str) -> Result<Vec<Page>, LoaderError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| LoaderError::Encoding(source_id.to_string()))?;
        Ok(split_pages(text, source_id))
    }
}

fn split_pages(text: &str, source_id: &str) -> Vec<Page> {
    text.split(PAGE_BREAK)
        .enumerate()
        .map(|(i, page)| Page::new(source_id, i as u32 + 1, page))
        .collect()
}

/// Load a file from disk, picking the loader by extension. The page source id
/// is the file name.
pub fn load_path(path: &Path) -> Result<Vec<Page>, LoaderError> {
    let source_id = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let loader: &dyn DocumentLoader = match ext.as_str() {
        "pdf" => &PdfLoader,
        "txt" | "md" => &TextLoader,
        _ => return Err(LoaderError::Unsupported(source_id)),
    };

    let bytes = std::fs::read(path).map_err(|source| LoaderError::Io {
        path: path.display().to_string(),
        source,
    })?;
    loader.load(&bytes, &source_id)
}
