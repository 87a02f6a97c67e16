//! Document text extraction.
//!
//! `DocumentExtractor` sniffs the upload: `%PDF` goes through the PDF path,
//! valid UTF-8 is taken as a single-page plain-text document, anything else
//! is rejected. Pages that yield no text are skipped. Only a container that
//! cannot be parsed at all is an error; a document whose pages are all blank
//! extracts to an empty string and the caller decides what that means.
//!
//! PDF path: `pdf_extract` handles font encodings best, so it runs first.
//! When it errors or panics on a malformed file, `lopdf` salvages the
//! document page by page and unreadable pages are dropped.
//!
//! Extraction is CPU-bound. Async callers run it inside `spawn_blocking`.

use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, warn};

const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document is empty")]
    Empty,

    #[error("unsupported document format")]
    UnsupportedFormat,

    #[error("could not parse PDF: {0}")]
    Pdf(String),

    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

/// Converts raw document bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, document: &[u8]) -> Result<String, ExtractionError>;
}

/// Default extractor: PDF or UTF-8 plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn extract(&self, document: &[u8]) -> Result<String, ExtractionError> {
        if document.is_empty() {
            return Err(ExtractionError::Empty);
        }
        if document.starts_with(PDF_MAGIC) {
            return extract_pdf(document);
        }
        match std::str::from_utf8(document) {
            Ok(text) => Ok(assemble_pages([text.to_string()])),
            Err(_) => Err(ExtractionError::UnsupportedFormat),
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    let primary = panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes));
    match primary {
        Ok(Ok(pages)) => {
            debug!(pages = pages.len(), "pdf_extract succeeded");
            return Ok(assemble_pages(pages));
        }
        Ok(Err(e)) => warn!("pdf_extract failed, salvaging per page: {e}"),
        Err(_) => warn!("pdf_extract panicked, salvaging per page"),
    }

    panic::catch_unwind(AssertUnwindSafe(|| salvage_pages(bytes)))
        .map_err(|_| ExtractionError::Pdf("parser panicked on malformed input".to_string()))?
}

/// Loads the container with `lopdf` and extracts each page on its own;
/// a page that errors or panics contributes nothing.
fn salvage_pages(bytes: &[u8]) -> Result<String, ExtractionError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractionError::Pdf(e.to_string()))?;

    let pages = doc.get_pages().into_keys().map(|page_num| {
        match panic::catch_unwind(AssertUnwindSafe(|| doc.extract_text(&[page_num]))) {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                debug!(page_num, "Skipping unreadable page: {e}");
                String::new()
            }
            Err(_) => {
                debug!(page_num, "Skipping page that panicked the parser");
                String::new()
            }
        }
    });
    Ok(assemble_pages(pages))
}

/// Concatenates page texts in order, skipping pages with no visible text.
/// A newline separates two pages only when the earlier one lacks a trailing one.
pub fn assemble_pages<I>(pages: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut text = String::new();
    for page in pages {
        if page.trim().is_empty() {
            continue;
        }
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&page);
    }
    text
}
