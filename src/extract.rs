use pdfium_render::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file is not a PDF document")]
    NotAPdf,
    #[error("failed to read PDF: {0}")]
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: usize,
}

/// PDF text extraction seam. Synchronous; callers run it under
/// `spawn_blocking`.
pub trait TextExtractor: Send + Sync + 'static {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError>;
}

/// Production extractor backed by pdfium. Page text segments are concatenated
/// with newlines; an unreadable page fails the whole document rather than
/// silently dropping content.
pub struct PdfiumExtractor;

impl PdfiumExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfiumExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for PdfiumExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
        if !bytes.starts_with(b"%PDF-") {
            return Err(ExtractError::NotAPdf);
        }

        let pdfium = Pdfium::default();
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|err| ExtractError::Unreadable(format!("load pdf: {err}")))?;

        let mut combined = String::new();
        let pages = document.pages();
        let page_count = pages.len() as usize;
        for page_index in 0..pages.len() {
            let page = pages
                .get(page_index)
                .map_err(|err| ExtractError::Unreadable(format!("load page {page_index}: {err}")))?;
            if let Ok(page_text) = page.text() {
                for segment in page_text.segments().iter() {
                    combined.push_str(&segment.text());
                    combined.push('\n');
                }
            };
        }

        Ok(ExtractedText {
            text: combined,
            page_count,
        })
    }
}
