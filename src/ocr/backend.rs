//! OCR backend abstraction.

use std::path::Path;

use thiserror::Error;

/// Errors from OCR and PDF tooling.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR unavailable: {0}")]
    Unavailable(String),
}

/// Result of OCR processing.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub text: String,
    /// Which backend produced this result.
    pub backend: &'static str,
    pub processing_time_ms: u64,
}

/// Something that can read text off an image.
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check if this backend's dependencies are installed.
    fn is_available(&self) -> bool;

    /// What's needed to make this backend available.
    fn availability_hint(&self) -> String;

    fn ocr_image(&self, image_path: &Path) -> Result<OcrResult, OcrError>;

    /// Run OCR on a single page (1-based) of a PDF file.
    fn ocr_pdf_page(&self, pdf_path: &Path, page: u32) -> Result<OcrResult, OcrError>;
}

/// Configuration for OCR backends.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Tesseract language, e.g. "eng".
    pub language: String,
    /// Rasterization resolution for PDF pages.
    pub dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            dpi: 300,
        }
    }
}
