//! OCR and PDF text-layer tooling.
//!
//! Both sides shell out: Poppler (`pdfinfo`, `pdftotext`, `pdftoppm`) for the
//! text layer and rasterization, Tesseract for recognition.

mod backend;
mod command;
mod pdf_text;
mod tesseract;

pub use backend::{OcrBackend, OcrConfig, OcrError, OcrResult};
pub use command::check_binary;
pub use pdf_text::{parse_pdfinfo, PdfInfo, PdfTextLayer, PopplerTextLayer};
pub use tesseract::TesseractBackend;

/// Availability of each external tool.
pub fn check_tools() -> Vec<(String, bool)> {
    ["pdftotext", "pdftoppm", "pdfinfo", "tesseract"]
        .iter()
        .map(|tool| (tool.to_string(), check_binary(tool)))
        .collect()
}
