//! PDF text layer via Poppler (`pdfinfo`, `pdftotext`).

use std::path::Path;
use std::process::Command;

use super::backend::OcrError;
use super::command::{check_binary, handle_cmd_output};

/// Document-level PDF metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfInfo {
    pub pages: u32,
    pub title: Option<String>,
    /// Producer/modification stamp, used as a revision marker.
    pub revision: Option<String>,
}

/// Reads the embedded text layer of a PDF.
pub trait PdfTextLayer: Send + Sync {
    fn info(&self, pdf_path: &Path) -> Result<PdfInfo, OcrError>;

    /// Text of one page (1-based).
    fn page_text(&self, pdf_path: &Path, page: u32) -> Result<String, OcrError>;
}

#[derive(Debug, Clone, Default)]
pub struct PopplerTextLayer;

impl PopplerTextLayer {
    pub fn new() -> Self {
        Self
    }

    pub fn is_available(&self) -> bool {
        check_binary("pdftotext") && check_binary("pdfinfo")
    }
}

impl PdfTextLayer for PopplerTextLayer {
    fn info(&self, pdf_path: &Path) -> Result<PdfInfo, OcrError> {
        let output = Command::new("pdfinfo").arg(pdf_path).output();
        let stdout = handle_cmd_output(output, "pdfinfo (install poppler-utils)", "pdfinfo failed")?;
        Ok(parse_pdfinfo(&stdout))
    }

    fn page_text(&self, pdf_path: &Path, page: u32) -> Result<String, OcrError> {
        let page_str = page.to_string();
        let output = Command::new("pdftotext")
            .args(["-layout", "-enc", "UTF-8", "-f", &page_str, "-l", &page_str])
            .arg(pdf_path)
            .arg("-")
            .output();

        handle_cmd_output(
            output,
            "pdftotext (install poppler-utils)",
            &format!("pdftotext failed on page {}", page),
        )
    }
}

/// Parse `pdfinfo` output.
pub fn parse_pdfinfo(stdout: &str) -> PdfInfo {
    let mut info = PdfInfo::default();
    let mut mod_date = None;

    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Pages" => info.pages = value.parse().unwrap_or(0),
            "Title" if !value.is_empty() => info.title = Some(value.to_string()),
            "ModDate" if !value.is_empty() => mod_date = Some(value.to_string()),
            _ => {}
        }
    }
    info.revision = mod_date;
    info
}
