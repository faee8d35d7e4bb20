//! Tesseract OCR backend, with pdftoppm for rasterizing PDF pages.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use tempfile::TempDir;

use super::backend::{OcrBackend, OcrConfig, OcrError, OcrResult};
use super::command::{check_binary, check_cmd_status, handle_cmd_output};

pub struct TesseractBackend {
    config: OcrConfig,
}

impl TesseractBackend {
    pub fn new() -> Self {
        Self::with_config(OcrConfig::default())
    }

    pub fn with_config(config: OcrConfig) -> Self {
        Self { config }
    }

    fn run_tesseract(&self, image_path: &Path) -> Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.config.language])
            .output();

        handle_cmd_output(output, "tesseract (install tesseract-ocr)", "tesseract failed")
    }

    /// Rasterize one PDF page to PNG.
    fn pdf_page_to_image(
        &self,
        pdf_path: &Path,
        page: u32,
        output_dir: &Path,
    ) -> Result<PathBuf, OcrError> {
        let page_str = page.to_string();
        let dpi = self.config.dpi.to_string();
        let status = Command::new("pdftoppm")
            .args(["-png", "-r", &dpi, "-f", &page_str, "-l", &page_str])
            .arg(pdf_path)
            .arg(output_dir.join("page"))
            .status();

        check_cmd_status(
            status,
            "pdftoppm (install poppler-utils)",
            "pdftoppm failed to convert PDF page",
        )?;

        find_page_image(output_dir, page)
            .ok_or_else(|| OcrError::Failed(format!("No image generated for page {}", page)))
    }
}

/// pdftoppm pads page numbers to the width of the page count.
fn find_page_image(dir: &Path, page: u32) -> Option<PathBuf> {
    [1, 2, 3, 4]
        .into_iter()
        .map(|width| dir.join(format!("page-{:0width$}.png", page, width = width)))
        .find(|p| p.exists())
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrBackend for TesseractBackend {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        check_binary("tesseract") && check_binary("pdftoppm")
    }

    fn availability_hint(&self) -> String {
        if !check_binary("tesseract") {
            "Tesseract not installed. Install with: apt install tesseract-ocr".to_string()
        } else if !check_binary("pdftoppm") {
            "pdftoppm not installed. Install with: apt install poppler-utils".to_string()
        } else {
            "Tesseract is available".to_string()
        }
    }

    fn ocr_image(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        let start = Instant::now();
        let text = self.run_tesseract(image_path)?;
        Ok(OcrResult {
            text,
            backend: self.name(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn ocr_pdf_page(&self, pdf_path: &Path, page: u32) -> Result<OcrResult, OcrError> {
        let start = Instant::now();
        let temp_dir = TempDir::new()?;
        let image_path = self.pdf_page_to_image(pdf_path, page, temp_dir.path())?;
        let text = self.run_tesseract(&image_path)?;

        Ok(OcrResult {
            text,
            backend: self.name(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_page_image_widths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page-007.png"), b"png").unwrap();
        assert_eq!(
            find_page_image(dir.path(), 7),
            Some(dir.path().join("page-007.png"))
        );
        assert_eq!(find_page_image(dir.path(), 8), None);
    }
}
