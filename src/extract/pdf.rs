//! PDF text extraction with per-page OCR fallback.
//!
//! Each page runs through an ordered list of [`PageTextStrategy`]s. The text
//! layer goes first; OCR runs only when the page came back missing or
//! nearly empty, and its output replaces the text layer only when it
//! carries more content. Any strategy error on any page fails the whole
//! document, so a hash is never computed over partial text.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use super::normalize::content_chars;
use super::{ExtractionError, ExtractionStrategy, RawExtraction};
use crate::ocr::{OcrBackend, OcrError, PdfTextLayer};
use crate::utils::{mime_type_category, MimeCategory};

/// Pages with fewer non-whitespace characters than this are OCR candidates.
pub const DEFAULT_MIN_PAGE_CHARS: usize = 120;

/// One way of getting text off a PDF page.
pub trait PageTextStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether to run, given what earlier strategies produced for this page.
    fn applies(&self, previous: Option<&str>) -> bool;

    fn page_text(&self, pdf_path: &Path, page: u32) -> Result<String, OcrError>;
}

pub struct TextLayerStrategy {
    layer: Arc<dyn PdfTextLayer>,
}

impl TextLayerStrategy {
    pub fn new(layer: Arc<dyn PdfTextLayer>) -> Self {
        Self { layer }
    }
}

impl PageTextStrategy for TextLayerStrategy {
    fn name(&self) -> &'static str {
        "text_layer"
    }

    fn applies(&self, previous: Option<&str>) -> bool {
        previous.is_none()
    }

    fn page_text(&self, pdf_path: &Path, page: u32) -> Result<String, OcrError> {
        self.layer.page_text(pdf_path, page)
    }
}

pub struct OcrStrategy {
    backend: Arc<dyn OcrBackend>,
    min_page_chars: usize,
}

impl OcrStrategy {
    pub fn new(backend: Arc<dyn OcrBackend>, min_page_chars: usize) -> Self {
        Self {
            backend,
            min_page_chars,
        }
    }
}

impl PageTextStrategy for OcrStrategy {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn applies(&self, previous: Option<&str>) -> bool {
        previous.map_or(true, |text| content_chars(text) < self.min_page_chars)
    }

    fn page_text(&self, pdf_path: &Path, page: u32) -> Result<String, OcrError> {
        self.backend.ocr_pdf_page(pdf_path, page).map(|r| r.text)
    }
}

pub struct PdfExtractor {
    layer: Arc<dyn PdfTextLayer>,
    pages: Vec<Box<dyn PageTextStrategy>>,
    max_pages: Option<u32>,
}

impl PdfExtractor {
    /// Text layer only.
    pub fn new(layer: Arc<dyn PdfTextLayer>) -> Self {
        Self {
            pages: vec![Box::new(TextLayerStrategy::new(layer.clone()))],
            layer,
            max_pages: None,
        }
    }

    /// Add OCR for pages whose text layer is thinner than `min_page_chars`.
    pub fn with_ocr(mut self, backend: Arc<dyn OcrBackend>, min_page_chars: usize) -> Self {
        self.pages
            .push(Box::new(OcrStrategy::new(backend, min_page_chars)));
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.pages.iter().map(|s| s.name()).collect()
    }

    /// Extract from a PDF already on disk.
    pub fn extract_path(&self, path: &Path) -> Result<RawExtraction, ExtractionError> {
        let info = self
            .layer
            .info(path)
            .map_err(|e| ExtractionError::Pdf(e.to_string()))?;
        if info.pages == 0 {
            return Err(ExtractionError::Pdf("no pages".to_string()));
        }

        let last = self.max_pages.map_or(info.pages, |m| m.min(info.pages));
        let mut notes = Vec::new();
        let mut page_texts = Vec::with_capacity(last as usize);

        for page in 1..=last {
            match self.page_text(path, page)? {
                Some(text) => page_texts.push(text),
                None => notes.push(format!("page {}: no text", page)),
            }
        }

        let text = page_texts.join("\n\n");
        if text.trim().is_empty() {
            return Err(ExtractionError::Empty(format!(
                "no text on any of {} pages",
                last
            )));
        }

        Ok(RawExtraction {
            text,
            title: info.title,
            revision: info.revision,
            notes,
        })
    }

    fn page_text(&self, path: &Path, page: u32) -> Result<Option<String>, ExtractionError> {
        let mut current: Option<String> = None;

        for strategy in &self.pages {
            if !strategy.applies(current.as_deref()) {
                continue;
            }
            match strategy.page_text(path, page) {
                Ok(text) => {
                    let better = current
                        .as_deref()
                        .map_or(true, |prev| content_chars(&text) > content_chars(prev));
                    if better {
                        current = Some(text);
                    }
                }
                Err(e) => {
                    warn!("Page {} {} failed: {}", page, strategy.name(), e);
                    return Err(ExtractionError::Pdf(format!(
                        "page {}: {} failed: {}",
                        page,
                        strategy.name(),
                        e
                    )));
                }
            }
        }

        Ok(current.filter(|t| !t.trim().is_empty()))
    }
}

impl ExtractionStrategy for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn applies(&self, mime: &str, bytes: &[u8]) -> bool {
        bytes.starts_with(b"%PDF") || mime_type_category(mime) == MimeCategory::Pdf
    }

    fn extract_raw(&self, bytes: &[u8]) -> Result<RawExtraction, ExtractionError> {
        let mut file = tempfile::Builder::new()
            .prefix("bulletin-")
            .suffix(".pdf")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        self.extract_path(file.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrResult, PdfInfo};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLayer {
        pages: HashMap<u32, Result<String, String>>,
    }

    impl PdfTextLayer for FakeLayer {
        fn info(&self, _: &Path) -> Result<PdfInfo, OcrError> {
            Ok(PdfInfo {
                pages: self.pages.len() as u32,
                title: Some("Form ST-3".to_string()),
                revision: Some("D:20240301".to_string()),
            })
        }

        fn page_text(&self, _: &Path, page: u32) -> Result<String, OcrError> {
            match self.pages.get(&page) {
                Some(Ok(t)) => Ok(t.clone()),
                Some(Err(e)) => Err(OcrError::Failed(e.clone())),
                None => Err(OcrError::Failed("missing".to_string())),
            }
        }
    }

    struct FakeOcr {
        calls: AtomicUsize,
        fail: bool,
    }

    impl OcrBackend for FakeOcr {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn availability_hint(&self) -> String {
            String::new()
        }
        fn ocr_image(&self, _: &Path) -> Result<OcrResult, OcrError> {
            Err(OcrError::Unavailable("images".to_string()))
        }
        fn ocr_pdf_page(&self, _: &Path, page: u32) -> Result<OcrResult, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OcrError::Failed("tesseract crashed".to_string()));
            }
            Ok(OcrResult {
                text: format!("scanned page {} {}", page, "recognized words ".repeat(10)),
                backend: "fake",
                processing_time_ms: 1,
            })
        }
    }

    fn layer(pages: Vec<Result<&str, &str>>) -> Arc<dyn PdfTextLayer> {
        Arc::new(FakeLayer {
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(i, r)| (i as u32 + 1, r.map(String::from).map_err(String::from)))
                .collect(),
        })
    }

    fn ocr(fail: bool) -> Arc<FakeOcr> {
        Arc::new(FakeOcr {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[test]
    fn test_ocr_only_for_thin_pages() {
        let dense = "sales tax ".repeat(30);
        let backend = ocr(false);
        let extractor = PdfExtractor::new(layer(vec![Ok(dense.as_str()), Ok("  "), Ok(dense.as_str())]))
            .with_ocr(backend.clone(), DEFAULT_MIN_PAGE_CHARS);

        let raw = extractor.extract_path(Path::new("/tmp/x.pdf")).unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(raw.text.contains("scanned page 2"));
        assert_eq!(raw.title.as_deref(), Some("Form ST-3"));
        assert_eq!(raw.revision.as_deref(), Some("D:20240301"));
        assert!(raw.notes.is_empty());
    }

    #[test]
    fn test_failed_text_layer_fails_document() {
        let dense = "exemption certificate ".repeat(10);
        let backend = ocr(false);
        let extractor = PdfExtractor::new(layer(vec![Ok(dense.as_str()), Err("corrupt page")]))
            .with_ocr(backend.clone(), DEFAULT_MIN_PAGE_CHARS);

        match extractor.extract_path(Path::new("/tmp/x.pdf")) {
            Err(ExtractionError::Pdf(msg)) => assert!(msg.starts_with("page 2: text_layer failed")),
            other => panic!("expected a page failure, got {:?}", other),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_ocr_fails_document() {
        let dense = "exemption certificate ".repeat(10);
        let extractor = PdfExtractor::new(layer(vec![Ok(dense.as_str()), Ok("Rev. 10/23")]))
            .with_ocr(ocr(true), DEFAULT_MIN_PAGE_CHARS);

        match extractor.extract_path(Path::new("/tmp/x.pdf")) {
            Err(ExtractionError::Pdf(msg)) => assert!(msg.starts_with("page 2: ocr failed")),
            other => panic!("expected a page failure, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_page_is_noted() {
        let dense = "exemption certificate ".repeat(10);
        let extractor = PdfExtractor::new(layer(vec![Ok(dense.as_str()), Ok("  ")]));
        let raw = extractor.extract_path(Path::new("/tmp/x.pdf")).unwrap();
        assert_eq!(raw.notes, vec!["page 2: no text".to_string()]);
    }

    #[test]
    fn test_thin_text_kept_when_ocr_disabled() {
        let extractor = PdfExtractor::new(layer(vec![Ok("Rev. 10/23")]));
        let raw = extractor.extract_path(Path::new("/tmp/x.pdf")).unwrap();
        assert_eq!(raw.text, "Rev. 10/23");
        assert_eq!(extractor.strategy_names(), vec!["text_layer"]);
    }

    #[test]
    fn test_all_pages_empty() {
        let extractor = PdfExtractor::new(layer(vec![Ok(""), Ok(" ")]));
        assert!(matches!(
            extractor.extract_path(Path::new("/tmp/x.pdf")),
            Err(ExtractionError::Empty(_))
        ));
    }

    #[test]
    fn test_max_pages() {
        let backend = ocr(false);
        let extractor = PdfExtractor::new(layer(vec![Ok(""), Ok(""), Ok("")]))
            .with_ocr(backend.clone(), DEFAULT_MIN_PAGE_CHARS)
            .with_max_pages(Some(2));
        let raw = extractor.extract_path(Path::new("/tmp/x.pdf")).unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(!raw.text.contains("scanned page 3"));
    }
}
