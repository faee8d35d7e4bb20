//! Shared helper functions for CLI commands.

use std::sync::Arc;

use crate::config::Settings;
use crate::extract::ContentExtractor;
use crate::ocr::{OcrBackend, OcrConfig, PopplerTextLayer, TesseractBackend};
use crate::repository::migrations::run_migrations;
use crate::repository::{AsyncSqlitePool, DieselStorage};

/// Open the SQLite store, creating the schema if needed.
pub async fn open_storage(settings: &Settings) -> anyhow::Result<DieselStorage> {
    settings.ensure_directories()?;
    let pool = AsyncSqlitePool::new(&settings.database_url());
    run_migrations(&pool).await?;
    Ok(DieselStorage::new(pool))
}

/// Extractor with Poppler for PDF text and Tesseract OCR when enabled.
pub fn build_extractor(settings: &Settings) -> ContentExtractor {
    let ocr: Option<Arc<dyn OcrBackend>> = if settings.ocr_enabled {
        let backend = TesseractBackend::with_config(OcrConfig {
            language: settings.ocr_language.clone(),
            dpi: settings.ocr_dpi,
        });
        if backend.is_available() {
            Some(Arc::new(backend))
        } else {
            tracing::warn!("OCR enabled but unavailable: {}", backend.availability_hint());
            None
        }
    } else {
        None
    };

    ContentExtractor::standard(
        Arc::new(PopplerTextLayer::new()),
        ocr,
        settings.ocr_min_page_chars,
    )
}

/// Truncate a string to `max_len` characters, appending "..." when cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long title", 10), "a rathe...");
        assert_eq!(truncate("déjà vu encore", 7), "déjà...");
    }
}
