//! MIME type detection and categorization.

/// Content families the extractor knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeCategory {
    Html,
    Pdf,
    Text,
    Other,
}

impl MimeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Other => "other",
        }
    }
}

/// Categorize a MIME type.
pub fn mime_type_category(mime: &str) -> MimeCategory {
    let mime_lower = essence(mime);

    if mime_lower == "text/html" || mime_lower == "application/xhtml+xml" {
        MimeCategory::Html
    } else if mime_lower == "application/pdf" || mime_lower == "application/x-pdf" {
        MimeCategory::Pdf
    } else if mime_lower.starts_with("text/") {
        MimeCategory::Text
    } else {
        MimeCategory::Other
    }
}

/// Strip parameters (`; charset=...`) and lowercase.
pub fn essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Guess a MIME type from the URL path extension.
pub fn guess_mime_from_url(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    let ext = path.rsplit_once('.').map(|(_, e)| e)?;
    match ext {
        "pdf" => Some("application/pdf"),
        "html" | "htm" | "shtml" | "aspx" | "php" | "jsp" => Some("text/html"),
        "txt" => Some("text/plain"),
        "xml" => Some("application/xml"),
        _ => None,
    }
}

/// Resolve the effective MIME type of a fetched payload.
///
/// Order: a `%PDF` magic prefix, then a specific Content-Type header,
/// then content sniffing, then the URL extension.
pub fn detect_mime(url: &str, content_type: Option<&str>, bytes: &[u8]) -> String {
    if bytes.starts_with(b"%PDF") {
        return "application/pdf".to_string();
    }

    if let Some(ct) = content_type {
        let ct = essence(ct);
        if !ct.is_empty() && ct != "application/octet-stream" && ct != "binary/octet-stream" {
            return ct;
        }
    }

    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }

    if let Some(guess) = guess_mime_from_url(url) {
        return guess.to_string();
    }

    if looks_like_html(bytes) {
        return "text/html".to_string();
    }

    "application/octet-stream".to_string()
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head).to_lowercase();
    head.contains("<html") || head.contains("<!doctype html")
}

/// Map a MIME type to a file extension for payload storage.
pub fn mime_to_extension(mime: &str) -> &'static str {
    match mime_type_category(mime) {
        MimeCategory::Html => "html",
        MimeCategory::Pdf => "pdf",
        MimeCategory::Text => "txt",
        MimeCategory::Other => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_magic_beats_header() {
        let mime = detect_mime(
            "https://example.gov/file",
            Some("text/html; charset=utf-8"),
            b"%PDF-1.7\n...",
        );
        assert_eq!(mime, "application/pdf");
    }

    #[test]
    fn test_header_used_when_specific() {
        let mime = detect_mime("https://example.gov/a", Some("Text/HTML; charset=UTF-8"), b"hi");
        assert_eq!(mime, "text/html");
    }

    #[test]
    fn test_octet_stream_falls_back_to_extension() {
        let mime = detect_mime(
            "https://example.gov/notice.htm?x=1",
            Some("application/octet-stream"),
            b"plain words",
        );
        assert_eq!(mime, "text/html");
    }

    #[test]
    fn test_categories() {
        assert_eq!(mime_type_category("text/html"), MimeCategory::Html);
        assert_eq!(mime_type_category("application/pdf"), MimeCategory::Pdf);
        assert_eq!(mime_type_category("text/plain; charset=utf-8"), MimeCategory::Text);
        assert_eq!(mime_type_category("image/png"), MimeCategory::Other);
        assert_eq!(mime_to_extension("application/pdf"), "pdf");
    }
}
