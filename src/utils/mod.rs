//! Shared utility functions.
//!
//! - `mime`: MIME detection and categorization
//! - `url`: URL cleanup, normalization and domain extraction

pub mod mime;
pub mod url;

pub use mime::{detect_mime, mime_to_extension, mime_type_category, MimeCategory};
pub use url::{clean_url, extract_domain, normalize_url};
