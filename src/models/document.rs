//! Document model.
//!
//! A document is the fetched resource itself. Re-fetches of the same URL
//! never create a new document; they append snapshots instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 of normalized text, hex encoded.
pub fn compute_content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// A persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i32,
    pub source_id: Option<i32>,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    /// URI of the raw payload in the payload store.
    pub raw_uri: String,
    pub normalized_text: String,
    pub content_hash: String,
    pub mime: String,
    /// Revision marker for versioned PDFs (e.g. `Rev. 10/23`).
    pub pdf_revision: Option<String>,
}

/// Fields needed to create a document; the id is assigned by storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub source_id: Option<i32>,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub raw_uri: String,
    pub normalized_text: String,
    pub content_hash: String,
    pub mime: String,
    pub pdf_revision: Option<String>,
}

impl NewDocument {
    pub fn into_document(self, id: i32) -> Document {
        Document {
            id,
            source_id: self.source_id,
            url: self.url,
            fetched_at: self.fetched_at,
            raw_uri: self.raw_uri,
            normalized_text: self.normalized_text,
            content_hash: self.content_hash,
            mime: self.mime,
            pdf_revision: self.pdf_revision,
        }
    }
}
