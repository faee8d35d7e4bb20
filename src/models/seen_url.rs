//! Dedup ledger entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row per normalized URL, ever.
///
/// `last_fetched` moves on every fetch attempt that reaches ingestion;
/// `last_hash` only moves when the extracted content changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenUrl {
    pub url: String,
    pub source_id: Option<i32>,
    pub first_seen: DateTime<Utc>,
    pub last_fetched: DateTime<Utc>,
    pub last_hash: Option<String>,
}

impl SeenUrl {
    pub fn new(url: &str, source_id: Option<i32>, hash: &str) -> Self {
        let now = Utc::now();
        Self {
            url: url.to_string(),
            source_id,
            first_seen: now,
            last_fetched: now,
            last_hash: Some(hash.to_string()),
        }
    }

    /// Record a fetch whose content hashed to `hash`.
    pub fn touch(&mut self, hash: &str) {
        self.last_fetched = Utc::now();
        self.last_hash = Some(hash.to_string());
    }
}
