//! Repository layer for persistence.
//!
//! The pipeline talks to storage only through the [`Storage`] trait. The
//! SQLite implementation uses Diesel ORM via diesel-async; an in-memory
//! implementation backs tests and dry runs.

pub mod diesel_models;
pub mod diesel_pool;
pub mod diesel_storage;
pub mod memory;
pub mod migrations;
pub mod util;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use thiserror::Error;

use crate::models::{
    Diff, Document, NewDiff, NewDocument, NewSnapshot, SeenUrl, Snapshot, Source, Subscription,
};

pub use diesel_pool::{AsyncSqlitePool, DieselError};
pub use diesel_storage::DieselStorage;
pub use memory::InMemoryStorage;

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload store error: {0}")]
    Payload(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Map unique-constraint violations to `Conflict`, everything else to `Database`.
    pub fn from_diesel(err: diesel::result::Error, what: &str) -> Self {
        match err {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => StorageError::Conflict(what.to_string()),
            diesel::result::Error::NotFound => StorageError::NotFound(what.to_string()),
            other => StorageError::Database(other),
        }
    }
}

/// Row counts, mostly for status output and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageCounts {
    pub sources: usize,
    pub seen_urls: usize,
    pub documents: usize,
    pub snapshots: usize,
    pub diffs: usize,
}

/// Create/read/update operations the crawl pipeline needs.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_active_sources(&self) -> Result<Vec<Source>, StorageError>;

    async fn list_sources(&self) -> Result<Vec<Source>, StorageError>;

    /// Insert or update a source keyed by (state, name). Returns its id.
    async fn upsert_source(&self, source: &Source) -> Result<i32, StorageError>;

    async fn get_seen_url(&self, url: &str) -> Result<Option<SeenUrl>, StorageError>;

    async fn upsert_seen_url(&self, seen: &SeenUrl) -> Result<(), StorageError>;

    /// Fails with `Conflict` if a document already exists for (source, url).
    async fn create_document(&self, doc: &NewDocument) -> Result<i32, StorageError>;

    async fn find_document_by_url(
        &self,
        source_id: Option<i32>,
        url: &str,
    ) -> Result<Option<Document>, StorageError>;

    async fn create_snapshot(&self, snapshot: &NewSnapshot) -> Result<i32, StorageError>;

    async fn get_latest_snapshot(&self, document_id: i32)
        -> Result<Option<Snapshot>, StorageError>;

    /// Snapshots of a document, oldest first.
    async fn list_snapshots(&self, document_id: i32) -> Result<Vec<Snapshot>, StorageError>;

    /// Fails with `Conflict` if the snapshot already has a diff.
    async fn create_diff(&self, diff: &NewDiff) -> Result<i32, StorageError>;

    async fn get_diff_for_snapshot(&self, snapshot_id: i32) -> Result<Option<Diff>, StorageError>;

    async fn get_subscriptions(&self) -> Result<Vec<Subscription>, StorageError>;

    async fn counts(&self) -> Result<StorageCounts, StorageError>;
}

/// Format a timestamp for storage. Fixed width so text ordering matches time ordering.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional ISO date column.
pub fn parse_date_opt(s: Option<&str>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_datetime_roundtrip_is_ordered() {
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let (fa, fb) = (format_datetime(&a), format_datetime(&b));
        assert!(fa < fb);
        assert_eq!(parse_datetime(&fa), a);
        assert_eq!(parse_datetime("garbage"), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_parse_date_opt() {
        assert_eq!(
            parse_date_opt(Some("2024-07-01")),
            NaiveDate::from_ymd_opt(2024, 7, 1)
        );
        assert_eq!(parse_date_opt(Some("07/01/2024")), None);
        assert_eq!(parse_date_opt(None), None);
    }
}
