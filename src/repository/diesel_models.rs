//! Diesel row types.
//!
//! Timestamps are stored as fixed-width RFC 3339 text; conversion to domain
//! models happens here.

use diesel::prelude::*;

use super::util::decode_list;
use super::{parse_date_opt, parse_datetime};
use crate::models::{
    DigestCadence, Diff, Document, SeenUrl, Snapshot, Source, SourceType, Subscription,
};
use crate::schema;

/// Source record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::sources)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SourceRecord {
    pub id: i32,
    pub state: String,
    pub name: String,
    pub url: String,
    pub allow_pattern: Option<String>,
    pub source_type: String,
    pub feed_url: Option<String>,
    pub sitemap_url: Option<String>,
    pub active: i32,
}

impl From<SourceRecord> for Source {
    fn from(record: SourceRecord) -> Self {
        Source {
            id: record.id,
            state: record.state,
            name: record.name,
            url: record.url,
            allow_pattern: record.allow_pattern,
            source_type: SourceType::from_str(&record.source_type)
                .unwrap_or(SourceType::HtmlHub),
            feed_url: record.feed_url,
            sitemap_url: record.sitemap_url,
            active: record.active != 0,
        }
    }
}

/// Seen URL record from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::seen_urls)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SeenUrlRecord {
    pub url: String,
    pub source_id: Option<i32>,
    pub first_seen: String,
    pub last_fetched: String,
    pub last_hash: Option<String>,
}

impl From<SeenUrlRecord> for SeenUrl {
    fn from(record: SeenUrlRecord) -> Self {
        SeenUrl {
            url: record.url,
            source_id: record.source_id,
            first_seen: parse_datetime(&record.first_seen),
            last_fetched: parse_datetime(&record.last_fetched),
            last_hash: record.last_hash,
        }
    }
}

/// Document record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRecord {
    pub id: i32,
    pub source_id: Option<i32>,
    pub url: String,
    pub raw_uri: String,
    pub normalized_text: String,
    pub content_hash: String,
    pub pdf_revision: Option<String>,
    pub mime: String,
    pub fetched_at: String,
}

impl From<DocumentRecord> for Document {
    fn from(record: DocumentRecord) -> Self {
        Document {
            id: record.id,
            source_id: record.source_id,
            url: record.url,
            fetched_at: parse_datetime(&record.fetched_at),
            raw_uri: record.raw_uri,
            normalized_text: record.normalized_text,
            content_hash: record.content_hash,
            mime: record.mime,
            pdf_revision: record.pdf_revision,
        }
    }
}

/// Snapshot record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::snapshots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SnapshotRecord {
    pub id: i32,
    pub document_id: i32,
    pub topic: String,
    pub title: String,
    pub score: i32,
    pub effective_date: Option<String>,
    pub form_id: Option<String>,
    pub content_hash: String,
    pub normalized_text: String,
    pub raw_uri: String,
    pub captured_at: String,
}

impl From<SnapshotRecord> for Snapshot {
    fn from(record: SnapshotRecord) -> Self {
        Snapshot {
            id: record.id,
            document_id: record.document_id,
            captured_at: parse_datetime(&record.captured_at),
            title: record.title,
            topic: record.topic,
            score: record.score,
            effective_date: parse_date_opt(record.effective_date.as_deref()),
            form_id: record.form_id,
            content_hash: record.content_hash,
            normalized_text: record.normalized_text,
            raw_uri: record.raw_uri,
        }
    }
}

/// Diff record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::diffs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DiffRecord {
    pub id: i32,
    pub snapshot_id: i32,
    pub prev_snapshot_id: Option<i32>,
    pub diff_text: String,
    pub significance: i32,
}

impl From<DiffRecord> for Diff {
    fn from(record: DiffRecord) -> Self {
        Diff {
            id: record.id,
            snapshot_id: record.snapshot_id,
            prev_snapshot_id: record.prev_snapshot_id,
            diff_text: record.diff_text,
            significance: record.significance,
        }
    }
}

/// Subscription record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::subscriptions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubscriptionRecord {
    pub id: i32,
    pub org_name: String,
    pub email_to: String,
    pub states: String,
    pub topics: String,
    pub min_score: i32,
    pub cadence: String,
}

impl From<SubscriptionRecord> for Subscription {
    fn from(record: SubscriptionRecord) -> Self {
        Subscription {
            id: record.id,
            org_name: record.org_name,
            email_to: record.email_to,
            states: decode_list(&record.states),
            topics: decode_list(&record.topics),
            min_score: record.min_score,
            cadence: DigestCadence::from_str(&record.cadence).unwrap_or_default(),
        }
    }
}
