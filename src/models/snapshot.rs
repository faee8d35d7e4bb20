//! Snapshot lineage and diffs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time extraction of a document.
///
/// Snapshots of one document form an append-only chain ordered by
/// `captured_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i32,
    pub document_id: i32,
    pub captured_at: DateTime<Utc>,
    pub title: String,
    pub topic: String,
    pub score: i32,
    pub effective_date: Option<NaiveDate>,
    pub form_id: Option<String>,
    pub content_hash: String,
    pub normalized_text: String,
    pub raw_uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    pub document_id: i32,
    pub captured_at: DateTime<Utc>,
    pub title: String,
    pub topic: String,
    pub score: i32,
    pub effective_date: Option<NaiveDate>,
    pub form_id: Option<String>,
    pub content_hash: String,
    pub normalized_text: String,
    pub raw_uri: String,
}

impl NewSnapshot {
    pub fn into_snapshot(self, id: i32) -> Snapshot {
        Snapshot {
            id,
            document_id: self.document_id,
            captured_at: self.captured_at,
            title: self.title,
            topic: self.topic,
            score: self.score,
            effective_date: self.effective_date,
            form_id: self.form_id,
            content_hash: self.content_hash,
            normalized_text: self.normalized_text,
            raw_uri: self.raw_uri,
        }
    }
}

/// Delta between a snapshot and its predecessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub id: i32,
    pub snapshot_id: i32,
    pub prev_snapshot_id: Option<i32>,
    pub diff_text: String,
    pub significance: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDiff {
    pub snapshot_id: i32,
    pub prev_snapshot_id: Option<i32>,
    pub diff_text: String,
    pub significance: i32,
}

impl NewDiff {
    pub fn into_diff(self, id: i32) -> Diff {
        Diff {
            id,
            snapshot_id: self.snapshot_id,
            prev_snapshot_id: self.prev_snapshot_id,
            diff_text: self.diff_text,
            significance: self.significance,
        }
    }
}
