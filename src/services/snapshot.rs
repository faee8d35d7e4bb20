//! Content-hash deduplication and snapshot lineage.
//!
//! All reads and writes for one URL happen under a per-URL lock, so
//! concurrent ingests of the same URL never race to create documents. Write
//! order is payload, document, snapshot, diff, then the seen-URL ledger.
//! The latest snapshot, not the ledger, decides whether content changed. If
//! an earlier ingest stopped between the snapshot and diff writes, the next
//! ingest writes the missing diff before comparing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::diff::DiffEngine;
use super::locks::KeyedLocks;
use crate::extract::Extracted;
use crate::models::{
    ChangeKind, ChangeRecord, Diff, Document, NewDiff, NewDocument, NewSnapshot, SeenUrl,
    Snapshot, Source,
};
use crate::repository::{Storage, StorageError};
use crate::storage::{payload_key, PayloadStore};
use crate::utils::normalize_url;

/// Raw payload as fetched.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    pub bytes: &'a [u8],
    pub mime: &'a str,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestKind {
    /// First capture of this URL.
    New,
    /// Content hash differs from the latest snapshot.
    Changed,
    /// Content hash matches; only the ledger was touched.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub kind: IngestKind,
    pub document: Document,
    pub snapshot: Option<Snapshot>,
    pub diff: Option<Diff>,
}

impl IngestOutcome {
    /// Change record for anything that produced a snapshot.
    pub fn change_record(&self, source: &Source) -> Option<ChangeRecord> {
        let snapshot = self.snapshot.as_ref()?;
        let kind = match self.kind {
            IngestKind::New => ChangeKind::New,
            IngestKind::Changed => ChangeKind::Changed,
            IngestKind::Unchanged => return None,
        };
        Some(ChangeRecord {
            document_id: self.document.id,
            snapshot_id: snapshot.id,
            diff_id: self.diff.as_ref().map(|d| d.id),
            significance_score: self
                .diff
                .as_ref()
                .map_or(snapshot.score, |d| d.significance),
            topic: snapshot.topic.clone(),
            state: source.state.clone(),
            url: self.document.url.clone(),
            title: snapshot.title.clone(),
            kind,
            subscription_ids: Vec::new(),
        })
    }
}

pub struct SnapshotEngine {
    storage: Arc<dyn Storage>,
    payloads: Arc<dyn PayloadStore>,
    differ: DiffEngine,
    locks: KeyedLocks,
}

impl SnapshotEngine {
    pub fn new(storage: Arc<dyn Storage>, payloads: Arc<dyn PayloadStore>) -> Self {
        Self {
            storage,
            payloads,
            differ: DiffEngine::new(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Store raw bytes and return their URI.
    pub async fn archive(&self, url: &str, bytes: &[u8], mime: &str) -> Result<String, StorageError> {
        self.payloads.put(&payload_key(url, bytes, mime), bytes).await
    }

    /// Record one fetch of `url`.
    pub async fn ingest(
        &self,
        source: &Source,
        url: &str,
        payload: Payload<'_>,
        extracted: &Extracted,
    ) -> Result<IngestOutcome, StorageError> {
        let key = normalize_url(url).unwrap_or_else(|| url.to_string());
        let _guard = self.locks.lock(&key).await;

        let hash = extracted.content_hash.as_str();
        let seen = self.storage.get_seen_url(&key).await?;
        let owner = seen
            .as_ref()
            .map_or(Some(source.id), |s| s.source_id);

        let document = self.storage.find_document_by_url(owner, &key).await?;
        let Some(document) = document else {
            return self
                .create_new(source, &key, seen, payload, extracted)
                .await;
        };

        let latest = self.storage.get_latest_snapshot(document.id).await?;
        let recovered = match &latest {
            Some(snap) => self.backfill_diff(document.id, snap).await?,
            None => None,
        };

        if latest.as_ref().is_some_and(|snap| snap.content_hash == hash) {
            self.touch_ledger(&key, owner, seen, hash).await?;
            if let Some(diff) = recovered {
                // The interrupted change was never reported; report it now.
                info!("Recovered diff for {} (snapshot {})", key, diff.snapshot_id);
                return Ok(IngestOutcome {
                    kind: IngestKind::Changed,
                    document,
                    snapshot: latest,
                    diff: Some(diff),
                });
            }
            debug!("Unchanged: {}", key);
            return Ok(IngestOutcome {
                kind: IngestKind::Unchanged,
                document,
                snapshot: None,
                diff: None,
            });
        }

        let raw_uri = self.archive(&key, payload.bytes, payload.mime).await?;
        let captured_at = match &latest {
            Some(prev) => payload.fetched_at.max(prev.captured_at + Duration::microseconds(1)),
            None => payload.fetched_at,
        };
        let snapshot = self
            .write_snapshot(document.id, captured_at, raw_uri, extracted)
            .await?;

        let diff = match &latest {
            Some(prev) => Some(self.write_diff(prev, &snapshot).await?),
            None => None,
        };

        self.touch_ledger(&key, owner, seen, hash).await?;
        info!(
            "Changed: {} (snapshot {}, significance {})",
            key,
            snapshot.id,
            diff.as_ref().map_or(snapshot.score, |d| d.significance)
        );

        Ok(IngestOutcome {
            kind: if latest.is_some() {
                IngestKind::Changed
            } else {
                IngestKind::New
            },
            document,
            snapshot: Some(snapshot),
            diff,
        })
    }

    async fn create_new(
        &self,
        source: &Source,
        key: &str,
        seen: Option<SeenUrl>,
        payload: Payload<'_>,
        extracted: &Extracted,
    ) -> Result<IngestOutcome, StorageError> {
        let raw_uri = self.archive(key, payload.bytes, payload.mime).await?;
        let owner = seen.as_ref().map_or(Some(source.id), |s| s.source_id);

        let new_doc = NewDocument {
            source_id: owner,
            url: key.to_string(),
            fetched_at: payload.fetched_at,
            raw_uri: raw_uri.clone(),
            normalized_text: extracted.normalized_text.clone(),
            content_hash: extracted.content_hash.clone(),
            mime: payload.mime.to_string(),
            pdf_revision: extracted.pdf_revision.clone(),
        };
        let document_id = self.storage.create_document(&new_doc).await?;
        let document = new_doc.into_document(document_id);

        let snapshot = self
            .write_snapshot(document_id, payload.fetched_at, raw_uri, extracted)
            .await?;
        self.touch_ledger(key, owner, seen, &extracted.content_hash)
            .await?;
        info!("New: {} (document {})", key, document_id);

        Ok(IngestOutcome {
            kind: IngestKind::New,
            document,
            snapshot: Some(snapshot),
            diff: None,
        })
    }

    async fn write_snapshot(
        &self,
        document_id: i32,
        captured_at: DateTime<Utc>,
        raw_uri: String,
        extracted: &Extracted,
    ) -> Result<Snapshot, StorageError> {
        let new_snap = NewSnapshot {
            document_id,
            captured_at,
            title: extracted.title.clone(),
            topic: extracted.fields.topic.clone(),
            score: extracted.fields.score,
            effective_date: extracted.fields.effective_date,
            form_id: extracted.fields.form_id.clone(),
            content_hash: extracted.content_hash.clone(),
            normalized_text: extracted.normalized_text.clone(),
            raw_uri,
        };
        let id = self.storage.create_snapshot(&new_snap).await?;
        Ok(new_snap.into_snapshot(id))
    }

    /// Write the diff for `latest` if it has a predecessor but no diff.
    async fn backfill_diff(
        &self,
        document_id: i32,
        latest: &Snapshot,
    ) -> Result<Option<Diff>, StorageError> {
        if self.storage.get_diff_for_snapshot(latest.id).await?.is_some() {
            return Ok(None);
        }
        let chain = self.storage.list_snapshots(document_id).await?;
        let prev = chain.iter().take_while(|s| s.id != latest.id).last();
        match prev {
            Some(prev) => Ok(Some(self.write_diff(prev, latest).await?)),
            None => Ok(None),
        }
    }

    async fn write_diff(&self, prev: &Snapshot, snapshot: &Snapshot) -> Result<Diff, StorageError> {
        let result = self
            .differ
            .diff_blocking(prev.clone(), snapshot.clone())
            .await
            .map_err(|e| StorageError::Unavailable(format!("diff task failed: {}", e)))?;
        let new_diff = NewDiff {
            snapshot_id: snapshot.id,
            prev_snapshot_id: Some(prev.id),
            diff_text: result.diff_text,
            significance: result.significance,
        };
        let id = self.storage.create_diff(&new_diff).await?;
        Ok(new_diff.into_diff(id))
    }

    async fn touch_ledger(
        &self,
        key: &str,
        owner: Option<i32>,
        seen: Option<SeenUrl>,
        hash: &str,
    ) -> Result<(), StorageError> {
        let entry = match seen {
            Some(mut s) => {
                s.touch(hash);
                s
            }
            None => SeenUrl::new(key, owner, hash),
        };
        self.storage.upsert_seen_url(&entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ContentExtractor;
    use crate::models::SourceType;
    use crate::repository::InMemoryStorage;
    use crate::storage::InMemoryPayloadStore;

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        payloads: Arc<InMemoryPayloadStore>,
        engine: Arc<SnapshotEngine>,
        source: Source,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let payloads = Arc::new(InMemoryPayloadStore::new());
        let mut source = Source::new("TX", "news", "https://comptroller.tx.gov/", SourceType::HtmlHub);
        source.id = storage.upsert_source(&source).await.unwrap();
        let engine = Arc::new(SnapshotEngine::new(storage.clone(), payloads.clone()));
        Fixture {
            storage,
            payloads,
            engine,
            source,
        }
    }

    fn extract(text: &str) -> Extracted {
        ContentExtractor::default()
            .extract(text.as_bytes(), "text/plain")
            .unwrap()
    }

    fn payload(bytes: &[u8]) -> Payload<'_> {
        Payload {
            bytes,
            mime: "text/plain",
            fetched_at: Utc::now(),
        }
    }

    const URL: &str = "HTTPS://Comptroller.tx.gov:443/taxes/notice-1";

    #[tokio::test]
    async fn test_new_then_unchanged() {
        let f = fixture().await;
        let text = "Notice: local sales tax rate change\nrate increase of 1 percent";
        let ex = extract(text);

        let first = f.engine.ingest(&f.source, URL, payload(text.as_bytes()), &ex).await.unwrap();
        assert_eq!(first.kind, IngestKind::New);
        assert!(first.diff.is_none());
        assert_eq!(first.document.url, "https://comptroller.tx.gov/taxes/notice-1");

        let cosmetic = "Notice:  Local sales tax rate change\r\nrate increase of 1\u{a0}percent\n";
        let again = f
            .engine
            .ingest(&f.source, URL, payload(cosmetic.as_bytes()), &extract(cosmetic))
            .await
            .unwrap();
        assert_eq!(again.kind, IngestKind::Unchanged);
        assert_eq!(again.document.id, first.document.id);

        let counts = f.storage.counts().await.unwrap();
        assert_eq!((counts.documents, counts.snapshots, counts.diffs, counts.seen_urls), (1, 1, 0, 1));
        assert_eq!(f.payloads.len(), 1);
    }

    #[tokio::test]
    async fn test_change_links_previous_snapshot() {
        let f = fixture().await;
        let v1 = extract("Form ST-3 resale certificate\nrevised effective 1/1/2024");
        let v2 = extract("Form ST-3 resale certificate\nrevised effective 7/1/2024");

        let first = f.engine.ingest(&f.source, URL, payload(b"v1"), &v1).await.unwrap();
        let second = f.engine.ingest(&f.source, URL, payload(b"v2"), &v2).await.unwrap();

        assert_eq!(second.kind, IngestKind::Changed);
        let prev = first.snapshot.unwrap();
        let snap = second.snapshot.clone().unwrap();
        let diff = second.diff.clone().unwrap();
        assert_eq!(diff.prev_snapshot_id, Some(prev.id));
        assert_eq!(diff.snapshot_id, snap.id);
        assert!(snap.captured_at > prev.captured_at);
        assert!(diff.diff_text.contains("+ revised effective 7/1/2024"));

        let record = second.change_record(&f.source).unwrap();
        assert_eq!(record.kind, ChangeKind::Changed);
        assert_eq!(record.diff_id, Some(diff.id));
        assert_eq!(record.significance_score, diff.significance);
        assert_eq!(record.state, "TX");

        let chain = f.storage.list_snapshots(first.document.id).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(f.storage.counts().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_concurrent_ingest_creates_one_document() {
        let f = fixture().await;
        let ex = Arc::new(extract("Bulletin: marketplace facilitator collection update"));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let (engine, source, ex) = (f.engine.clone(), f.source.clone(), ex.clone());
            handles.push(tokio::spawn(async move {
                engine.ingest(&source, URL, payload(b"same"), &ex).await.map(|o| o.kind)
            }));
        }
        let mut kinds = Vec::new();
        for h in handles {
            kinds.push(h.await.unwrap().unwrap());
        }

        assert_eq!(kinds.iter().filter(|k| **k == IngestKind::New).count(), 1);
        let counts = f.storage.counts().await.unwrap();
        assert_eq!((counts.documents, counts.snapshots), (1, 1));
    }

    #[tokio::test]
    async fn test_storage_failure_propagates_and_repairs() {
        let f = fixture().await;
        let v1 = extract("first version of the exemption notice for grocery food items");
        f.engine.ingest(&f.source, URL, payload(b"1"), &v1).await.unwrap();

        f.storage.set_fail_writes(true);
        let v2 = extract("second version of the exemption notice for grocery food items");
        let err = f.engine.ingest(&f.source, URL, payload(b"2"), &v2).await;
        assert!(matches!(err, Err(StorageError::Unavailable(_))));

        f.storage.set_fail_writes(false);
        let retried = f.engine.ingest(&f.source, URL, payload(b"2"), &v2).await.unwrap();
        assert_eq!(retried.kind, IngestKind::Changed);
        assert_eq!(f.storage.diffs().len(), 1);
    }

    #[tokio::test]
    async fn test_diff_failure_is_backfilled_on_retry() {
        let f = fixture().await;
        let v1 = extract("first version of the exemption notice for grocery food items");
        let v2 = extract("second version of the exemption notice for grocery food items");
        f.engine.ingest(&f.source, URL, payload(b"1"), &v1).await.unwrap();

        f.storage.set_fail_diff_writes(true);
        let err = f.engine.ingest(&f.source, URL, payload(b"2"), &v2).await;
        assert!(matches!(err, Err(StorageError::Unavailable(_))));
        assert_eq!(f.storage.snapshots().len(), 2);
        assert!(f.storage.diffs().is_empty());

        f.storage.set_fail_diff_writes(false);
        let retried = f.engine.ingest(&f.source, URL, payload(b"2"), &v2).await.unwrap();
        assert_eq!(retried.kind, IngestKind::Changed);
        let diff = retried.diff.unwrap();
        let chain = f.storage.list_snapshots(retried.document.id).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(diff.snapshot_id, chain[1].id);
        assert_eq!(diff.prev_snapshot_id, Some(chain[0].id));

        let again = f.engine.ingest(&f.source, URL, payload(b"2"), &v2).await.unwrap();
        assert_eq!(again.kind, IngestKind::Unchanged);
        assert_eq!(f.storage.diffs().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_ledger_does_not_hide_revert() {
        let f = fixture().await;
        let v1 = extract("original text of the marketplace facilitator bulletin");
        let v2 = extract("amended text of the marketplace facilitator bulletin");
        f.engine.ingest(&f.source, URL, payload(b"1"), &v1).await.unwrap();
        f.engine.ingest(&f.source, URL, payload(b"2"), &v2).await.unwrap();

        // Ledger still claims v1 although the latest snapshot is v2.
        let key = normalize_url(URL).unwrap();
        let mut seen = f.storage.get_seen_url(&key).await.unwrap().unwrap();
        seen.touch(&v1.content_hash);
        f.storage.upsert_seen_url(&seen).await.unwrap();

        let reverted = f.engine.ingest(&f.source, URL, payload(b"1"), &v1).await.unwrap();
        assert_eq!(reverted.kind, IngestKind::Changed);
        assert_eq!(f.storage.snapshots().len(), 3);
        assert_eq!(f.storage.diffs().len(), 2);
    }

    #[tokio::test]
    async fn test_initial_record_uses_classifier_score() {
        let f = fixture().await;
        let ex = extract("the sales tax rate will increase to 8 percent");
        let out = f.engine.ingest(&f.source, URL, payload(b"x"), &ex).await.unwrap();
        let record = out.change_record(&f.source).unwrap();
        assert_eq!(record.kind, ChangeKind::New);
        assert_eq!(record.diff_id, None);
        assert_eq!(record.significance_score, ex.fields.score);
    }
}
