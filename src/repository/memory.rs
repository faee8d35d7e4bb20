//! In-memory storage for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Storage, StorageCounts, StorageError};
use crate::models::{
    Diff, Document, NewDiff, NewDocument, NewSnapshot, SeenUrl, Snapshot, Source, Subscription,
};

#[derive(Default)]
struct MemoryState {
    sources: Vec<Source>,
    seen_urls: HashMap<String, SeenUrl>,
    documents: Vec<Document>,
    snapshots: Vec<Snapshot>,
    diffs: Vec<Diff>,
    subscriptions: Vec<Subscription>,
}

/// Process-local [`Storage`] with the same uniqueness rules as the SQLite schema.
#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    fail_diff_writes: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only `create_diff` fail with `Unavailable`.
    pub fn set_fail_diff_writes(&self, fail: bool) {
        self.fail_diff_writes.store(fail, Ordering::SeqCst);
    }

    pub fn add_subscription(&self, mut sub: Subscription) -> Result<i32, StorageError> {
        let mut state = self.lock()?;
        sub.id = state.subscriptions.len() as i32 + 1;
        let id = sub.id;
        state.subscriptions.push(sub);
        Ok(id)
    }

    /// All snapshots in insertion order.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.lock().map(|s| s.snapshots.clone()).unwrap_or_default()
    }

    /// All diffs in insertion order.
    pub fn diffs(&self) -> Vec<Diff> {
        self.lock().map(|s| s.diffs.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_active_sources(&self) -> Result<Vec<Source>, StorageError> {
        Ok(self
            .lock()?
            .sources
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn list_sources(&self) -> Result<Vec<Source>, StorageError> {
        Ok(self.lock()?.sources.clone())
    }

    async fn upsert_source(&self, source: &Source) -> Result<i32, StorageError> {
        self.check_writable()?;
        let mut state = self.lock()?;

        if let Some(existing) = state
            .sources
            .iter_mut()
            .find(|s| s.state == source.state && s.name == source.name)
        {
            let id = existing.id;
            *existing = Source {
                id,
                ..source.clone()
            };
            return Ok(id);
        }

        let id = state.sources.len() as i32 + 1;
        state.sources.push(Source {
            id,
            ..source.clone()
        });
        Ok(id)
    }

    async fn get_seen_url(&self, url: &str) -> Result<Option<SeenUrl>, StorageError> {
        Ok(self.lock()?.seen_urls.get(url).cloned())
    }

    async fn upsert_seen_url(&self, seen: &SeenUrl) -> Result<(), StorageError> {
        self.check_writable()?;
        self.lock()?
            .seen_urls
            .insert(seen.url.clone(), seen.clone());
        Ok(())
    }

    async fn create_document(&self, doc: &NewDocument) -> Result<i32, StorageError> {
        self.check_writable()?;
        let mut state = self.lock()?;

        if state
            .documents
            .iter()
            .any(|d| d.source_id == doc.source_id && d.url == doc.url)
        {
            return Err(StorageError::Conflict(format!("document {}", doc.url)));
        }

        let id = state.documents.len() as i32 + 1;
        state.documents.push(doc.clone().into_document(id));
        Ok(id)
    }

    async fn find_document_by_url(
        &self,
        source_id: Option<i32>,
        url: &str,
    ) -> Result<Option<Document>, StorageError> {
        Ok(self
            .lock()?
            .documents
            .iter()
            .find(|d| d.source_id == source_id && d.url == url)
            .cloned())
    }

    async fn create_snapshot(&self, snapshot: &NewSnapshot) -> Result<i32, StorageError> {
        self.check_writable()?;
        let mut state = self.lock()?;

        if !state.documents.iter().any(|d| d.id == snapshot.document_id) {
            return Err(StorageError::NotFound(format!(
                "document {}",
                snapshot.document_id
            )));
        }

        let id = state.snapshots.len() as i32 + 1;
        state.snapshots.push(snapshot.clone().into_snapshot(id));
        Ok(id)
    }

    async fn get_latest_snapshot(
        &self,
        document_id: i32,
    ) -> Result<Option<Snapshot>, StorageError> {
        Ok(self
            .lock()?
            .snapshots
            .iter()
            .filter(|s| s.document_id == document_id)
            .max_by_key(|s| (s.captured_at, s.id))
            .cloned())
    }

    async fn list_snapshots(&self, document_id: i32) -> Result<Vec<Snapshot>, StorageError> {
        let mut chain: Vec<Snapshot> = self
            .lock()?
            .snapshots
            .iter()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect();
        chain.sort_by_key(|s| (s.captured_at, s.id));
        Ok(chain)
    }

    async fn create_diff(&self, diff: &NewDiff) -> Result<i32, StorageError> {
        self.check_writable()?;
        if self.fail_diff_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("diff writes disabled".to_string()));
        }
        let mut state = self.lock()?;

        if state.diffs.iter().any(|d| d.snapshot_id == diff.snapshot_id) {
            return Err(StorageError::Conflict(format!(
                "diff for snapshot {}",
                diff.snapshot_id
            )));
        }

        let id = state.diffs.len() as i32 + 1;
        state.diffs.push(diff.clone().into_diff(id));
        Ok(id)
    }

    async fn get_diff_for_snapshot(&self, snapshot_id: i32) -> Result<Option<Diff>, StorageError> {
        Ok(self
            .lock()?
            .diffs
            .iter()
            .find(|d| d.snapshot_id == snapshot_id)
            .cloned())
    }

    async fn get_subscriptions(&self) -> Result<Vec<Subscription>, StorageError> {
        Ok(self.lock()?.subscriptions.clone())
    }

    async fn counts(&self) -> Result<StorageCounts, StorageError> {
        let state = self.lock()?;
        Ok(StorageCounts {
            sources: state.sources.len(),
            seen_urls: state.seen_urls.len(),
            documents: state.documents.len(),
            snapshots: state.snapshots.len(),
            diffs: state.diffs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use chrono::Utc;

    #[tokio::test]
    async fn test_upsert_source_keeps_id() {
        let storage = InMemoryStorage::new();
        let src = Source::new("NY", "Bulletins", "https://tax.ny.gov/", SourceType::Feed);
        let id = storage.upsert_source(&src).await.unwrap();
        let again = storage.upsert_source(&src).await.unwrap();
        assert_eq!(id, again);
        assert_eq!(storage.counts().await.unwrap().sources, 1);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let storage = InMemoryStorage::new();
        storage.set_fail_writes(true);
        let seen = SeenUrl::new("https://a.gov/", None, "h");
        assert!(matches!(
            storage.upsert_seen_url(&seen).await,
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_requires_document() {
        let storage = InMemoryStorage::new();
        let snap = NewSnapshot {
            document_id: 42,
            captured_at: Utc::now(),
            title: "t".to_string(),
            topic: "General".to_string(),
            score: 1,
            effective_date: None,
            form_id: None,
            content_hash: "h".to_string(),
            normalized_text: "x".to_string(),
            raw_uri: "mem://x".to_string(),
        };
        assert!(matches!(
            storage.create_snapshot(&snap).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
