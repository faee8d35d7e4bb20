//! Diesel-based storage for SQLite.
//!
//! Uses diesel-async's SyncConnectionWrapper to provide an async interface
//! while keeping Diesel's compile-time query checking.

use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel_async::RunQueryDsl;

use super::diesel_models::{
    DiffRecord, DocumentRecord, SeenUrlRecord, SnapshotRecord, SourceRecord, SubscriptionRecord,
};
use super::diesel_pool::{AsyncSqliteConnection, AsyncSqlitePool};
use super::util::encode_list;
use super::{format_datetime, Storage, StorageCounts, StorageError};
use crate::models::{
    Diff, Document, NewDiff, NewDocument, NewSnapshot, SeenUrl, Snapshot, Source, Subscription,
};
use crate::schema::{diffs, documents, seen_urls, snapshots, sources, subscriptions};

#[derive(QueryableByName)]
struct LastInsertRowId {
    #[diesel(sql_type = BigInt, column_name = "last_insert_rowid()")]
    id: i64,
}

async fn last_insert_rowid(conn: &mut AsyncSqliteConnection) -> Result<i32, StorageError> {
    let row = diesel::sql_query("SELECT last_insert_rowid()")
        .get_result::<LastInsertRowId>(conn)
        .await?;
    i32::try_from(row.id).map_err(|_| StorageError::Conflict(format!("row id {} overflows", row.id)))
}

/// SQLite implementation of [`Storage`].
#[derive(Clone)]
pub struct DieselStorage {
    pool: AsyncSqlitePool,
}

impl DieselStorage {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Register a subscription. Alert dispatch is handled elsewhere.
    pub async fn create_subscription(&self, sub: &Subscription) -> Result<i32, StorageError> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(subscriptions::table)
            .values((
                subscriptions::org_name.eq(&sub.org_name),
                subscriptions::email_to.eq(&sub.email_to),
                subscriptions::states.eq(encode_list(&sub.states)),
                subscriptions::topics.eq(encode_list(&sub.topics)),
                subscriptions::min_score.eq(sub.min_score),
                subscriptions::cadence.eq(sub.cadence.as_str()),
            ))
            .execute(&mut conn)
            .await?;

        last_insert_rowid(&mut conn).await
    }
}

#[async_trait]
impl Storage for DieselStorage {
    async fn get_active_sources(&self) -> Result<Vec<Source>, StorageError> {
        let mut conn = self.pool.get().await?;

        let records = sources::table
            .filter(sources::active.ne(0))
            .order(sources::id.asc())
            .select(SourceRecord::as_select())
            .load::<SourceRecord>(&mut conn)
            .await?;

        Ok(records.into_iter().map(Source::from).collect())
    }

    async fn list_sources(&self) -> Result<Vec<Source>, StorageError> {
        let mut conn = self.pool.get().await?;

        let records = sources::table
            .order((sources::state.asc(), sources::name.asc()))
            .select(SourceRecord::as_select())
            .load::<SourceRecord>(&mut conn)
            .await?;

        Ok(records.into_iter().map(Source::from).collect())
    }

    async fn upsert_source(&self, source: &Source) -> Result<i32, StorageError> {
        let mut conn = self.pool.get().await?;
        let active = i32::from(source.active);

        diesel::insert_into(sources::table)
            .values((
                sources::state.eq(&source.state),
                sources::name.eq(&source.name),
                sources::url.eq(&source.url),
                sources::allow_pattern.eq(source.allow_pattern.as_deref()),
                sources::source_type.eq(source.source_type.as_str()),
                sources::feed_url.eq(source.feed_url.as_deref()),
                sources::sitemap_url.eq(source.sitemap_url.as_deref()),
                sources::active.eq(active),
            ))
            .on_conflict((sources::state, sources::name))
            .do_update()
            .set((
                sources::url.eq(&source.url),
                sources::allow_pattern.eq(source.allow_pattern.as_deref()),
                sources::source_type.eq(source.source_type.as_str()),
                sources::feed_url.eq(source.feed_url.as_deref()),
                sources::sitemap_url.eq(source.sitemap_url.as_deref()),
                sources::active.eq(active),
            ))
            .execute(&mut conn)
            .await?;

        sources::table
            .filter(sources::state.eq(&source.state))
            .filter(sources::name.eq(&source.name))
            .select(sources::id)
            .first::<i32>(&mut conn)
            .await
            .map_err(|e| StorageError::from_diesel(e, &source.label()))
    }

    async fn get_seen_url(&self, url: &str) -> Result<Option<SeenUrl>, StorageError> {
        let mut conn = self.pool.get().await?;

        let record = seen_urls::table
            .find(url)
            .select(SeenUrlRecord::as_select())
            .first::<SeenUrlRecord>(&mut conn)
            .await
            .optional()?;

        Ok(record.map(SeenUrl::from))
    }

    async fn upsert_seen_url(&self, seen: &SeenUrl) -> Result<(), StorageError> {
        let mut conn = self.pool.get().await?;

        diesel::replace_into(seen_urls::table)
            .values((
                seen_urls::url.eq(&seen.url),
                seen_urls::source_id.eq(seen.source_id),
                seen_urls::first_seen.eq(format_datetime(&seen.first_seen)),
                seen_urls::last_fetched.eq(format_datetime(&seen.last_fetched)),
                seen_urls::last_hash.eq(seen.last_hash.as_deref()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn create_document(&self, doc: &NewDocument) -> Result<i32, StorageError> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(documents::table)
            .values((
                documents::source_id.eq(doc.source_id),
                documents::url.eq(&doc.url),
                documents::raw_uri.eq(&doc.raw_uri),
                documents::normalized_text.eq(&doc.normalized_text),
                documents::content_hash.eq(&doc.content_hash),
                documents::pdf_revision.eq(doc.pdf_revision.as_deref()),
                documents::mime.eq(&doc.mime),
                documents::fetched_at.eq(format_datetime(&doc.fetched_at)),
            ))
            .execute(&mut conn)
            .await
            .map_err(|e| StorageError::from_diesel(e, &format!("document {}", doc.url)))?;

        last_insert_rowid(&mut conn).await
    }

    async fn find_document_by_url(
        &self,
        source_id: Option<i32>,
        url: &str,
    ) -> Result<Option<Document>, StorageError> {
        let mut conn = self.pool.get().await?;

        let mut query = documents::table
            .filter(documents::url.eq(url))
            .select(DocumentRecord::as_select())
            .into_boxed();
        query = match source_id {
            Some(id) => query.filter(documents::source_id.eq(id)),
            None => query.filter(documents::source_id.is_null()),
        };

        let record = query
            .order(documents::id.asc())
            .first::<DocumentRecord>(&mut conn)
            .await
            .optional()?;

        Ok(record.map(Document::from))
    }

    async fn create_snapshot(&self, snapshot: &NewSnapshot) -> Result<i32, StorageError> {
        let mut conn = self.pool.get().await?;
        let effective_date = snapshot
            .effective_date
            .map(|d| d.format("%Y-%m-%d").to_string());

        diesel::insert_into(snapshots::table)
            .values((
                snapshots::document_id.eq(snapshot.document_id),
                snapshots::topic.eq(&snapshot.topic),
                snapshots::title.eq(&snapshot.title),
                snapshots::score.eq(snapshot.score),
                snapshots::effective_date.eq(effective_date.as_deref()),
                snapshots::form_id.eq(snapshot.form_id.as_deref()),
                snapshots::content_hash.eq(&snapshot.content_hash),
                snapshots::normalized_text.eq(&snapshot.normalized_text),
                snapshots::raw_uri.eq(&snapshot.raw_uri),
                snapshots::captured_at.eq(format_datetime(&snapshot.captured_at)),
            ))
            .execute(&mut conn)
            .await?;

        last_insert_rowid(&mut conn).await
    }

    async fn get_latest_snapshot(
        &self,
        document_id: i32,
    ) -> Result<Option<Snapshot>, StorageError> {
        let mut conn = self.pool.get().await?;

        let record = snapshots::table
            .filter(snapshots::document_id.eq(document_id))
            .order((snapshots::captured_at.desc(), snapshots::id.desc()))
            .select(SnapshotRecord::as_select())
            .first::<SnapshotRecord>(&mut conn)
            .await
            .optional()?;

        Ok(record.map(Snapshot::from))
    }

    async fn list_snapshots(&self, document_id: i32) -> Result<Vec<Snapshot>, StorageError> {
        let mut conn = self.pool.get().await?;

        let records = snapshots::table
            .filter(snapshots::document_id.eq(document_id))
            .order((snapshots::captured_at.asc(), snapshots::id.asc()))
            .select(SnapshotRecord::as_select())
            .load::<SnapshotRecord>(&mut conn)
            .await?;

        Ok(records.into_iter().map(Snapshot::from).collect())
    }

    async fn create_diff(&self, diff: &NewDiff) -> Result<i32, StorageError> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(diffs::table)
            .values((
                diffs::snapshot_id.eq(diff.snapshot_id),
                diffs::prev_snapshot_id.eq(diff.prev_snapshot_id),
                diffs::diff_text.eq(&diff.diff_text),
                diffs::significance.eq(diff.significance),
            ))
            .execute(&mut conn)
            .await
            .map_err(|e| {
                StorageError::from_diesel(e, &format!("diff for snapshot {}", diff.snapshot_id))
            })?;

        last_insert_rowid(&mut conn).await
    }

    async fn get_diff_for_snapshot(&self, snapshot_id: i32) -> Result<Option<Diff>, StorageError> {
        let mut conn = self.pool.get().await?;

        let record = diffs::table
            .filter(diffs::snapshot_id.eq(snapshot_id))
            .select(DiffRecord::as_select())
            .first::<DiffRecord>(&mut conn)
            .await
            .optional()?;

        Ok(record.map(Diff::from))
    }

    async fn get_subscriptions(&self) -> Result<Vec<Subscription>, StorageError> {
        let mut conn = self.pool.get().await?;

        let records = subscriptions::table
            .order(subscriptions::id.asc())
            .select(SubscriptionRecord::as_select())
            .load::<SubscriptionRecord>(&mut conn)
            .await?;

        Ok(records.into_iter().map(Subscription::from).collect())
    }

    async fn counts(&self) -> Result<StorageCounts, StorageError> {
        let mut conn = self.pool.get().await?;

        let sources: i64 = sources::table.select(count_star()).first(&mut conn).await?;
        let seen_urls: i64 = seen_urls::table.select(count_star()).first(&mut conn).await?;
        let documents: i64 = documents::table.select(count_star()).first(&mut conn).await?;
        let snapshots: i64 = snapshots::table.select(count_star()).first(&mut conn).await?;
        let diffs: i64 = diffs::table.select(count_star()).first(&mut conn).await?;

        Ok(StorageCounts {
            sources: sources as usize,
            seen_urls: seen_urls as usize,
            documents: documents as usize,
            snapshots: snapshots as usize,
            diffs: diffs as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DigestCadence, SourceType};
    use crate::repository::migrations::run_migrations;
    use chrono::{Duration, NaiveDate, Utc};
    use tempfile::tempdir;

    async fn setup_test_db() -> (DieselStorage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let pool = AsyncSqlitePool::from_path(&db_path);
        run_migrations(&pool).await.unwrap();
        (DieselStorage::new(pool), dir)
    }

    fn new_document(source_id: Option<i32>, url: &str) -> NewDocument {
        NewDocument {
            source_id,
            url: url.to_string(),
            fetched_at: Utc::now(),
            raw_uri: "file:///tmp/raw.html".to_string(),
            normalized_text: "rates are changing".to_string(),
            content_hash: "abc".to_string(),
            mime: "text/html".to_string(),
            pdf_revision: None,
        }
    }

    fn new_snapshot(document_id: i32, hash: &str) -> NewSnapshot {
        NewSnapshot {
            document_id,
            captured_at: Utc::now(),
            title: "Rate notice".to_string(),
            topic: "Rates".to_string(),
            score: 5,
            effective_date: NaiveDate::from_ymd_opt(2024, 10, 1),
            form_id: Some("01-339".to_string()),
            content_hash: hash.to_string(),
            normalized_text: "rates are changing".to_string(),
            raw_uri: "file:///tmp/raw.html".to_string(),
        }
    }

    #[tokio::test]
    async fn test_source_upsert_is_keyed_by_state_and_name() {
        let (storage, _dir) = setup_test_db().await;

        let src = Source::new("TX", "News", "https://comptroller.texas.gov/", SourceType::HtmlHub);
        let id1 = storage.upsert_source(&src).await.unwrap();

        let mut changed = src.clone().with_allow_pattern("texas\\.gov/taxes");
        changed.active = false;
        let id2 = storage.upsert_source(&changed).await.unwrap();

        assert_eq!(id1, id2);
        assert!(storage.get_active_sources().await.unwrap().is_empty());
        let all = storage.list_sources().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].allow_pattern.as_deref(), Some("texas\\.gov/taxes"));
    }

    #[tokio::test]
    async fn test_seen_url_roundtrip() {
        let (storage, _dir) = setup_test_db().await;

        assert!(storage.get_seen_url("https://a.gov/").await.unwrap().is_none());

        let mut seen = SeenUrl::new("https://a.gov/", None, "h1");
        storage.upsert_seen_url(&seen).await.unwrap();
        seen.touch("h2");
        storage.upsert_seen_url(&seen).await.unwrap();

        let fetched = storage.get_seen_url("https://a.gov/").await.unwrap().unwrap();
        assert_eq!(fetched.last_hash.as_deref(), Some("h2"));
        assert_eq!(storage.counts().await.unwrap().seen_urls, 1);
    }

    #[tokio::test]
    async fn test_duplicate_document_conflicts() {
        let (storage, _dir) = setup_test_db().await;
        let src = Source::new("CA", "Notices", "https://cdtfa.ca.gov/", SourceType::HtmlHub);
        let source_id = storage.upsert_source(&src).await.unwrap();

        let doc = new_document(Some(source_id), "https://cdtfa.ca.gov/n/1");
        let id = storage.create_document(&doc).await.unwrap();
        let err = storage.create_document(&doc).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let found = storage
            .find_document_by_url(Some(source_id), "https://cdtfa.ca.gov/n/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert!(storage
            .find_document_by_url(None, "https://cdtfa.ca.gov/n/1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_snapshot_chain_and_diff() {
        let (storage, _dir) = setup_test_db().await;
        let doc_id = storage
            .create_document(&new_document(None, "https://a.gov/doc"))
            .await
            .unwrap();

        let first = storage.create_snapshot(&new_snapshot(doc_id, "h1")).await.unwrap();
        let mut later = new_snapshot(doc_id, "h2");
        later.captured_at = Utc::now() + Duration::seconds(1);
        let second = storage.create_snapshot(&later).await.unwrap();

        let latest = storage.get_latest_snapshot(doc_id).await.unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.effective_date, NaiveDate::from_ymd_opt(2024, 10, 1));

        let chain = storage.list_snapshots(doc_id).await.unwrap();
        assert_eq!(chain.iter().map(|s| s.id).collect::<Vec<_>>(), vec![first, second]);

        let diff = NewDiff {
            snapshot_id: second,
            prev_snapshot_id: Some(first),
            diff_text: "- old\n+ new".to_string(),
            significance: 3,
        };
        storage.create_diff(&diff).await.unwrap();
        assert!(matches!(
            storage.create_diff(&diff).await.unwrap_err(),
            StorageError::Conflict(_)
        ));

        let stored = storage.get_diff_for_snapshot(second).await.unwrap().unwrap();
        assert_eq!(stored.prev_snapshot_id, Some(first));
    }

    #[tokio::test]
    async fn test_subscriptions() {
        let (storage, _dir) = setup_test_db().await;
        let sub = Subscription {
            id: 0,
            org_name: "Acme".to_string(),
            email_to: "tax@acme.test".to_string(),
            states: vec!["TX".to_string()],
            topics: vec![],
            min_score: 3,
            cadence: DigestCadence::Daily,
        };
        storage.create_subscription(&sub).await.unwrap();

        let subs = storage.get_subscriptions().await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].states, vec!["TX".to_string()]);
        assert_eq!(subs[0].cadence, DigestCadence::Daily);
    }
}
