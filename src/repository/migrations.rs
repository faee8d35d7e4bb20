//! SQLite schema creation.
//!
//! Statements are idempotent so `init` and every crawl can run them.

use diesel_async::SimpleAsyncConnection;
use tracing::debug;

use super::diesel_pool::{AsyncSqlitePool, DieselError};

/// Schema for all pipeline tables.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    state TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    allow_pattern TEXT,
    source_type TEXT NOT NULL,
    feed_url TEXT,
    sitemap_url TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    UNIQUE(state, name)
);

CREATE TABLE IF NOT EXISTS seen_urls (
    url TEXT PRIMARY KEY,
    source_id INTEGER REFERENCES sources(id) ON DELETE SET NULL,
    first_seen TEXT NOT NULL,
    last_fetched TEXT NOT NULL,
    last_hash TEXT
);

CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER REFERENCES sources(id) ON DELETE SET NULL,
    url TEXT NOT NULL,
    raw_uri TEXT NOT NULL,
    normalized_text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    pdf_revision TEXT,
    mime TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_source_url
    ON documents(IFNULL(source_id, -1), url);

CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    topic TEXT NOT NULL,
    title TEXT NOT NULL,
    score INTEGER NOT NULL DEFAULT 0,
    effective_date TEXT,
    form_id TEXT,
    content_hash TEXT NOT NULL,
    normalized_text TEXT NOT NULL,
    raw_uri TEXT NOT NULL,
    captured_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS diffs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL UNIQUE REFERENCES snapshots(id) ON DELETE CASCADE,
    prev_snapshot_id INTEGER REFERENCES snapshots(id) ON DELETE SET NULL,
    diff_text TEXT NOT NULL,
    significance INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_name TEXT NOT NULL,
    email_to TEXT NOT NULL,
    states TEXT NOT NULL DEFAULT '[]',
    topics TEXT NOT NULL DEFAULT '[]',
    min_score INTEGER NOT NULL DEFAULT 0,
    cadence TEXT NOT NULL DEFAULT 'weekly'
);

CREATE INDEX IF NOT EXISTS idx_sources_state ON sources(state);
CREATE INDEX IF NOT EXISTS idx_documents_url ON documents(url);
CREATE INDEX IF NOT EXISTS idx_snapshots_document_id ON snapshots(document_id, captured_at);
CREATE INDEX IF NOT EXISTS idx_snapshots_topic ON snapshots(topic);
CREATE INDEX IF NOT EXISTS idx_snapshots_captured_at ON snapshots(captured_at DESC);
CREATE INDEX IF NOT EXISTS idx_diffs_prev_snapshot_id ON diffs(prev_snapshot_id);
"#;

/// Create any missing tables and indexes.
pub async fn run_migrations(pool: &AsyncSqlitePool) -> Result<(), DieselError> {
    debug!("Applying schema to {}", pool.database_url());
    let mut conn = pool.get().await?;
    conn.batch_execute("PRAGMA journal_mode = WAL;").await?;
    conn.batch_execute(SCHEMA_SQL).await?;
    Ok(())
}
