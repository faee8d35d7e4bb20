//! Orchestrator types and events.

use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::time::Duration;

use thiserror::Error;

use crate::discovery::LinkScope;
use crate::models::{ChangeKind, Source};
use crate::repository::StorageError;
use crate::scrapers::PolitenessViolation;

/// Events emitted during a crawl pass.
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// A source expanded into candidate URLs.
    SourceResolved { source: String, candidates: usize },
    /// URLs were added to the work queue.
    Enqueued { count: usize },
    Started { worker_id: usize, url: String },
    /// A snapshot was written.
    Changed {
        worker_id: usize,
        url: String,
        kind: ChangeKind,
        significance: i32,
    },
    Unchanged { worker_id: usize, url: String },
    Failed {
        worker_id: usize,
        url: String,
        error: String,
    },
    /// Not started because the source was aborted or the run timed out.
    Skipped { url: String },
    SourceAborted { source: String, reason: String },
}

/// Errors that end a whole run.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("politeness violation: {0}")]
    Politeness(#[from] PolitenessViolation),

    #[error("no active source named {0}")]
    UnknownSource(String),
}

/// Tunables for one pass.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Global cap on URLs processed at once.
    pub max_concurrency: usize,
    /// Unstarted work is skipped once this elapses.
    pub run_timeout: Option<Duration>,
    /// Links enqueued per hub source per run.
    pub max_hub_links: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            run_timeout: None,
            max_hub_links: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ItemKind {
    /// Fetch and ingest.
    Page,
    /// Fetch, ingest, and enqueue in-scope links and advertised feeds.
    Hub,
    /// Expand feed items into pages.
    Feed,
}

/// Per-source state shared by its work items.
pub(super) struct SourceRun {
    pub source: Source,
    pub label: String,
    /// `None` disables link discovery.
    pub scope: Option<LinkScope>,
    pub aborted: AtomicBool,
    pub hub_links: AtomicUsize,
}

impl SourceRun {
    pub fn new(source: Source, scope: Option<LinkScope>) -> Self {
        Self {
            label: source.label(),
            source,
            scope,
            aborted: AtomicBool::new(false),
            hub_links: AtomicUsize::new(0),
        }
    }
}

pub(super) struct WorkItem {
    pub source: std::sync::Arc<SourceRun>,
    pub url: String,
    pub kind: ItemKind,
}
