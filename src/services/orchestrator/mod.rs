//! One crawl pass over the active sources.
//!
//! Sources are resolved into candidate URLs, then a fixed pool of workers
//! drains a shared queue: fetch, extract on the blocking pool, ingest.
//! The queue is kept per domain and served round-robin; with a politeness
//! gate attached, a worker only takes work for a domain whose next slot is
//! already open. Hub pages feed discovered links back into the same queue.
//! Progress is reported as [`CrawlEvent`]s; outcomes accumulate into a [`RunSummary`].

mod types;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use types::{CrawlConfig, CrawlError, CrawlEvent};
use types::{ItemKind, SourceRun, WorkItem};

use super::alerts::SubscriptionMatcher;
use super::snapshot::{Payload, SnapshotEngine};
use crate::discovery::{feed_links, discover_links, seed_source, LinkScope, Resolver};
use crate::extract::ContentExtractor;
use crate::models::{RunSummary, Source, SourceType, UrlOutcome};
use crate::repository::{Storage, StorageError};
use crate::scrapers::{FetchError, PageFetcher, PolitenessGate, PolitenessViolation};
use crate::storage::PayloadStore;
use crate::utils::{extract_domain, normalize_url};

/// How long an idle worker waits before checking the queue again.
const IDLE_POLL: Duration = Duration::from_millis(20);

pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn PageFetcher>,
    resolver: Arc<Resolver>,
    extractor: Arc<ContentExtractor>,
    engine: Arc<SnapshotEngine>,
    gate: Option<PolitenessGate>,
    config: CrawlConfig,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        payloads: Arc<dyn PayloadStore>,
        fetcher: Arc<dyn PageFetcher>,
        resolver: Arc<Resolver>,
        extractor: Arc<ContentExtractor>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            engine: Arc::new(SnapshotEngine::new(storage.clone(), payloads)),
            storage,
            fetcher,
            resolver,
            extractor,
            gate: None,
            config,
        }
    }

    /// Only hand out work for domains `gate` would admit right away.
    pub fn with_gate(mut self, gate: PolitenessGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn engine(&self) -> &Arc<SnapshotEngine> {
        &self.engine
    }

    /// Crawl every active source (or only the one whose name or
    /// `STATE/name` label equals `only`) plus the given seed URLs.
    pub async fn run_active(
        &self,
        only: Option<&str>,
        seeds: &[String],
        events: Option<mpsc::Sender<CrawlEvent>>,
    ) -> Result<RunSummary, CrawlError> {
        let mut sources = self.storage.get_active_sources().await?;
        sources.retain(|s| !s.is_seed_list());
        if let Some(only) = only {
            sources.retain(|s| s.name == only || s.label() == only);
            if sources.is_empty() {
                return Err(CrawlError::UnknownSource(only.to_string()));
            }
        }
        self.run(sources, seeds, events).await
    }

    /// Crawl the given sources plus seed URLs.
    pub async fn run(
        &self,
        sources: Vec<Source>,
        seeds: &[String],
        events: Option<mpsc::Sender<CrawlEvent>>,
    ) -> Result<RunSummary, CrawlError> {
        let matcher = SubscriptionMatcher::load(self.storage.as_ref()).await?;
        let state = Arc::new(RunState {
            fetcher: self.fetcher.clone(),
            resolver: self.resolver.clone(),
            extractor: self.extractor.clone(),
            engine: self.engine.clone(),
            matcher,
            gate: self.gate.clone(),
            max_hub_links: self.config.max_hub_links,
            deadline: self.config.run_timeout.map(|t| Instant::now() + t),
            queue: Mutex::new(Queue::default()),
            enqueued: Mutex::new(HashSet::new()),
            summary: Mutex::new(RunSummary::default()),
            fatal: Mutex::new(None),
            timed_out: AtomicBool::new(false),
            events,
        });

        info!(
            "Starting crawl: {} sources, {} seeds, {} workers",
            sources.len(),
            seeds.len(),
            self.config.max_concurrency
        );

        if !seeds.is_empty() {
            let mut seed = seed_source();
            seed.id = self.storage.upsert_source(&seed).await?;
            let run = Arc::new(SourceRun::new(seed, None));
            state.summary().counts_mut(&run.label);
            let count = state.enqueue_all(&run, seeds, ItemKind::Page);
            state
                .emit(CrawlEvent::SourceResolved {
                    source: run.label.clone(),
                    candidates: count,
                })
                .await;
        }

        self.resolve_sources(&state, sources).await;

        let workers = self.config.max_concurrency.max(1);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let state = state.clone();
            handles.push(tokio::spawn(async move { state.work(worker_id).await }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Crawl worker panicked: {}", e);
            }
        }

        if let Some(violation) = state.fatal().take() {
            error!("Aborting run: {}", violation);
            return Err(CrawlError::Politeness(violation));
        }

        let mut summary = std::mem::take(&mut *state.summary());
        summary.timed_out = state.timed_out.load(Ordering::SeqCst);
        let total = summary.total();
        info!(
            "Crawl finished: {} fetched, {} unchanged, {} failed, {} skipped",
            total.fetched, total.duplicate, total.failed, total.skipped
        );
        Ok(summary)
    }

    async fn resolve_sources(&self, state: &Arc<RunState>, sources: Vec<Source>) {
        let concurrency = self.config.max_concurrency.max(1);
        let resolved: Vec<_> = stream::iter(sources)
            .map(|source| async move {
                if state.past_deadline() {
                    return (source, None);
                }
                let result = self.resolver.resolve(&source).await;
                (source, Some(result))
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (source, result) in resolved {
            let label = source.label();
            state.summary().counts_mut(&label);
            let Some(result) = result else {
                state.timed_out.store(true, Ordering::SeqCst);
                state.summary().counts_mut(&label).skipped += 1;
                continue;
            };
            let resolution = match result {
                Ok(r) => r,
                Err(e) => {
                    warn!("Failed to resolve {}: {}", label, e);
                    state.summary().record(
                        &label,
                        &source.url,
                        UrlOutcome::Failed(format!("resolve failed: {}", e)),
                    );
                    continue;
                }
            };

            let (scope, kind) = match source.source_type {
                SourceType::HtmlHub => match LinkScope::for_source(&source) {
                    Ok(scope) => (Some(scope), ItemKind::Hub),
                    Err(e) => {
                        warn!("Link discovery disabled for {}: {}", label, e);
                        (None, ItemKind::Page)
                    }
                },
                _ => (None, ItemKind::Page),
            };

            let run = Arc::new(SourceRun::new(source, scope));
            let count = state.enqueue_all(&run, &resolution.candidate_urls, kind);
            state
                .emit(CrawlEvent::SourceResolved {
                    source: label,
                    candidates: count,
                })
                .await;
        }
    }
}

/// Pending work grouped by domain, served round-robin.
#[derive(Default)]
struct Queue {
    pending: HashMap<String, VecDeque<WorkItem>>,
    /// Domains with pending work, in service order.
    order: VecDeque<String>,
    in_flight: usize,
}

impl Queue {
    fn push(&mut self, item: WorkItem) {
        let domain = extract_domain(&item.url).unwrap_or_default();
        let items = self.pending.entry(domain.clone()).or_default();
        if items.is_empty() {
            self.order.push_back(domain);
        }
        items.push_back(item);
    }

    /// Take the next item for `domain` and move the domain to the back.
    fn pop_domain(&mut self, domain: &str) -> Option<WorkItem> {
        let pos = self.order.iter().position(|d| d == domain)?;
        let items = self.pending.get_mut(domain)?;
        let item = items.pop_front()?;
        self.order.remove(pos);
        if items.is_empty() {
            self.pending.remove(domain);
        } else {
            self.order.push_back(domain.to_string());
        }
        self.in_flight += 1;
        Some(item)
    }
}

enum Next {
    Item(WorkItem),
    Wait,
    Done,
}

/// Everything workers share for the duration of a run.
struct RunState {
    fetcher: Arc<dyn PageFetcher>,
    resolver: Arc<Resolver>,
    extractor: Arc<ContentExtractor>,
    engine: Arc<SnapshotEngine>,
    matcher: SubscriptionMatcher,
    gate: Option<PolitenessGate>,
    max_hub_links: usize,
    deadline: Option<Instant>,
    queue: Mutex<Queue>,
    /// Normalized URLs queued so far this run.
    enqueued: Mutex<HashSet<String>>,
    summary: Mutex<RunSummary>,
    fatal: Mutex<Option<PolitenessViolation>>,
    timed_out: AtomicBool,
    events: Option<mpsc::Sender<CrawlEvent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RunState {
    fn summary(&self) -> MutexGuard<'_, RunSummary> {
        lock(&self.summary)
    }

    fn fatal(&self) -> MutexGuard<'_, Option<PolitenessViolation>> {
        lock(&self.fatal)
    }

    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn emit(&self, event: CrawlEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Queue URLs not yet seen this run. Returns how many were added.
    fn enqueue_all(&self, source: &Arc<SourceRun>, urls: &[String], kind: ItemKind) -> usize {
        let mut added = Vec::new();
        {
            let mut enqueued = lock(&self.enqueued);
            for url in urls {
                let Some(key) = normalize_url(url) else {
                    debug!("Skipping unparseable URL {}", url);
                    continue;
                };
                if enqueued.insert(key.clone()) {
                    added.push(WorkItem {
                        source: source.clone(),
                        url: key,
                        kind,
                    });
                }
            }
        }

        let count = added.len();
        if count > 0 {
            let mut queue = lock(&self.queue);
            for item in added {
                queue.push(item);
            }
            if let Some(tx) = &self.events {
                let _ = tx.try_send(CrawlEvent::Enqueued { count });
            }
        }
        count
    }

    async fn next(&self) -> Next {
        if self.fatal().is_some() {
            return Next::Done;
        }
        let domains: Vec<String> = {
            let queue = lock(&self.queue);
            if queue.order.is_empty() {
                return if queue.in_flight == 0 {
                    Next::Done
                } else {
                    Next::Wait
                };
            }
            queue.order.iter().cloned().collect()
        };

        for domain in &domains {
            if let Some(gate) = &self.gate {
                if gate.domain_ready_in(domain).await > Duration::ZERO {
                    continue;
                }
            }
            if let Some(item) = lock(&self.queue).pop_domain(domain) {
                return Next::Item(item);
            }
        }
        Next::Wait
    }

    fn finish(&self) {
        let mut queue = lock(&self.queue);
        queue.in_flight = queue.in_flight.saturating_sub(1);
    }

    async fn work(self: Arc<Self>, worker_id: usize) {
        loop {
            match self.next().await {
                Next::Done => break,
                Next::Wait => tokio::time::sleep(IDLE_POLL).await,
                Next::Item(item) => {
                    self.process(worker_id, item).await;
                    self.finish();
                }
            }
        }
        debug!("Worker {} done", worker_id);
    }

    async fn process(&self, worker_id: usize, item: WorkItem) {
        let run = item.source.clone();
        if self.past_deadline() {
            self.timed_out.store(true, Ordering::SeqCst);
            self.skip(&run, &item.url).await;
            return;
        }
        if run.aborted.load(Ordering::SeqCst) {
            self.skip(&run, &item.url).await;
            return;
        }

        self.emit(CrawlEvent::Started {
            worker_id,
            url: item.url.clone(),
        })
        .await;

        match item.kind {
            ItemKind::Feed => self.expand_feed(worker_id, &run, &item.url).await,
            ItemKind::Page | ItemKind::Hub => self.process_page(worker_id, &run, &item).await,
        }
    }

    async fn skip(&self, run: &SourceRun, url: &str) {
        self.summary().counts_mut(&run.label).skipped += 1;
        self.emit(CrawlEvent::Skipped {
            url: url.to_string(),
        })
        .await;
    }

    async fn fail(&self, worker_id: usize, run: &SourceRun, url: &str, error: String) {
        warn!("Failed {}: {}", url, error);
        self.summary()
            .record(&run.label, url, UrlOutcome::Failed(error.clone()));
        self.emit(CrawlEvent::Failed {
            worker_id,
            url: url.to_string(),
            error,
        })
        .await;
    }

    async fn abort_source(&self, worker_id: usize, run: &SourceRun, url: &str, err: StorageError) {
        let reason = err.to_string();
        if !run.aborted.swap(true, Ordering::SeqCst) {
            error!("Aborting source {}: {}", run.label, reason);
            self.summary().aborted_sources.push(run.label.clone());
            self.emit(CrawlEvent::SourceAborted {
                source: run.label.clone(),
                reason: reason.clone(),
            })
            .await;
        }
        self.fail(worker_id, run, url, format!("storage: {}", reason))
            .await;
    }

    async fn expand_feed(&self, worker_id: usize, run: &Arc<SourceRun>, feed_url: &str) {
        let items = match self.resolver.feed_items(feed_url).await {
            Ok(items) => items,
            Err(e) => {
                self.fail(worker_id, run, feed_url, format!("feed: {}", e))
                    .await;
                return;
            }
        };

        let mut allowed = Vec::new();
        for url in items {
            let in_scope = run.scope.as_ref().map_or(true, |s| s.allows(&url));
            if in_scope && self.resolver.robots().is_allowed(&url).await {
                allowed.push(url);
            }
        }
        let count = self.enqueue_all(run, &allowed, ItemKind::Page);
        debug!("Feed {} added {} URLs", feed_url, count);
    }

    async fn discover(&self, run: &Arc<SourceRun>, html: &str, base_url: &str) {
        let Some(scope) = &run.scope else {
            return;
        };
        let budget = self
            .max_hub_links
            .saturating_sub(run.hub_links.load(Ordering::SeqCst));

        let mut links = Vec::new();
        for url in discover_links(html, base_url, scope, budget) {
            if self.resolver.robots().is_allowed(&url).await {
                links.push(url);
            }
        }
        let added = self.enqueue_all(run, &links, ItemKind::Page);
        run.hub_links.fetch_add(added, Ordering::SeqCst);

        let feeds = feed_links(html, base_url);
        self.enqueue_all(run, &feeds, ItemKind::Feed);
        debug!(
            "Hub {} yielded {} links and {} feeds",
            base_url,
            added,
            feeds.len()
        );
    }

    async fn process_page(&self, worker_id: usize, run: &Arc<SourceRun>, item: &WorkItem) {
        let url = item.url.as_str();
        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(FetchError::Politeness(violation)) => {
                error!("Politeness violation on {}: {}", url, violation);
                *self.fatal() = Some(violation);
                return;
            }
            Err(e) => {
                self.fail(worker_id, run, url, e.to_string()).await;
                return;
            }
        };

        if item.kind == ItemKind::Hub && page.is_html() {
            self.discover(run, &page.text(), &page.final_url).await;
        }

        let extractor = self.extractor.clone();
        let bytes = page.bytes.clone();
        let mime = page.mime.clone();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &mime)).await;

        let extracted = match extracted {
            Ok(Ok(extracted)) => extracted,
            Ok(Err(e)) => {
                if let Err(storage) = self.engine.archive(url, &page.bytes, &page.mime).await {
                    self.abort_source(worker_id, run, url, storage).await;
                    return;
                }
                self.fail(worker_id, run, url, format!("extraction: {}", e))
                    .await;
                return;
            }
            Err(e) => {
                self.fail(worker_id, run, url, format!("extraction task: {}", e))
                    .await;
                return;
            }
        };
        for note in &extracted.notes {
            debug!("{}: {}", url, note);
        }

        let payload = Payload {
            bytes: &page.bytes,
            mime: &page.mime,
            fetched_at: page.fetched_at,
        };
        let outcome = match self.engine.ingest(&run.source, url, payload, &extracted).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.abort_source(worker_id, run, url, e).await;
                return;
            }
        };

        match outcome.change_record(&run.source) {
            Some(mut change) => {
                self.matcher.tag(&mut change);
                info!(
                    "Fetched {} ({:?}, {}, score {})",
                    url, change.kind, change.topic, change.significance_score
                );
                let event = CrawlEvent::Changed {
                    worker_id,
                    url: url.to_string(),
                    kind: change.kind,
                    significance: change.significance_score,
                };
                self.summary()
                    .record(&run.label, url, UrlOutcome::Fetched(change));
                self.emit(event).await;
            }
            None => {
                info!("Unchanged {}", url);
                self.summary()
                    .record(&run.label, url, UrlOutcome::Duplicate);
                self.emit(CrawlEvent::Unchanged {
                    worker_id,
                    url: url.to_string(),
                })
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(run: &Arc<SourceRun>, url: &str) -> WorkItem {
        WorkItem {
            source: run.clone(),
            url: url.to_string(),
            kind: ItemKind::Page,
        }
    }

    #[test]
    fn test_queue_rotates_domains() {
        let source = Source::new("OH", "news", "https://tax.ohio.gov/", SourceType::Sitemap);
        let run = Arc::new(SourceRun::new(source, None));
        let mut queue = Queue::default();
        queue.push(item(&run, "https://tax.ohio.gov/a"));
        queue.push(item(&run, "https://tax.ohio.gov/b"));
        queue.push(item(&run, "https://dor.in.gov/c"));

        assert_eq!(queue.order, ["tax.ohio.gov", "dor.in.gov"]);
        let first = queue.pop_domain("tax.ohio.gov").unwrap();
        assert_eq!(first.url, "https://tax.ohio.gov/a");
        assert_eq!(queue.order, ["dor.in.gov", "tax.ohio.gov"]);

        assert_eq!(queue.pop_domain("dor.in.gov").unwrap().url, "https://dor.in.gov/c");
        assert!(queue.pop_domain("dor.in.gov").is_none());
        assert_eq!(queue.order, ["tax.ohio.gov"]);
        assert_eq!(queue.in_flight, 2);
    }
}
