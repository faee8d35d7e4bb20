//! Crawl command: one pass over active sources and seed URLs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::cli::helpers::{build_extractor, open_storage, truncate};
use crate::config::Settings;
use crate::discovery::{load_seeds, Resolver, RobotsCache};
use crate::models::{ChangeKind, RunSummary};
use crate::repository::Storage;
use crate::scrapers::{
    BrowserFetcher, BrowserMode, FetchStrategy, GateConfig, HttpClient, LayeredFetcher,
    PageFetcher, PolitenessGate, RenderedStrategy, RetryPolicy, StaticStrategy,
};
use crate::services::{CrawlConfig, CrawlEvent, Orchestrator};
use crate::storage::{FsPayloadStore, PayloadStore};

pub struct CrawlArgs {
    pub source: Option<String>,
    pub seeds: Option<PathBuf>,
    pub no_seeds: bool,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub json: bool,
}

/// Wire the fetch stack: one politeness gate shared by the robots client,
/// the static client, the browser and the work queue.
fn build_fetch_stack(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn PageFetcher>, Arc<RobotsCache>, PolitenessGate)> {
    let gate = PolitenessGate::with_config(GateConfig::default().with_floor(settings.min_delay));
    let ua = Some(settings.user_agent.as_str());

    let robots_client = HttpClient::new(
        gate.clone(),
        ua,
        settings.request_timeout,
        settings.verify_tls,
    )?
    .with_retry(RetryPolicy::none());
    let robots = Arc::new(
        RobotsCache::new(Arc::new(robots_client), &settings.user_agent).with_gate(gate.clone()),
    );

    let client = HttpClient::new(
        gate.clone(),
        ua,
        settings.request_timeout,
        settings.verify_tls,
    )?
    .with_retry(settings.retry.clone());

    let mut strategies: Vec<Box<dyn FetchStrategy>> = vec![Box::new(StaticStrategy::new(client))];
    if settings.browser_mode != BrowserMode::Off {
        let browser = BrowserFetcher::new(settings.browser.clone());
        if browser.is_available() {
            strategies.push(Box::new(
                RenderedStrategy::new(browser, gate.clone(), settings.browser_mode)
                    .with_min_html_chars(settings.min_html_chars),
            ));
        } else {
            tracing::warn!("Browser fallback requested but no Chrome/Chromium was found");
        }
    }

    let fetcher = LayeredFetcher::new(strategies).with_robots(robots.clone());
    Ok((Arc::new(fetcher), robots, gate))
}

fn load_seed_urls(settings: &Settings, args: &CrawlArgs) -> anyhow::Result<Vec<String>> {
    if args.no_seeds {
        return Ok(Vec::new());
    }
    match &args.seeds {
        Some(path) => Ok(load_seeds(path)?),
        None if settings.seed_file.exists() => Ok(load_seeds(&settings.seed_file)?),
        None => Ok(Vec::new()),
    }
}

fn progress_bar(json: bool) -> anyhow::Result<ProgressBar> {
    if json {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("█▓░"),
    );
    Ok(pb)
}

/// Drive the progress bar from crawl events until the sender closes.
async fn follow_events(mut rx: mpsc::Receiver<CrawlEvent>, pb: ProgressBar) {
    while let Some(event) = rx.recv().await {
        match event {
            CrawlEvent::SourceResolved { source, candidates } => {
                pb.set_message(format!("{}: {} candidates", source, candidates));
            }
            CrawlEvent::Enqueued { count } => pb.inc_length(count as u64),
            CrawlEvent::Started { url, .. } => pb.set_message(truncate(&url, 70)),
            CrawlEvent::Changed {
                url,
                kind,
                significance,
                ..
            } => {
                pb.inc(1);
                let label = match kind {
                    ChangeKind::New => style("new").green(),
                    ChangeKind::Changed => style("changed").yellow(),
                };
                pb.println(format!("  {} {} (score {})", label, url, significance));
            }
            CrawlEvent::Unchanged { .. } | CrawlEvent::Skipped { .. } => pb.inc(1),
            CrawlEvent::Failed { url, error, .. } => {
                pb.inc(1);
                tracing::debug!("{}: {}", url, error);
            }
            CrawlEvent::SourceAborted { source, reason } => {
                pb.println(format!(
                    "  {} {} aborted: {}",
                    style("✗").red(),
                    source,
                    reason
                ));
            }
        }
    }
    pb.finish_and_clear();
}

/// Run one crawl pass.
pub async fn cmd_crawl(settings: &Settings, args: CrawlArgs) -> anyhow::Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(open_storage(settings).await?);
    let payloads: Arc<dyn PayloadStore> = Arc::new(FsPayloadStore::new(
        settings.raw_storage_dir.clone(),
        settings.raw_storage_bucket.clone(),
    ));
    let (fetcher, robots, gate) = build_fetch_stack(settings)?;
    let resolver = Arc::new(
        Resolver::new(fetcher.clone(), robots).with_max_sitemap_depth(settings.max_sitemap_depth),
    );
    let extractor = Arc::new(build_extractor(settings));

    let config = CrawlConfig {
        max_concurrency: args
            .concurrency
            .unwrap_or(settings.max_concurrency)
            .max(1),
        run_timeout: args
            .timeout
            .map(Duration::from_secs)
            .or(settings.run_timeout),
        max_hub_links: settings.max_hub_links,
    };

    let seeds = load_seed_urls(settings, &args)?;
    let orchestrator = Orchestrator::new(storage, payloads, fetcher, resolver, extractor, config)
        .with_gate(gate);

    let (tx, rx) = mpsc::channel(256);
    let progress = tokio::spawn(follow_events(rx, progress_bar(args.json)?));

    let result = orchestrator
        .run_active(args.source.as_deref(), &seeds, Some(tx))
        .await;
    let _ = progress.await;
    let summary = result?;

    if args.json {
        for change in &summary.changes {
            println!("{}", serde_json::to_string(change)?);
        }
    } else {
        print_summary(&summary);
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", style("Crawl summary").bold());
    println!("{}", "-".repeat(64));
    println!(
        "{:<32} {:>7} {:>9} {:>7} {:>7}",
        "Source", "Fetched", "Duplicate", "Failed", "Skipped"
    );
    println!("{}", "-".repeat(64));
    for (source, counts) in &summary.per_source {
        println!(
            "{:<32} {:>7} {:>9} {:>7} {:>7}",
            truncate(source, 31),
            counts.fetched,
            counts.duplicate,
            counts.failed,
            counts.skipped
        );
    }
    let total = summary.total();
    println!("{}", "-".repeat(64));
    println!(
        "{:<32} {:>7} {:>9} {:>7} {:>7}",
        "Total", total.fetched, total.duplicate, total.failed, total.skipped
    );

    if !summary.changes.is_empty() {
        let mut changes: Vec<_> = summary.changes.iter().collect();
        changes.sort_by(|a, b| b.significance_score.cmp(&a.significance_score));

        println!("\n{}", style("Changes").bold());
        for change in changes {
            let kind = match change.kind {
                ChangeKind::New => style("NEW").green(),
                ChangeKind::Changed => style("CHG").yellow(),
            };
            println!(
                "  {} [{:>2}] {:<10} {} {}",
                kind,
                change.significance_score,
                truncate(&change.topic, 10),
                truncate(&change.title, 50),
                style(&change.url).dim()
            );
            if !change.subscription_ids.is_empty() {
                println!("        subscriptions: {:?}", change.subscription_ids);
            }
        }
    }

    if !summary.failures.is_empty() {
        println!("\n{} {} failures", style("!").yellow(), summary.failures.len());
        for failure in summary.failures.iter().take(20) {
            println!("  {} {}: {}", failure.source, failure.url, failure.error);
        }
    }

    for source in &summary.aborted_sources {
        println!("{} Source aborted: {}", style("✗").red(), source);
    }
    if summary.timed_out {
        println!(
            "{} Run timeout reached; remaining URLs were skipped",
            style("!").yellow()
        );
    }
}
