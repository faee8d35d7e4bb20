//! Service layer: snapshot lineage, diffs, alert tagging and the crawl
//! orchestrator.
//!
//! Services hold no UI concerns; the CLI drives them and renders their
//! events.

pub mod alerts;
pub mod diff;
pub mod locks;
pub mod orchestrator;
pub mod snapshot;

pub use alerts::SubscriptionMatcher;
pub use diff::{DiffEngine, DiffResult, MAX_DIFF_LINES, MAX_LINE_CHARS};
pub use locks::KeyedLocks;
pub use orchestrator::{CrawlConfig, CrawlError, CrawlEvent, Orchestrator};
pub use snapshot::{IngestKind, IngestOutcome, Payload, SnapshotEngine};
