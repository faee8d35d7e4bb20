//! Data models for the crawl pipeline.

mod change;
mod document;
mod seen_url;
mod snapshot;
mod source;
mod subscription;

pub use change::{ChangeKind, ChangeRecord, FailureEntry, RunSummary, SourceCounts, UrlOutcome};
pub use document::{compute_content_hash, Document, NewDocument};
pub use seen_url::SeenUrl;
pub use snapshot::{Diff, NewDiff, NewSnapshot, Snapshot};
pub use source::{Source, SourceType, SEED_SOURCE_NAME};
pub use subscription::{DigestCadence, Subscription};
