//! Change records and run summaries produced by a crawl pass.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// First snapshot of a new document.
    New,
    /// A later snapshot with a diff against its predecessor.
    Changed,
}

/// Emitted for every snapshot created during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub document_id: i32,
    pub snapshot_id: i32,
    pub diff_id: Option<i32>,
    pub significance_score: i32,
    pub topic: String,
    pub state: String,
    pub url: String,
    pub title: String,
    pub kind: ChangeKind,
    /// Subscriptions whose filters this change passes.
    pub subscription_ids: Vec<i32>,
}

/// What happened to one candidate URL.
#[derive(Debug, Clone, PartialEq)]
pub enum UrlOutcome {
    /// Content was new or changed and a snapshot was written.
    Fetched(ChangeRecord),
    /// Content hashed identical to the last fetch.
    Duplicate,
    /// Fetch, extraction or ingestion failed.
    Failed(String),
}

/// Per-source tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub fetched: usize,
    pub duplicate: usize,
    pub failed: usize,
    /// URLs never started because the source was aborted or the run timed out.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureEntry {
    pub source: String,
    pub url: String,
    pub error: String,
}

/// Result of one crawl pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub per_source: BTreeMap<String, SourceCounts>,
    pub changes: Vec<ChangeRecord>,
    pub failures: Vec<FailureEntry>,
    /// Sources whose remaining URLs were abandoned after a storage failure.
    pub aborted_sources: Vec<String>,
    pub timed_out: bool,
}

impl RunSummary {
    pub fn counts_mut(&mut self, source: &str) -> &mut SourceCounts {
        self.per_source.entry(source.to_string()).or_default()
    }

    pub fn record(&mut self, source: &str, url: &str, outcome: UrlOutcome) {
        match outcome {
            UrlOutcome::Fetched(change) => {
                self.counts_mut(source).fetched += 1;
                self.changes.push(change);
            }
            UrlOutcome::Duplicate => self.counts_mut(source).duplicate += 1,
            UrlOutcome::Failed(error) => {
                self.counts_mut(source).failed += 1;
                self.failures.push(FailureEntry {
                    source: source.to_string(),
                    url: url.to_string(),
                    error,
                });
            }
        }
    }

    pub fn total(&self) -> SourceCounts {
        self.per_source
            .values()
            .fold(SourceCounts::default(), |mut acc, c| {
                acc.fetched += c.fetched;
                acc.duplicate += c.duplicate;
                acc.failed += c.failed;
                acc.skipped += c.skipped;
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_total() {
        let mut summary = RunSummary::default();
        summary.record("TX/news", "https://a.gov/1", UrlOutcome::Duplicate);
        summary.record(
            "TX/news",
            "https://a.gov/2",
            UrlOutcome::Failed("timeout".to_string()),
        );
        summary.record("CA/forms", "https://b.gov/1", UrlOutcome::Duplicate);

        let total = summary.total();
        assert_eq!(total.duplicate, 2);
        assert_eq!(total.failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].url, "https://a.gov/2");
    }
}
