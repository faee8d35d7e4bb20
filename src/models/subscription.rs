//! Standing alert configuration.

use serde::{Deserialize, Serialize};

use super::ChangeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestCadence {
    Daily,
    #[default]
    Weekly,
}

impl DigestCadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }
}

/// Read-only to the pipeline; consulted to tag change records with the
/// subscribers that would be alerted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i32,
    pub org_name: String,
    pub email_to: String,
    /// Upper-case state codes; empty means all states.
    pub states: Vec<String>,
    /// Topic names; empty means all topics.
    pub topics: Vec<String>,
    pub min_score: i32,
    pub cadence: DigestCadence,
}

impl Subscription {
    pub fn matches(&self, change: &ChangeRecord) -> bool {
        if change.significance_score < self.min_score {
            return false;
        }
        if !self.states.is_empty()
            && !self
                .states
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&change.state))
        {
            return false;
        }
        if !self.topics.is_empty() && !self.topics.iter().any(|t| t == &change.topic) {
            return false;
        }
        true
    }
}
