//! Rule-based topic classification.

use std::sync::LazyLock;

use regex::Regex;

/// A topic and the patterns that vote for it.
pub struct TopicRule {
    pub topic: &'static str,
    pub patterns: Vec<Regex>,
}

impl TopicRule {
    fn new(topic: &'static str, patterns: &[&str]) -> Self {
        Self {
            topic,
            patterns: patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
                .collect(),
        }
    }

    /// Number of patterns found in `text`.
    pub fn hits(&self, text: &str) -> usize {
        self.patterns.iter().filter(|p| p.is_match(text)).count()
    }

    /// All patterns but one must match (at least one for single-pattern rules).
    fn required(&self) -> usize {
        self.patterns.len().saturating_sub(1).max(1)
    }
}

static TOPIC_RULES: LazyLock<Vec<TopicRule>> = LazyLock::new(|| {
    vec![
        TopicRule::new(
            "Rates",
            &[r"rate(?:s)?", r"increase|decrease|change|adjust", r"%|percent|percentage"],
        ),
        TopicRule::new(
            "Forms",
            &[r"\bform\b|certificate|application|rev\.?|revision|version|expires|supersedes|DR-\d+|ST-\d+|01-339"],
        ),
        TopicRule::new(
            "Exemptions",
            &[
                r"exempt|exemption|nontaxable|exclude",
                r"food|machinery|manufacturing|ppe|grocery|beverage|soda|ssb",
            ],
        ),
        TopicRule::new(
            "Freight",
            &[
                r"freight|delivery|shipping|transportation|carrier|fob",
                r"taxable|nontaxable|separately stated|title|possession",
            ],
        ),
        TopicRule::new("Marketplace", &[r"marketplace", r"facilitator|seller|collection|remit"]),
        TopicRule::new(
            "Deadlines",
            &[r"deadline|due|filing|extension", r"return|remittance|quarter|annual"],
        ),
    ]
});

static NEGATIVE_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"job fair", r"award", r"grant", r"press release", r"hiring|career|internship"]
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
        .collect()
});

/// Patterns that flag a changed line as material.
static KEYWORD_CATEGORIES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\d+(?:\.\d+)?\s*%|\bpercent\b",
        r"\$\s?\d",
        r"deadline|due date|due on|no later than|extension",
        r"\b(?:effective|begins|starting)\b",
        r"\b(?:DR|ST|REG|CDTFA)-\d+|\b01-\d{3}\b",
        r"exempt|nontaxable|taxable",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
    .collect()
});

pub const GENERAL_TOPIC: &str = "General";

/// Texts longer than this get an extra point.
const LONG_TEXT_CHARS: usize = 2000;

#[derive(Debug, Default, Clone, Copy)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// Pick a topic and relevance score.
    ///
    /// Negative rules win outright with score 0. Otherwise each topic whose
    /// rule is satisfied scores `2 + hits (+1 for long text)` and the best
    /// one wins; ties go to the earlier topic. Nothing matching is
    /// `("General", 1)`.
    pub fn classify(&self, text: &str) -> (String, i32) {
        if NEGATIVE_RULES.iter().any(|re| re.is_match(text)) {
            return (GENERAL_TOPIC.to_string(), 0);
        }

        let long_bonus = i32::from(text.chars().count() > LONG_TEXT_CHARS);
        let mut best = (GENERAL_TOPIC, 1);
        for rule in TOPIC_RULES.iter() {
            let hits = rule.hits(text);
            if hits >= rule.required() {
                let score = 2 + hits as i32 + long_bonus;
                if score > best.1 {
                    best = (rule.topic, score);
                }
            }
        }
        (best.0.to_string(), best.1)
    }

    /// How many keyword categories appear in `text`.
    pub fn keyword_hits(&self, text: &str) -> usize {
        KEYWORD_CATEGORIES.iter().filter(|re| re.is_match(text)).count()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        TOPIC_RULES.iter().map(|r| r.topic).collect()
    }
}
