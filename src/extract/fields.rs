//! Structured field extraction from normalized text.
//!
//! Extractors run in registration order over the same text and each fills
//! the fields it knows about. Adding a field means registering another
//! [`FieldExtractor`].

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

/// Fields attached to every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentFields {
    pub topic: String,
    pub score: i32,
    pub effective_date: Option<NaiveDate>,
    pub form_id: Option<String>,
}

pub trait FieldExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fill fields from `text`. Must not overwrite a field an earlier
    /// extractor already set.
    fn extract(&self, text: &str, fields: &mut DocumentFields);
}

static EFFECTIVE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(effective|begins|starting)\s*[:\-]?\s*((\d{1,2})/(\d{1,2})/(\d{2,4})|([a-z]{3,9}\s+\d{1,2},\s+\d{4}))",
    )
    .unwrap()
});

static FORM_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(01-\d{3}|DR-\d{2,4}|ST-\d{2,4}|CDTFA-\d{2,4}|REG-\d{1,3}|[A-Z]{1,3}-\d{2,4})\b")
        .unwrap()
});

static TITLE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:notice|bulletin|update)[:\s-]+(.{10,120})$").unwrap()
});

/// First date introduced by "effective", "begins" or "starting".
pub struct EffectiveDateExtractor;

impl FieldExtractor for EffectiveDateExtractor {
    fn name(&self) -> &'static str {
        "effective_date"
    }

    fn extract(&self, text: &str, fields: &mut DocumentFields) {
        if fields.effective_date.is_some() {
            return;
        }
        fields.effective_date = EFFECTIVE_DATE.captures_iter(text).find_map(|caps| {
            if let (Some(m), Some(d), Some(y)) = (caps.get(3), caps.get(4), caps.get(5)) {
                parse_numeric_date(m.as_str(), d.as_str(), y.as_str())
            } else {
                caps.get(6).and_then(|named| parse_named_date(named.as_str()))
            }
        });
    }
}

fn parse_numeric_date(month: &str, day: &str, year: &str) -> Option<NaiveDate> {
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    let year: i32 = match year.len() {
        2 => 2000 + year.parse::<i32>().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_named_date(s: &str) -> Option<NaiveDate> {
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    ["%B %d, %Y", "%b %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&s, fmt).ok())
}

/// First form identifier, uppercased (e.g. `ST-120`, `DR-0100`, `01-339`).
pub struct FormIdExtractor;

impl FieldExtractor for FormIdExtractor {
    fn name(&self) -> &'static str {
        "form_id"
    }

    fn extract(&self, text: &str, fields: &mut DocumentFields) {
        if fields.form_id.is_some() {
            return;
        }
        fields.form_id = FORM_ID
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_uppercase());
    }
}

/// Ordered set of field extractors.
pub struct FieldRegistry {
    extractors: Vec<Box<dyn FieldExtractor>>,
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new()
            .register(EffectiveDateExtractor)
            .register(FormIdExtractor)
    }
}

impl FieldRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    pub fn register(mut self, extractor: impl FieldExtractor + 'static) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    pub fn apply(&self, text: &str, fields: &mut DocumentFields) {
        for extractor in &self.extractors {
            extractor.extract(text, fields);
        }
    }
}

const TITLE_MAX_CHARS: usize = 140;

/// Title from the first substantive line, with "Notice:"-style prefixes removed.
pub fn derive_title(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| line.chars().count() > 10)
        .map(|line| {
            let line = TITLE_PREFIX
                .captures(line)
                .and_then(|c| c.get(1))
                .map_or(line, |m| m.as_str().trim());
            cap_title(line)
        })
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Collapse whitespace and cap at 140 characters.
pub fn cap_title(title: &str) -> String {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.chars().count() <= TITLE_MAX_CHARS {
        return title;
    }
    let cut: String = title.chars().take(TITLE_MAX_CHARS - 1).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> DocumentFields {
        let mut fields = DocumentFields::default();
        FieldRegistry::default().apply(text, &mut fields);
        fields
    }

    #[test]
    fn test_effective_date_numeric() {
        let f = run("the new rate is effective 7/1/2024 for all sellers");
        assert_eq!(f.effective_date, NaiveDate::from_ymd_opt(2024, 7, 1));
    }

    #[test]
    fn test_effective_date_two_digit_year() {
        let f = run("changes begins: 10/01/25");
        assert_eq!(f.effective_date, NaiveDate::from_ymd_opt(2025, 10, 1));
    }

    #[test]
    fn test_effective_date_named_month() {
        let f = run("starting january 1, 2025 the exemption expires");
        assert_eq!(f.effective_date, NaiveDate::from_ymd_opt(2025, 1, 1));
        let f = run("effective - oct 15, 2024");
        assert_eq!(f.effective_date, NaiveDate::from_ymd_opt(2024, 10, 15));
    }

    #[test]
    fn test_invalid_date_skipped_for_next_match() {
        let f = run("effective 13/45/2024 ... starting 3/1/2024");
        assert_eq!(f.effective_date, NaiveDate::from_ymd_opt(2024, 3, 1));
    }

    #[test]
    fn test_form_id_uppercased() {
        assert_eq!(run("see form st-120 for details").form_id.as_deref(), Some("ST-120"));
        assert_eq!(run("use 01-339 when buying").form_id.as_deref(), Some("01-339"));
        assert_eq!(run("nothing here").form_id, None);
        assert_eq!(run("single digit st-3 is not a form id").form_id, None);
    }

    #[test]
    fn test_registry_order_and_names() {
        assert_eq!(FieldRegistry::default().names(), vec!["effective_date", "form_id"]);
    }

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("\nshort\nnotice: sales tax holiday announced\nbody"), "sales tax holiday announced");
        assert_eq!(derive_title("tiny\nlines"), "Untitled");
        let long = "x".repeat(300);
        let title = derive_title(&long);
        assert_eq!(title.chars().count(), 140);
        assert!(title.ends_with('…'));
    }
}
