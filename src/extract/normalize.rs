//! Text normalization. The output is what gets hashed and diffed, so it must
//! be a pure function of its input.

use std::sync::LazyLock;

use regex::Regex;

static BOILERPLATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?im)© ?\d{4} state of .*$").unwrap(),
        Regex::new(r"(?i)page \d+ of \d+").unwrap(),
        Regex::new(r"(?im)last updated: .*$").unwrap(),
    ]
});

/// Canonical form: unified line endings, Unicode spaces mapped, zero-width
/// characters dropped, runs of blanks collapsed, lines trimmed, at most one
/// blank line in a row, lowercased, boilerplate removed.
pub fn normalize_text(raw: &str) -> String {
    let text = collapse(raw);
    let stripped = strip_boilerplate(&text);
    collapse(&stripped)
}

/// Remove boilerplate fragments (copyright lines, page counters, "last updated").
pub fn strip_boilerplate(text: &str) -> String {
    BOILERPLATE
        .iter()
        .fold(text.to_string(), |acc, re| re.replace_all(&acc, "").into_owned())
}

fn collapse(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() != Some(&'\n') {
                    cleaned.push('\n');
                }
            }
            '\u{0c}' | '\u{0b}' | '\u{2028}' | '\u{2029}' => cleaned.push('\n'),
            '\u{a0}' | '\u{2007}' | '\u{202f}' | '\u{3000}' | '\u{2000}'..='\u{200a}' => {
                cleaned.push(' ')
            }
            '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}' | '\u{ad}' => {}
            '\t' => cleaned.push(' '),
            c => cleaned.push(c),
        }
    }

    let mut out = String::with_capacity(cleaned.len());
    let mut blank_run = 0;
    for line in cleaned.lines() {
        let line = line.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        blank_run = 0;
        out.push_str(&line);
    }
    out.to_lowercase()
}

/// Number of non-whitespace characters.
pub fn content_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_and_case() {
        let raw = "  Notice:\tRate   Change \r\n\r\n\r\n\r\nNew  rate\u{a0}is 8%\u{200b}.\r";
        assert_eq!(normalize_text(raw), "notice: rate change\n\nnew rate is 8%.");
    }

    #[test]
    fn test_boilerplate_removed() {
        let raw = "Sales tax update\nPage 2 of 9\nLast updated: March 3, 2024\n© 2024 State of Texas. All rights reserved.\nBody text";
        assert_eq!(normalize_text(raw), "sales tax update\n\nbody text");
    }

    #[test]
    fn test_cosmetic_differences_normalize_identically() {
        let a = "Form ST-3 revised\r\n\r\nEffective 7/1/2024";
        let b = "  form  st-3 revised  \n\n\n\neffective\t7/1/2024\u{feff}";
        assert_eq!(normalize_text(a), normalize_text(b));
    }

    #[test]
    fn test_idempotent() {
        let once = normalize_text("A  b\n\n\n\nC\u{a0}d");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn test_content_chars() {
        assert_eq!(content_chars(" a b\n c "), 3);
    }
}
