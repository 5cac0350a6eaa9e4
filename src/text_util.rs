use std::{collections::BTreeSet, sync::LazyLock};

use regex::Regex;

use crate::markdown::Line;

/// Maximum characters kept in a section summary or example description.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Maximum characters kept in an entity description.
pub const DESCRIPTION_MAX_CHARS: usize = 300;

/// Maximum number of keywords stored per section.
pub const MAX_KEYWORDS: usize = 50;

/// Lines scanned after a heading when looking for its first paragraph.
const PARAGRAPH_SCAN_LINES: usize = 10;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "from", "are", "was", "will",
    "can", "not", "but", "has", "its", "have", "when", "each", "more", "also",
    "they", "been", "than", "then", "would", "could", "should", "these",
    "those", "about", "which", "their", "there",
];

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"\b[a-zA-Z_]\w{2,}\b"));

/// Compile a regex literal known to be valid.
pub(crate) fn static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex literal")
}

/// Collapse every run of whitespace into a single space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep at most `max` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// First paragraph after line index `start`.
///
/// Blank lines before the paragraph are skipped. The paragraph ends at a
/// blank line, a heading or a fence marker. At most ten lines are scanned.
pub fn first_paragraph(lines: &[Line<'_>], start: usize) -> String {
    let mut parts = Vec::new();
    let end = (start + PARAGRAPH_SCAN_LINES).min(lines.len());

    for line in lines.get(start..end).unwrap_or_default() {
        let text = line.text.trim();
        if text.is_empty() {
            if !parts.is_empty() {
                break;
            }
            continue;
        }
        if text.starts_with('#') || text.starts_with("```") {
            break;
        }
        parts.push(text);
    }

    truncate_chars(&parts.join(" "), SUMMARY_MAX_CHARS)
}

/// Searchable keywords in `text`.
///
/// Words of three or more characters, lowercased, minus stopwords, plus
/// any `vocabulary` phrase that appears in the text. Sorted and capped.
pub fn extract_keywords(text: &str, vocabulary: &[&str]) -> Vec<String> {
    let mut words: BTreeSet<String> = WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect();

    let lower = text.to_lowercase();
    for phrase in vocabulary {
        if lower.contains(phrase) {
            words.insert((*phrase).to_string());
        }
    }

    words.into_iter().take(MAX_KEYWORDS).collect()
}
