//! Tiered fuzzy search over a loaded [`Index`].
//!
//! Scoring is a fixed ladder of strategies tried in order: substring
//! containment, whole-word containment, partial word containment, and a
//! Ratcliff/Obershelp similarity fallback. A candidate's score is the best
//! score over its searchable fields and its own id.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::Serialize;

use crate::{
    schema::{Entity, EntityKind, Entry, Index},
    text_util::{SUMMARY_MAX_CHARS, truncate_chars},
};

/// Candidates must score strictly above this to be returned by `search`.
pub const MIN_RELEVANCE: f64 = 0.3;

pub const DEFAULT_LIMIT: usize = 10;

pub const DEFAULT_SUGGESTIONS: usize = 5;

const SUBSTRING_BASE: f64 = 0.9;
const SUBSTRING_BONUS: f64 = 0.1;
const ALL_WORDS: f64 = 0.8;
const PARTIAL_BASE: f64 = 0.5;
const PARTIAL_SPAN: f64 = 0.3;
const FUZZY_SCALE: f64 = 0.5;

/// Score how well `query` matches `text`, in `[0, 1]`.
pub fn score(query: &str, text: &str) -> f64 {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return 0.0;
    }
    let t = text.to_lowercase();

    if t.contains(&q) {
        let q_len = q.chars().count() as f64;
        let t_len = t.chars().count().max(1) as f64;
        return (SUBSTRING_BASE + q_len / t_len * SUBSTRING_BONUS).min(1.0);
    }

    let q_words: Vec<&str> = q.split_whitespace().collect();
    let t_words: Vec<&str> = t.split_whitespace().collect();
    if q_words.iter().all(|w| t_words.contains(w)) {
        return ALL_WORDS;
    }

    let matched = q_words
        .iter()
        .filter(|w| t_words.iter().any(|tw| tw.contains(**w)))
        .count();
    if matched > 0 {
        return PARTIAL_BASE + matched as f64 / q_words.len() as f64 * PARTIAL_SPAN;
    }

    similarity(&q, &t) * FUZZY_SCALE
}

/// Ratcliff/Obershelp similarity: twice the matched characters over the
/// combined length.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_common_run(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..i], &b[..j])
        + matching_chars(&a[i + len..], &b[j + len..])
}

/// Earliest longest common run as `(start_a, start_b, len)`.
fn longest_common_run(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            if cur[j + 1] > best.2 {
                let len = cur[j + 1];
                best = (i + 1 - len, j + 1 - len, len);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// The universe a search is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Sections,
    Examples,
    Entities(EntityKind),
}

impl Category {
    fn admits(self, entry: &Entry<'_>) -> bool {
        match (self, entry) {
            (Category::Sections, Entry::Section(_)) => true,
            (Category::Examples, Entry::Example(_)) => true,
            (Category::Entities(kind), Entry::Entity(e)) => e.kind == kind,
            _ => false,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Sections => f.write_str("sections"),
            Category::Examples => f.write_str("examples"),
            Category::Entities(kind) => f.write_str(kind.plural()),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sections" | "section" => Ok(Category::Sections),
            "examples" | "example" => Ok(Category::Examples),
            other => other
                .parse::<EntityKind>()
                .map(Category::Entities)
                .map_err(|_| format!("unknown category: {other}")),
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub kind: &'static str,
    pub score: f64,
    pub title: String,
    pub source_file: String,
    pub summary: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub popularity: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// A listing row without content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listed {
    pub id: String,
    pub kind: &'static str,
    pub title: String,
    pub source_file: String,
}

impl From<Entry<'_>> for Listed {
    fn from(entry: Entry<'_>) -> Self {
        Listed {
            id: entry.id().to_string(),
            kind: entry.kind().as_str(),
            title: entry.title().to_string(),
            source_file: entry.source_file().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount {
    pub value: String,
    pub count: usize,
}

/// Text fields a candidate is scored against, besides its id.
fn searchable_fields(entry: &Entry<'_>) -> Vec<String> {
    match entry {
        Entry::Section(s) => vec![
            s.title.clone(),
            s.summary.clone(),
            s.category.clone(),
            s.keywords.join(" "),
        ],
        Entry::Entity(e) => {
            let mut fields = vec![e.name.clone(), e.description.clone()];
            fields.extend(e.alias.clone());
            fields.extend(e.attributes.values().cloned());
            fields.push(e.tags.join(" "));
            fields.push(e.see_also.join(" "));
            fields
        }
        Entry::Example(x) => vec![
            x.section_id.clone().unwrap_or_default(),
            x.description.clone(),
        ],
    }
}

fn popularity(entry: &Entry<'_>) -> u64 {
    match entry {
        Entry::Entity(e) => e.popularity,
        _ => 0,
    }
}

pub struct Searcher<'a> {
    index: &'a Index,
}

impl<'a> Searcher<'a> {
    pub fn new(index: &'a Index) -> Self {
        Self { index }
    }

    /// Every entry in candidate order: sections, entities, examples, each
    /// by id.
    fn candidates(&self) -> impl Iterator<Item = Entry<'a>> {
        let index = self.index;
        index
            .sections
            .values()
            .map(Entry::Section)
            .chain(index.entities.values().map(Entry::Entity))
            .chain(index.examples.values().map(Entry::Example))
    }

    /// Best score of `query` over an entry's fields and id.
    pub fn score_entry(query: &str, entry: &Entry<'_>) -> f64 {
        searchable_fields(entry)
            .iter()
            .map(|field| score(query, field))
            .fold(score(query, entry.id()), f64::max)
    }

    /// Ranked matches above [`MIN_RELEVANCE`].
    ///
    /// `category` narrows the candidates before scoring. Ties on score
    /// break by popularity, then candidate order. `limit` only truncates.
    pub fn search(
        &self,
        query: &str,
        category: Option<Category>,
        limit: usize,
    ) -> Vec<SearchHit> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .candidates()
            .filter(|entry| category.is_none_or(|c| c.admits(entry)))
            .filter_map(|entry| {
                let best = Self::score_entry(query, &entry);
                (best > MIN_RELEVANCE).then(|| SearchHit {
                    id: entry.id().to_string(),
                    kind: entry.kind().as_str(),
                    score: round3(best),
                    title: entry.title().to_string(),
                    source_file: entry.source_file().to_string(),
                    summary: truncate_chars(entry.summary(), SUMMARY_MAX_CHARS),
                    popularity: popularity(&entry),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.popularity.cmp(&a.popularity))
        });
        hits.truncate(limit);

        tracing::debug!(query, ?category, hits = hits.len(), "Search finished");
        hits
    }

    /// The `n` ids closest to `query`, with no relevance floor.
    pub fn suggest(&self, query: &str, n: usize) -> Vec<String> {
        let mut scored: Vec<(&str, f64)> = self
            .index
            .all_ids()
            .map(|id| (id, score(query, id)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .take(n)
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Every entry in a category, by id.
    pub fn list_category(&self, category: Category) -> Vec<Listed> {
        self.candidates()
            .filter(|entry| category.admits(entry))
            .map(Listed::from)
            .collect()
    }

    /// Count entities of `kind` per value of `attribute`. Entities without
    /// the attribute count as `unknown`.
    pub fn facet_counts(&self, kind: EntityKind, attribute: &str) -> Vec<FacetCount> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entity in self.index.entities.values().filter(|e| e.kind == kind) {
            *counts
                .entry(entity.attribute(attribute).unwrap_or("unknown"))
                .or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(value, count)| FacetCount {
                value: value.to_string(),
                count,
            })
            .collect()
    }

    /// Entities of `kind` whose `attribute` equals `value`, by name.
    pub fn find_by_attribute(
        &self,
        kind: EntityKind,
        attribute: &str,
        value: &str,
    ) -> Vec<&'a Entity> {
        let mut found: Vec<_> = self
            .index
            .entities
            .values()
            .filter(|e| e.kind == kind && e.attribute(attribute) == Some(value))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Every tag with the number of entities carrying it, by tag.
    pub fn list_tags(&self) -> Vec<FacetCount> {
        secondary_counts(&self.index.tags)
    }

    /// Entities carrying `tag` (case-insensitive), optionally of one kind,
    /// by name then id.
    pub fn find_by_tag(&self, tag: &str, kind: Option<EntityKind>) -> Vec<&'a Entity> {
        let Some(ids) = self.index.tags.get(&tag.trim().to_lowercase()) else {
            return Vec::new();
        };
        let mut found: Vec<&'a Entity> = ids
            .iter()
            .filter_map(|id| self.index.entities.get(id))
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// Every author with the number of entities attributed to them.
    pub fn list_authors(&self) -> Vec<FacetCount> {
        secondary_counts(&self.index.authors)
    }
}

fn secondary_counts(map: &BTreeMap<String, Vec<String>>) -> Vec<FacetCount> {
    map.iter()
        .map(|(value, ids)| FacetCount {
            value: value.clone(),
            count: ids.len(),
        })
        .collect()
}
