//! Byte-range extraction of indexed entries.
//!
//! An [`Extractor`] borrows a loaded [`Index`] and reads exactly the bytes
//! an entry points at, confined to the source root.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Component, Path, PathBuf},
};

use serde::Serialize;

use crate::{
    entry_id::slugify,
    error::{Error, Result},
    markdown,
    profile::Profile,
    schema::{Entity, EntityKind, Entry, Index, Record, Section},
};

/// Namespace prefix of code example ids.
pub const EXAMPLE_PREFIX: &str = "ex/";

/// Bytes per estimated token.
const BYTES_PER_TOKEN: u64 = 4;

/// Token accounting attached to every extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TokenStats {
    /// Extracted bytes / 4.
    pub estimated_tokens: u64,
    /// Whole source file bytes / 4, at least 1.
    pub full_tokens: u64,
    /// `(1 - estimated / full) * 100`, one decimal.
    pub reduction_pct: f64,
}

impl TokenStats {
    pub fn compute(content_bytes: usize, file_size: u64) -> Self {
        let estimated_tokens = content_bytes as u64 / BYTES_PER_TOKEN;
        let full_tokens = (file_size / BYTES_PER_TOKEN).max(1);
        let ratio = estimated_tokens as f64 / full_tokens as f64;
        Self {
            estimated_tokens,
            full_tokens,
            reduction_pct: ((1.0 - ratio) * 1000.0).round() / 10.0,
        }
    }
}

/// Content read for one entry.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub id: String,
    pub kind: &'static str,
    pub title: String,
    pub source_file: String,
    pub byte_offset: u64,
    pub byte_length: u64,
    pub content: String,
    /// The source file was shorter than the recorded range.
    pub clamped: bool,
    pub outline: bool,
    pub tokens: TokenStats,
    pub record: Record,
}

/// Raw bytes read from a source range.
#[derive(Debug, Clone)]
pub struct RangeRead {
    pub text: String,
    pub file_size: u64,
    pub clamped: bool,
}

/// How a lookup key is compared against index ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Exact,
    CaseInsensitive,
    Substring,
}

impl Strategy {
    const ALL: [Strategy; 3] =
        [Strategy::Exact, Strategy::CaseInsensitive, Strategy::Substring];
    const PERMISSIVE: [Strategy; 2] =
        [Strategy::CaseInsensitive, Strategy::Substring];

    fn matches(self, target: &str, key: &str) -> bool {
        match self {
            Strategy::Exact => key == target,
            Strategy::CaseInsensitive => key.to_lowercase() == target.to_lowercase(),
            Strategy::Substring => {
                let normalized = target.trim().to_lowercase().replace(' ', "-");
                if normalized.is_empty() {
                    return false;
                }
                let key = key.to_lowercase();
                key.contains(&normalized)
                    || key.contains(&normalized.replace('-', " "))
            }
        }
    }
}

/// The part of the index a lookup searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    All,
    Sections,
    Examples,
    Kind(EntityKind),
}

pub struct Extractor<'a> {
    index: &'a Index,
    root: PathBuf,
    profile: Profile,
}

impl<'a> Extractor<'a> {
    pub fn new(index: &'a Index, root: &Path, profile: Profile) -> Self {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self {
            index,
            root,
            profile,
        }
    }

    pub fn index(&self) -> &'a Index {
        self.index
    }

    /// Entries in `scope`, in resolution priority order.
    fn candidates(&self, scope: Scope) -> Vec<Entry<'a>> {
        let index = self.index;
        match scope {
            Scope::All => index
                .sections
                .values()
                .map(Entry::Section)
                .chain(index.entities.values().map(Entry::Entity))
                .chain(index.examples.values().map(Entry::Example))
                .collect(),
            Scope::Sections => index.sections.values().map(Entry::Section).collect(),
            Scope::Examples => index.examples.values().map(Entry::Example).collect(),
            Scope::Kind(kind) => index
                .entities
                .values()
                .filter(|e| e.kind == kind)
                .map(Entry::Entity)
                .collect(),
        }
    }

    /// First entry in `scope` matched by the earliest strategy.
    fn find(
        &self,
        scope: Scope,
        target: &str,
        strategies: &[Strategy],
    ) -> Option<Entry<'a>> {
        let candidates = self.candidates(scope);
        strategies.iter().find_map(|strategy| {
            candidates
                .iter()
                .find(|entry| strategy.matches(target, entry.id()))
                .copied()
        })
    }

    /// Resolve any identifier to an entry.
    ///
    /// Exact ids win across sections, entities and examples. Ids with an
    /// `ex/` or entity-kind prefix are then matched only within that
    /// mapping. Anything else falls back to a case-insensitive, then
    /// substring match over every mapping.
    pub fn resolve(&self, id: &str) -> Option<Entry<'a>> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        if let Some(entry) = self.index.entry(id) {
            return Some(entry);
        }
        if id.starts_with(EXAMPLE_PREFIX) {
            return self.find(Scope::Examples, id, &Strategy::ALL);
        }
        if let Some((kind, _)) = EntityKind::from_prefixed(id) {
            return self.find(Scope::Kind(kind), id, &Strategy::ALL);
        }
        self.find(Scope::All, id, &Strategy::PERMISSIVE)
    }

    /// Resolve an entity by kind and bare or prefixed name.
    pub fn resolve_entity(&self, kind: EntityKind, name: &str) -> Option<&'a Entity> {
        let name = name.trim();
        let bare = name.strip_prefix(kind.prefix()).unwrap_or(name);
        if bare.is_empty() {
            return None;
        }

        let scope = Scope::Kind(kind);
        let found = self
            .find(scope, &format!("{}{bare}", kind.prefix()), &[Strategy::Exact])
            .or_else(|| {
                self.find(
                    scope,
                    &format!("{}{}", kind.prefix(), slugify(bare)),
                    &[Strategy::Exact],
                )
            })
            .or_else(|| self.find(scope, name, &Strategy::ALL))
            .or_else(|| self.find(scope, bare, &Strategy::PERMISSIVE));

        match found {
            Some(Entry::Entity(entity)) => Some(entity),
            _ => None,
        }
    }

    /// Extract any entry by id.
    pub fn extract(&self, id: &str, outline: bool) -> Result<Extraction> {
        let entry = self.resolve(id).ok_or_else(|| not_found("entry", id))?;
        self.read_entry(entry, outline)
    }

    /// Extract a section, falling back to any entry the id resolves to.
    pub fn get_section(&self, id: &str, outline: bool) -> Result<Extraction> {
        let entry = self
            .find(Scope::Sections, id.trim(), &Strategy::ALL)
            .or_else(|| self.resolve(id))
            .ok_or_else(|| not_found("section", id))?;
        self.read_entry(entry, outline)
    }

    pub fn get_entity(
        &self,
        kind: EntityKind,
        name: &str,
        outline: bool,
    ) -> Result<Extraction> {
        let entity = self
            .resolve_entity(kind, name)
            .ok_or_else(|| not_found(kind.as_str(), name))?;
        self.read_entry(Entry::Entity(entity), outline)
    }

    pub fn get_example(&self, id: &str) -> Result<Extraction> {
        let entry = self
            .find(Scope::Examples, id.trim(), &Strategy::ALL)
            .ok_or_else(|| not_found("example", id))?;
        self.read_entry(entry, false)
    }

    /// Read an entry's bytes, optionally reduced to an outline.
    pub fn read_entry(&self, entry: Entry<'_>, outline: bool) -> Result<Extraction> {
        let (offset, length) = entry.byte_range();
        let read = self.read_range(entry.source_file(), offset, length)?;
        let content = if outline {
            markdown::outline(&read.text, self.profile.declarations())
        } else {
            read.text
        };
        let tokens = TokenStats::compute(content.len(), read.file_size);

        Ok(Extraction {
            id: entry.id().to_string(),
            kind: entry.kind().as_str(),
            title: entry.title().to_string(),
            source_file: entry.source_file().to_string(),
            byte_offset: offset,
            byte_length: length,
            content,
            clamped: read.clamped,
            outline,
            tokens,
            record: entry.to_record(),
        })
    }

    /// Entities of one kind whose attributes equal every filter, by name.
    pub fn list_entities(
        &self,
        kind: EntityKind,
        filters: &[(String, String)],
    ) -> Vec<&'a Entity> {
        let mut entities: Vec<_> = self
            .index
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .filter(|e| {
                filters
                    .iter()
                    .all(|(key, value)| e.attribute(key) == Some(value.as_str()))
            })
            .collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        entities
    }

    /// Every code example whose owning section id contains `topic`,
    /// ignoring case. A blank topic matches nothing.
    pub fn examples_for_section(&self, topic: &str) -> Result<Vec<Extraction>> {
        let topic = topic.trim().to_lowercase();
        if topic.is_empty() {
            return Ok(Vec::new());
        }
        self.index
            .examples
            .values()
            .filter(|x| {
                x.section_id
                    .as_deref()
                    .is_some_and(|s| s.to_lowercase().contains(&topic))
            })
            .map(|x| self.read_entry(Entry::Example(x), false))
            .collect()
    }

    /// Sections from documents of one category, by id. Case-insensitive.
    pub fn sections_in_category(&self, category: &str) -> Vec<&'a Section> {
        let category = category.trim().to_lowercase();
        self.index
            .sections
            .values()
            .filter(|s| s.category.to_lowercase() == category)
            .collect()
    }

    /// Resolve `source_file` inside the root.
    ///
    /// Empty, absolute and parent-relative references are rejected before
    /// touching the filesystem. Symlinks are resolved and must stay inside
    /// the root.
    pub fn safe_path(&self, source_file: &str) -> Result<PathBuf> {
        if source_file.trim().is_empty() {
            return Err(Error::PathTraversal("empty path".to_string()));
        }
        let relative = Path::new(source_file);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if relative.is_absolute() || escapes {
            return Err(Error::PathTraversal(source_file.to_string()));
        }

        let resolved = match self.root.join(relative).canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::SourceMissing(source_file.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if !resolved.starts_with(&self.root) {
            return Err(Error::PathTraversal(source_file.to_string()));
        }
        if !resolved.is_file() {
            return Err(Error::SourceMissing(source_file.to_string()));
        }
        Ok(resolved)
    }

    /// Read `[offset, offset + length)` of a source file.
    ///
    /// An offset at or past the end is an error. A range running past the
    /// end is clamped. Invalid UTF-8 is replaced, never dropped.
    pub fn read_range(
        &self,
        source_file: &str,
        offset: u64,
        length: u64,
    ) -> Result<RangeRead> {
        let path = self.safe_path(source_file)?;
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Err(Error::Range {
                source_file: source_file.to_string(),
                offset,
                size: file_size,
            });
        }

        let available = file_size - offset;
        let clamped = length > available;
        if clamped {
            tracing::debug!(
                file = %source_file,
                offset,
                length,
                available,
                "Clamping range to shrunken source"
            );
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::new();
        file.take(length.min(available)).read_to_end(&mut bytes)?;

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    file = %source_file,
                    offset,
                    "Source range is not valid UTF-8, decoding lossily"
                );
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };

        Ok(RangeRead {
            text,
            file_size,
            clamped,
        })
    }
}

fn not_found(kind: &'static str, name: &str) -> Error {
    Error::EntryNotFound {
        kind,
        name: name.to_string(),
    }
}
