//! Index data model.
//!
//! Every addressable unit (section, entity, code example) records the
//! source file it came from and the exact byte range that reproduces it.
//! All mappings are [`BTreeMap`]s, so iteration is always in sorted
//! identifier order.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Current on-disk index format version.
pub const INDEX_VERSION: &str = "1.0.0";

/// A heading-delimited span of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    /// Heading level, 1 through 6.
    pub level: u8,
    /// Path relative to the source root, `/` separated.
    pub source_file: String,
    pub byte_offset: u64,
    pub byte_length: u64,
    pub category: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub subsections: Vec<String>,
    #[serde(default)]
    pub code_blocks: usize,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// The domain-specific kinds of entity a profile can detect.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Pattern,
    Strategy,
    Contract,
    Function,
    Script,
    Template,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Pattern,
        EntityKind::Strategy,
        EntityKind::Contract,
        EntityKind::Function,
        EntityKind::Script,
        EntityKind::Template,
    ];

    /// Identifier namespace prefix, including the trailing slash.
    pub fn prefix(self) -> &'static str {
        match self {
            EntityKind::Pattern => "pat/",
            EntityKind::Strategy => "strat/",
            EntityKind::Contract => "contract/",
            EntityKind::Function => "fn/",
            EntityKind::Script => "script/",
            EntityKind::Template => "tpl/",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Pattern => "pattern",
            EntityKind::Strategy => "strategy",
            EntityKind::Contract => "contract",
            EntityKind::Function => "function",
            EntityKind::Script => "script",
            EntityKind::Template => "template",
        }
    }

    /// Plural name used for category filters (`patterns`, `strategies`...).
    pub fn plural(self) -> &'static str {
        match self {
            EntityKind::Pattern => "patterns",
            EntityKind::Strategy => "strategies",
            EntityKind::Contract => "contracts",
            EntityKind::Function => "functions",
            EntityKind::Script => "scripts",
            EntityKind::Template => "templates",
        }
    }

    /// Find the kind whose namespace prefix starts `id`.
    pub fn from_prefixed(id: &str) -> Option<(EntityKind, &str)> {
        Self::ALL.into_iter().find_map(|kind| {
            id.strip_prefix(kind.prefix()).map(|rest| (kind, rest))
        })
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.plural() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

/// A detected domain entity: pattern, strategy, contract, function,
/// script or template. Structurally identical across kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    /// Secondary name or signature (Japanese pattern name, call signature).
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub description: String,
    pub source_file: String,
    pub byte_offset: u64,
    pub byte_length: u64,
    #[serde(default)]
    pub section_id: Option<String>,
    /// Scalar classification tags (`signal`, `pattern_type`, `author`...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// List classification (standards, script tags), secondary-indexed.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub see_also: Vec<String>,
    #[serde(default)]
    pub popularity: u64,
}

impl Entity {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A fenced code block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub id: String,
    pub source_file: String,
    pub byte_offset: u64,
    pub byte_length: u64,
    #[serde(default)]
    pub section_id: Option<String>,
    pub language: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexStats {
    pub total_sections: usize,
    pub total_entities: usize,
    pub total_examples: usize,
    pub total_files: usize,
    pub total_bytes: u64,
    #[serde(default)]
    pub entities_by_kind: BTreeMap<String, usize>,
}

/// Root aggregate. Immutable once persisted; rebuilt from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Index {
    pub version: String,
    pub generated_at: String,
    pub source_hash: String,
    pub sections: BTreeMap<String, Section>,
    pub entities: BTreeMap<String, Entity>,
    pub examples: BTreeMap<String, Example>,
    /// Tag → entity ids.
    pub tags: BTreeMap<String, Vec<String>>,
    /// Author → entity ids.
    pub authors: BTreeMap<String, Vec<String>>,
    pub stats: IndexStats,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            generated_at: String::new(),
            source_hash: String::new(),
            sections: BTreeMap::new(),
            entities: BTreeMap::new(),
            examples: BTreeMap::new(),
            tags: BTreeMap::new(),
            authors: BTreeMap::new(),
            stats: IndexStats::default(),
        }
    }
}

impl Index {
    /// Borrow any entry by exact id, in section → entity → example order.
    pub fn entry(&self, id: &str) -> Option<Entry<'_>> {
        self.sections
            .get(id)
            .map(Entry::Section)
            .or_else(|| self.entities.get(id).map(Entry::Entity))
            .or_else(|| self.examples.get(id).map(Entry::Example))
    }

    /// Every identifier across all kinds, in resolution priority order.
    pub fn all_ids(&self) -> impl Iterator<Item = &str> {
        self.sections
            .keys()
            .chain(self.entities.keys())
            .chain(self.examples.keys())
            .map(String::as_str)
    }
}

/// The kind of an addressable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Section,
    Entity(EntityKind),
    Example,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Section => "section",
            EntryKind::Entity(kind) => kind.as_str(),
            EntryKind::Example => "example",
        }
    }
}

/// A borrowed view over any indexed unit.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    Section(&'a Section),
    Entity(&'a Entity),
    Example(&'a Example),
}

impl<'a> Entry<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            Entry::Section(s) => &s.id,
            Entry::Entity(e) => &e.id,
            Entry::Example(x) => &x.id,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Section(_) => EntryKind::Section,
            Entry::Entity(e) => EntryKind::Entity(e.kind),
            Entry::Example(_) => EntryKind::Example,
        }
    }

    pub fn title(&self) -> &'a str {
        match self {
            Entry::Section(s) => &s.title,
            Entry::Entity(e) => &e.name,
            Entry::Example(x) => &x.id,
        }
    }

    pub fn summary(&self) -> &'a str {
        match self {
            Entry::Section(s) => &s.summary,
            Entry::Entity(e) => &e.description,
            Entry::Example(x) => &x.description,
        }
    }

    pub fn source_file(&self) -> &'a str {
        match self {
            Entry::Section(s) => &s.source_file,
            Entry::Entity(e) => &e.source_file,
            Entry::Example(x) => &x.source_file,
        }
    }

    pub fn byte_range(&self) -> (u64, u64) {
        match self {
            Entry::Section(s) => (s.byte_offset, s.byte_length),
            Entry::Entity(e) => (e.byte_offset, e.byte_length),
            Entry::Example(x) => (x.byte_offset, x.byte_length),
        }
    }

    pub fn to_record(self) -> Record {
        match self {
            Entry::Section(s) => Record::Section(s.clone()),
            Entry::Entity(e) => Record::Entity(e.clone()),
            Entry::Example(x) => Record::Example(x.clone()),
        }
    }
}

/// Owned counterpart of [`Entry`], serialized with a `record` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    Section(Section),
    Entity(Entity),
    Example(Example),
}

impl Record {
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Record::Entity(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_prefix_roundtrip() {
        for kind in EntityKind::ALL {
            let id = format!("{}hammer", kind.prefix());
            let (parsed, rest) = EntityKind::from_prefixed(&id).unwrap();
            assert_eq!(parsed, kind);
            assert_eq!(rest, "hammer");
        }
        assert!(EntityKind::from_prefixed("ex/foo").is_none());
    }

    #[test]
    fn kind_parses_singular_and_plural() {
        assert_eq!("patterns".parse::<EntityKind>(), Ok(EntityKind::Pattern));
        assert_eq!("Function".parse::<EntityKind>(), Ok(EntityKind::Function));
        assert!("widgets".parse::<EntityKind>().is_err());
    }

    #[test]
    fn entry_prefers_sections() {
        let mut index = Index::default();
        index.sections.insert(
            "a".into(),
            Section {
                id: "a".into(),
                title: "A".into(),
                level: 1,
                source_file: "a.md".into(),
                byte_offset: 0,
                byte_length: 3,
                category: "a".into(),
                summary: String::new(),
                parent: None,
                subsections: vec![],
                code_blocks: 0,
                keywords: vec![],
            },
        );
        index.examples.insert(
            "a".into(),
            Example {
                id: "a".into(),
                source_file: "a.md".into(),
                byte_offset: 0,
                byte_length: 1,
                section_id: None,
                language: "text".into(),
                description: String::new(),
            },
        );

        let entry = index.entry("a").unwrap();
        assert_eq!(entry.kind(), EntryKind::Section);
        assert_eq!(index.all_ids().count(), 2);
    }

    #[test]
    fn record_is_tagged() {
        let record = Record::Example(Example {
            id: "ex/x-0".into(),
            source_file: "x.md".into(),
            byte_offset: 4,
            byte_length: 10,
            section_id: None,
            language: "rust".into(),
            description: String::new(),
        });
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["record"], "example");
        assert_eq!(value["language"], "rust");
    }
}
