//! Builds an [`Index`] from a directory of source documents.

use std::{collections::BTreeMap, path::Path};

use globset::GlobSet;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::{
    detect::{DocContext, EntityDetector},
    entry_id::{IdAllocator, slugify},
    error::{Error, Result},
    markdown::{ScannedDoc, scan},
    profile::Profile,
    schema::{Entity, Example, INDEX_VERSION, Index, IndexStats, Section},
    text_util::{
        SUMMARY_MAX_CHARS,
        collapse_whitespace,
        extract_keywords,
        first_paragraph,
        truncate_chars,
    },
    walker::{SourceFile, build_includes, discover_files},
};

/// Stand-in owner slug for code blocks that precede every heading.
const ROOT_OWNER: &str = "root";

/// Hex SHA-256 of a byte buffer.
pub fn file_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Combine per-file digests into one order-independent fingerprint.
pub fn combine_hashes(mut digests: Vec<String>) -> String {
    digests.sort();
    file_hash(digests.concat().as_bytes())
}

/// Indexes a source tree according to a [`Profile`].
pub struct Indexer {
    profile: Profile,
    includes: GlobSet,
    detectors: Vec<Box<dyn EntityDetector>>,
}

impl Indexer {
    /// Indexer with the profile's detectors. Empty `includes` falls back to
    /// the profile's default globs.
    pub fn new(profile: Profile, includes: &[String]) -> Result<Self> {
        let includes = if includes.is_empty() {
            build_includes(&profile.default_includes())?
        } else {
            build_includes(includes)?
        };
        Ok(Self {
            profile,
            includes,
            detectors: profile.detectors(),
        })
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Discover and read every matching document, in path order.
    ///
    /// Files are read in parallel. Unreadable files are logged and left
    /// out. Zero discovered documents is an error.
    fn load_sources(
        &self,
        source_dir: &Path,
    ) -> Result<Vec<(SourceFile, Vec<u8>)>> {
        if !source_dir.is_dir() {
            return Err(Error::NoSourceFiles(source_dir.to_path_buf()));
        }
        let files = discover_files(source_dir, &self.includes)?;
        if files.is_empty() {
            return Err(Error::NoSourceFiles(source_dir.to_path_buf()));
        }

        let loaded = files
            .into_par_iter()
            .filter_map(|file| match std::fs::read(&file.absolute_path) {
                Ok(bytes) => Some((file, bytes)),
                Err(e) => {
                    tracing::warn!(
                        file = %file.relative_path,
                        error = %e,
                        "Skipping unreadable source"
                    );
                    None
                }
            })
            .collect();
        Ok(loaded)
    }

    /// Fingerprint of the current source tree.
    pub fn source_hash(&self, source_dir: &Path) -> Result<String> {
        let digests = self
            .load_sources(source_dir)?
            .par_iter()
            .map(|(_, bytes)| file_hash(bytes))
            .collect();
        Ok(combine_hashes(digests))
    }

    /// Whether `index` still matches the sources on disk.
    pub fn check_freshness(
        &self,
        index: &Index,
        source_dir: &Path,
    ) -> Result<bool> {
        Ok(self.source_hash(source_dir)? == index.source_hash)
    }

    /// Build a fresh index from every document under `source_dir`.
    pub fn build(&self, source_dir: &Path) -> Result<Index> {
        let sources = self.load_sources(source_dir)?;

        let mut builder = Builder {
            profile: self.profile,
            detectors: &self.detectors,
            ids: IdAllocator::new(),
            index: Index::default(),
            digests: Vec::with_capacity(sources.len()),
        };

        for (file, bytes) in &sources {
            builder.add_document(file, bytes);
        }

        let index = builder.finish();
        tracing::info!(
            sections = index.stats.total_sections,
            entities = index.stats.total_entities,
            examples = index.stats.total_examples,
            files = index.stats.total_files,
            "Built index"
        );
        Ok(index)
    }
}

/// Nearest prose line above `open_line`, not looking above `floor` and
/// skipping over earlier code blocks.
fn example_description(doc: &ScannedDoc<'_>, floor: usize, open_line: usize) -> String {
    let mut line = open_line;
    while line > floor {
        line -= 1;
        if let Some(prev) = doc.fences.iter().find(|f| f.close_line == line) {
            line = prev.open_line;
            continue;
        }
        let text = doc.lines[line].text.trim();
        if !text.is_empty() && !text.starts_with('#') && !text.starts_with("```") {
            return truncate_chars(text, SUMMARY_MAX_CHARS);
        }
    }
    String::new()
}

/// Build an index with a profile's default includes.
pub fn build(source_dir: &Path, profile: Profile) -> Result<Index> {
    Indexer::new(profile, &[])?.build(source_dir)
}

struct Builder<'a> {
    profile: Profile,
    detectors: &'a [Box<dyn EntityDetector>],
    ids: IdAllocator,
    index: Index,
    digests: Vec<String>,
}

impl Builder<'_> {
    fn add_document(&mut self, file: &SourceFile, bytes: &[u8]) {
        self.digests.push(file_hash(bytes));
        self.index.stats.total_files += 1;
        self.index.stats.total_bytes += bytes.len() as u64;

        if std::str::from_utf8(bytes).is_err() {
            tracing::warn!(
                file = %file.relative_path,
                "Source is not valid UTF-8; indexing lossily"
            );
        }

        let doc = scan(bytes);
        let category = self.profile.category(&file.relative_path);
        let section_ids = self.add_sections(file, &doc, &category);
        self.add_examples(file, &doc, &category, &section_ids);
        self.add_entities(file, &doc, &section_ids);
    }

    /// Returns the id assigned to each heading, `None` for skipped ones.
    fn add_sections(
        &mut self,
        file: &SourceFile,
        doc: &ScannedDoc<'_>,
        category: &str,
    ) -> Vec<Option<String>> {
        let mut assigned: Vec<Option<String>> =
            Vec::with_capacity(doc.headings.len());

        for (i, heading) in doc.headings.iter().enumerate() {
            let slug = slugify(&heading.title);
            if slug.is_empty() {
                tracing::debug!(
                    file = %file.relative_path,
                    title = %heading.title,
                    "Skipping heading with empty slug"
                );
                assigned.push(None);
                continue;
            }

            let id = self.ids.allocate(&format!("{category}/{slug}"), file.stem());
            let start = heading.offset;
            let end = doc.section_end(i);
            let text = doc.text(start, end);

            let parent = doc.headings[..i]
                .iter()
                .rposition(|h| h.level < heading.level)
                .and_then(|j| assigned[j].clone());

            let mut summary = first_paragraph(&doc.lines, heading.line + 1);
            if summary.is_empty() {
                let body = doc.lines.get(heading.line + 1).map_or(end, |l| l.offset);
                summary = truncate_chars(
                    &collapse_whitespace(&doc.text(body.min(end), end)),
                    SUMMARY_MAX_CHARS,
                );
            }

            self.index.sections.insert(
                id.clone(),
                Section {
                    id: id.clone(),
                    title: heading.title.clone(),
                    level: heading.level,
                    source_file: file.relative_path.clone(),
                    byte_offset: start as u64,
                    byte_length: (end - start) as u64,
                    category: category.to_string(),
                    summary,
                    parent: parent.clone(),
                    subsections: Vec::new(),
                    code_blocks: doc
                        .fences
                        .iter()
                        .filter(|f| f.within(start, end))
                        .count(),
                    keywords: extract_keywords(&text, self.profile.vocabulary()),
                },
            );

            if let Some(parent) = parent
                && let Some(p) = self.index.sections.get_mut(&parent)
            {
                p.subsections.push(id.clone());
            }
            assigned.push(Some(id));
        }

        assigned
    }

    fn add_examples(
        &mut self,
        file: &SourceFile,
        doc: &ScannedDoc<'_>,
        category: &str,
        section_ids: &[Option<String>],
    ) {
        for (n, fence) in doc.fences.iter().enumerate() {
            let owner = doc.heading_before(fence.offset);
            let owner_slug = owner
                .map(|i| slugify(&doc.headings[i].title))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| ROOT_OWNER.to_string());
            let section_id = owner.and_then(|i| section_ids[i].clone());
            let floor = owner.map_or(0, |i| doc.headings[i].line + 1);
            let description = example_description(doc, floor, fence.open_line);

            let id = self.ids.allocate(
                &format!("ex/{category}/{owner_slug}-{n}"),
                file.stem(),
            );
            let language = if fence.language.is_empty() {
                "text".to_string()
            } else {
                fence.language.clone()
            };

            self.index.examples.insert(
                id.clone(),
                Example {
                    id,
                    source_file: file.relative_path.clone(),
                    byte_offset: fence.offset as u64,
                    byte_length: fence.len() as u64,
                    section_id,
                    language,
                    description,
                },
            );
        }
    }

    fn add_entities(
        &mut self,
        file: &SourceFile,
        doc: &ScannedDoc<'_>,
        section_ids: &[Option<String>],
    ) {
        let ctx = DocContext {
            source_file: &file.relative_path,
            doc,
        };

        for detector in self.detectors {
            let detections = detector.detect(&ctx);
            tracing::debug!(
                file = %file.relative_path,
                detector = detector.name(),
                found = detections.len(),
                "Ran detector"
            );

            for d in detections {
                let end = d.byte_offset + d.byte_length;
                if d.slug.is_empty() || d.byte_length == 0 || end > doc.len() {
                    tracing::debug!(
                        file = %file.relative_path,
                        name = %d.name,
                        "Dropping invalid detection"
                    );
                    continue;
                }

                let base = format!("{}{}", d.kind.prefix(), d.slug);
                if d.first_wins && self.ids.contains(&base) {
                    continue;
                }
                let id = self.ids.allocate(&base, file.stem());

                let section_id = doc
                    .heading_before(d.byte_offset + 1)
                    .and_then(|i| section_ids[i].clone());

                self.index.entities.insert(
                    id.clone(),
                    Entity {
                        id,
                        kind: d.kind,
                        name: d.name,
                        alias: d.alias,
                        description: d.description,
                        source_file: file.relative_path.clone(),
                        byte_offset: d.byte_offset as u64,
                        byte_length: d.byte_length as u64,
                        section_id,
                        attributes: d.attributes,
                        tags: d.tags,
                        see_also: d.see_also,
                        popularity: d.popularity,
                    },
                );
            }
        }
    }

    fn finish(mut self) -> Index {
        let known: Vec<String> = self.index.entities.keys().cloned().collect();
        for entity in self.index.entities.values_mut() {
            entity.see_also.retain(|id| {
                *id != entity.id && known.binary_search(id).is_ok()
            });
            entity.see_also.sort_unstable();
            entity.see_also.dedup();
        }

        let mut tags: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut authors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for entity in self.index.entities.values() {
            for tag in &entity.tags {
                let ids = tags.entry(tag.to_lowercase()).or_default();
                if !ids.contains(&entity.id) {
                    ids.push(entity.id.clone());
                }
            }
            if let Some(author) = entity.attribute("author") {
                authors
                    .entry(author.to_string())
                    .or_default()
                    .push(entity.id.clone());
            }
            *by_kind.entry(entity.kind.plural().to_string()).or_default() += 1;
        }

        let index = &mut self.index;
        index.tags = tags;
        index.authors = authors;
        index.version = INDEX_VERSION.to_string();
        index.generated_at = chrono::Utc::now().to_rfc3339();
        index.source_hash = combine_hashes(self.digests);
        index.stats = IndexStats {
            total_sections: index.sections.len(),
            total_entities: index.entities.len(),
            total_examples: index.examples.len(),
            entities_by_kind: by_kind,
            ..index.stats.clone()
        };

        self.index
    }
}
