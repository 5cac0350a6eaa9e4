//! The query-side owner of a loaded [`Index`].
//!
//! An [`Engine`] is constructed from an explicit [`EngineConfig`] and
//! loads its index lazily through [`Engine::ensure_loaded`], rebuilding
//! from sources when the persisted copy is missing or unusable.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
    extractor::{Extraction, Extractor},
    indexer::Indexer,
    profile::Profile,
    schema::{Entry, Index, IndexStats},
    searcher::{Category, DEFAULT_SUGGESTIONS, Listed, Searcher},
    usage::{UsageLog, UsageReport},
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root that every indexed `source_file` is relative to.
    pub source_dir: PathBuf,
    pub index_path: PathBuf,
    pub profile: Profile,
    /// Include globs; empty means the profile's defaults.
    pub includes: Vec<String>,
    /// Where token accounting is appended, if anywhere.
    pub usage_log: Option<PathBuf>,
}

impl EngineConfig {
    /// Configuration rooted in a data directory. `source_dir` defaults to
    /// the data directory's `raw/`.
    pub fn from_data_dir(
        data_dir: &DataDir,
        source_dir: Option<PathBuf>,
        profile: Profile,
        includes: Vec<String>,
    ) -> Self {
        Self {
            source_dir: source_dir.unwrap_or_else(|| data_dir.sources_dir()),
            index_path: data_dir.index_path(),
            profile,
            includes,
            usage_log: Some(data_dir.usage_log()),
        }
    }
}

/// Summary of the loaded index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub index_path: PathBuf,
    pub source_dir: PathBuf,
    pub profile: Profile,
    pub version: String,
    pub generated_at: String,
    pub source_hash: String,
    /// `None` when the sources could not be hashed.
    pub fresh: Option<bool>,
    pub stats: IndexStats,
}

pub struct Engine {
    config: EngineConfig,
    indexer: Indexer,
    usage: Option<UsageLog>,
    index: Option<Index>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let indexer = Indexer::new(config.profile, &config.includes)?;
        let usage = config.usage_log.clone().map(UsageLog::new);
        Ok(Self {
            config,
            indexer,
            usage,
            index: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The index if it has been loaded or built.
    pub fn loaded(&self) -> Option<&Index> {
        self.index.as_ref()
    }

    /// Rebuild from sources and persist. A save failure is an error here.
    pub fn build(&mut self) -> Result<&Index> {
        let index = self.indexer.build(&self.config.source_dir)?;
        index.save(&self.config.index_path)?;
        tracing::info!(
            path = %self.config.index_path.display(),
            "Saved index"
        );
        Ok(self.index.insert(index))
    }

    /// Load the persisted index, rebuilding it when missing or corrupt.
    ///
    /// A failed save of the rebuilt index is logged and tolerated. If the
    /// rebuild itself fails, a corrupt index error is surfaced in
    /// preference to the build error.
    pub fn ensure_loaded(&mut self) -> Result<&Index> {
        let index = match self.index.take() {
            Some(index) => index,
            None => self.load_or_rebuild()?,
        };
        Ok(self.index.insert(index))
    }

    fn load_or_rebuild(&self) -> Result<Index> {
        let path = &self.config.index_path;
        let load_err = match Index::load(path) {
            Ok(index) => {
                tracing::debug!(path = %path.display(), "Loaded index");
                return Ok(index);
            }
            Err(e) if e.is_rebuildable() => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(error = %load_err, "Index unavailable, rebuilding");
        let index = match self.indexer.build(&self.config.source_dir) {
            Ok(index) => index,
            Err(build_err) => {
                tracing::error!(error = %build_err, "Rebuild failed");
                return Err(match load_err {
                    Error::IndexNotFound(_) => build_err,
                    corrupt => corrupt,
                });
            }
        };

        if let Err(e) = index.save(path) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not persist rebuilt index"
            );
        }
        Ok(index)
    }

    pub fn extractor(&mut self) -> Result<Extractor<'_>> {
        let root = self.config.source_dir.clone();
        let profile = self.config.profile;
        let index = self.ensure_loaded()?;
        Ok(Extractor::new(index, &root, profile))
    }

    pub fn searcher(&mut self) -> Result<Searcher<'_>> {
        Ok(Searcher::new(self.ensure_loaded()?))
    }

    /// Listing rows for a category. `doc_category` narrows sections to one
    /// document category and is rejected for any other listing.
    pub fn list(
        &mut self,
        category: Category,
        doc_category: Option<&str>,
    ) -> Result<Vec<Listed>> {
        let Some(doc_category) = doc_category else {
            return Ok(self.searcher()?.list_category(category));
        };
        if category != Category::Sections {
            return Err(Error::Config(format!(
                "document category filter applies to sections, not {category}"
            )));
        }
        let extractor = self.extractor()?;
        Ok(extractor
            .sections_in_category(doc_category)
            .into_iter()
            .map(|s| Listed::from(Entry::Section(s)))
            .collect())
    }

    /// Whether the loaded index matches the sources on disk.
    pub fn check_freshness(&mut self) -> Result<bool> {
        self.ensure_loaded()?;
        let hash = self.indexer.source_hash(&self.config.source_dir)?;
        Ok(self.index.as_ref().is_some_and(|i| i.source_hash == hash))
    }

    pub fn status(&mut self) -> Result<IndexStatus> {
        let fresh = self.check_freshness().ok();
        let index_path = self.config.index_path.clone();
        let source_dir = self.config.source_dir.clone();
        let profile = self.config.profile;
        let index = self.ensure_loaded()?;
        Ok(IndexStatus {
            index_path,
            source_dir,
            profile,
            version: index.version.clone(),
            generated_at: index.generated_at.clone(),
            source_hash: index.source_hash.clone(),
            fresh,
            stats: index.stats.clone(),
        })
    }

    /// Append a usage entry. Logging failures never fail the caller.
    pub fn record_usage(&self, op: &str, used: u64, saved: u64, details: Value) {
        let Some(log) = &self.usage else {
            return;
        };
        if let Err(e) = log.record(op, used, saved, details) {
            tracing::warn!(
                log = %log.path().display(),
                error = %e,
                "Could not record token usage"
            );
        }
    }

    /// Account for one extraction against loading the whole file.
    pub fn record_extraction(&self, op: &str, extraction: &Extraction) {
        let tokens = extraction.tokens;
        self.record_usage(
            op,
            tokens.estimated_tokens,
            tokens.full_tokens.saturating_sub(tokens.estimated_tokens),
            json!({ "id": extraction.id, "outline": extraction.outline }),
        );
    }

    /// Account for a listing or search response against loading every
    /// source document.
    pub fn record_response(&self, op: &str, response: &Value) {
        let used = (response.to_string().len() / 4) as u64;
        let baseline = self
            .index
            .as_ref()
            .map_or(0, |index| index.stats.total_bytes / 4);
        self.record_usage(op, used, baseline.saturating_sub(used), json!({}));
    }

    /// Ids close to the name in an [`Error::EntryNotFound`], if any.
    pub fn suggestions_for(&mut self, error: &Error) -> Vec<String> {
        let Error::EntryNotFound { name, .. } = error else {
            return Vec::new();
        };
        self.searcher()
            .map(|searcher| searcher.suggest(name, DEFAULT_SUGGESTIONS))
            .unwrap_or_default()
    }

    pub fn usage_report(&self) -> Result<UsageReport> {
        match &self.usage {
            Some(log) => log.report(),
            None => Ok(UsageReport::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::schema::EntityKind;

    const DOC: &str = "## Hammer\nBullish reversal, single candle.\n## Shooting Star\nBearish reversal.\n";

    fn config(root: &Path) -> EngineConfig {
        let sources = root.join("raw");
        std::fs::create_dir_all(&sources).unwrap();
        std::fs::write(sources.join("single-reversal.md"), DOC).unwrap();
        EngineConfig {
            source_dir: sources,
            index_path: root.join("index.json"),
            profile: Profile::Candlestick,
            includes: vec![],
            usage_log: Some(root.join("token_log.jsonl")),
        }
    }

    #[test]
    fn builds_and_persists_on_first_use() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(config(tmp.path())).unwrap();
        assert!(engine.loaded().is_none());

        let sections = engine.ensure_loaded().unwrap().stats.total_sections;
        assert_eq!(sections, 2);
        assert!(tmp.path().join("index.json").is_file());

        let mut reopened = Engine::new(config(tmp.path())).unwrap();
        assert_eq!(reopened.ensure_loaded().unwrap().stats.total_sections, 2);
    }

    #[test]
    fn corrupt_index_is_rebuilt() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        std::fs::write(&config.index_path, "{ broken").unwrap();

        let mut engine = Engine::new(config.clone()).unwrap();
        assert!(engine.ensure_loaded().unwrap().entities.contains_key("pat/hammer"));
        assert!(Index::load(&config.index_path).is_ok());
    }

    #[test]
    fn wrong_field_type_is_rebuilt() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        std::fs::write(&config.index_path, r#"{"sections": []}"#).unwrap();

        let mut engine = Engine::new(config).unwrap();
        assert_eq!(engine.ensure_loaded().unwrap().stats.total_sections, 2);
    }

    #[test]
    fn rebuild_failures_surface() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.source_dir = tmp.path().join("empty");

        let mut engine = Engine::new(config.clone()).unwrap();
        assert!(matches!(
            engine.ensure_loaded().unwrap_err(),
            Error::NoSourceFiles(_)
        ));

        std::fs::write(&config.index_path, "[]").unwrap();
        let mut engine = Engine::new(config).unwrap();
        assert!(matches!(
            engine.ensure_loaded().unwrap_err(),
            Error::IndexCorrupt { .. }
        ));
    }

    #[test]
    fn save_failure_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        config.index_path = blocker.join("index.json");

        let mut engine = Engine::new(config.clone()).unwrap();
        assert_eq!(engine.ensure_loaded().unwrap().stats.total_sections, 2);
        assert!(engine.build().is_err());
    }

    #[test]
    fn freshness_tracks_source_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let mut engine = Engine::new(config.clone()).unwrap();
        assert!(engine.check_freshness().unwrap());

        std::fs::write(config.source_dir.join("single-reversal.md"), "## Changed\n").unwrap();
        assert!(!engine.check_freshness().unwrap());
        assert_eq!(engine.status().unwrap().fresh, Some(false));

        engine.build().unwrap();
        assert!(engine.check_freshness().unwrap());
    }

    #[test]
    fn extraction_is_accounted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(config(tmp.path())).unwrap();
        let extraction = engine
            .extractor()
            .unwrap()
            .extract("pat/hammer", false)
            .unwrap();
        engine.record_extraction("extract", &extraction);

        let report = engine.usage_report().unwrap();
        assert_eq!(report.total_operations, 1);
        assert_eq!(report.total_tokens_used, extraction.tokens.estimated_tokens);

        let hits = engine.searcher().unwrap().search("hammer", None, 5);
        assert!(!hits.is_empty());
    }

    #[test]
    fn sections_list_by_document_category() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        std::fs::write(config.source_dir.join("glossary.md"), "## Body
The real part.
")
            .unwrap();
        let mut engine = Engine::new(config).unwrap();

        let all = engine.list(Category::Sections, None).unwrap();
        assert_eq!(all.len(), 3);

        let patterns = engine.list(Category::Sections, Some("Patterns")).unwrap();
        let ids: Vec<_> = patterns.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["patterns/hammer", "patterns/shooting-star"]);

        assert!(matches!(
            engine.list(Category::Examples, Some("patterns")).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn not_found_errors_carry_suggestions() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(config(tmp.path())).unwrap();
        let err = engine
            .extractor()
            .unwrap()
            .get_entity(EntityKind::Pattern, "hammr", false)
            .unwrap_err();

        let suggestions = engine.suggestions_for(&err);
        assert!(suggestions.iter().any(|s| s == "pat/hammer"), "{suggestions:?}");
        assert!(engine.suggestions_for(&Error::Config("x".into())).is_empty());
    }
}
