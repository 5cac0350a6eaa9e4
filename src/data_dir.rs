//! On-disk layout of a docslice data directory.
//!
//! ```text
//! <root>/
//!   index.json        persisted Index, replaced atomically on rebuild
//!   token_log.jsonl   append-only usage log
//!   raw/              default source tree when --source-dir is not given
//! ```

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment override for the data root.
pub const DATA_DIR_ENV: &str = "DOCSLICE_DATA_DIR";

const INDEX_FILE: &str = "index.json";
const USAGE_LOG_FILE: &str = "token_log.jsonl";
const SOURCES_DIR: &str = "raw";

/// A resolved, existing data root and the paths docslice keeps under it.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve and create the data root. An explicit path wins over
    /// [`DATA_DIR_ENV`], which wins over `$XDG_DATA_HOME/docslice`.
    ///
    /// Only the root is created. The `raw/` source tree is left to the
    /// user, so a missing one surfaces as "no source files" at build time.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => default_root()?,
        };

        std::fs::create_dir_all(&root).map_err(|_| Error::DataDir(root.clone()))?;
        tracing::debug!(root = %root.display(), "Using data directory");

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the index is loaded from and saved to.
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Token accounting log shared by CLI and MCP runs.
    pub fn usage_log(&self) -> PathBuf {
        self.root.join(USAGE_LOG_FILE)
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.root.join(SOURCES_DIR)
    }
}

fn default_root() -> Result<PathBuf> {
    if let Some(val) = std::env::var_os(DATA_DIR_ENV)
        && !val.is_empty()
    {
        return Ok(PathBuf::from(val));
    }
    xdg::BaseDirectories::with_prefix("docslice")
        .get_data_home()
        .ok_or_else(|| {
            Error::Config(format!(
                "no data directory: pass --data-dir, set {DATA_DIR_ENV}, or set HOME"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::profile::Profile;

    #[test]
    fn layout_lives_under_the_root() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        for path in [dir.index_path(), dir.usage_log(), dir.sources_dir()] {
            assert_eq!(path.parent(), Some(tmp.path()));
        }
        assert_eq!(dir.index_path().file_name().unwrap(), "index.json");
        assert_eq!(dir.usage_log().file_name().unwrap(), "token_log.jsonl");
        assert!(!dir.sources_dir().exists());
    }

    #[test]
    fn engine_config_defaults_to_the_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        let config = EngineConfig::from_data_dir(&dir, None, Profile::Generic, vec![]);
        assert_eq!(config.source_dir, dir.sources_dir());
        assert_eq!(config.index_path, dir.index_path());
        assert_eq!(config.usage_log, Some(dir.usage_log()));

        let elsewhere = tmp.path().join("docs");
        let config =
            EngineConfig::from_data_dir(&dir, Some(elsewhere.clone()), Profile::Generic, vec![]);
        assert_eq!(config.source_dir, elsewhere);
        assert_eq!(config.index_path, dir.index_path());
    }

    #[test]
    fn missing_root_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let dir = DataDir::resolve(Some(&nested)).unwrap();
        assert!(dir.root().is_dir());
    }

    #[test]
    fn uncreatable_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("file");
        std::fs::write(&file, "x").unwrap();
        let err = DataDir::resolve(Some(&file.join("sub"))).unwrap_err();
        assert!(matches!(err, Error::DataDir(_)));
    }
}
