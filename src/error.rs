use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no source documents found in {0}")]
    NoSourceFiles(PathBuf),

    #[error("index not found: {0}")]
    IndexNotFound(PathBuf),

    #[error("corrupt index {path}: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error(
        "invalid index field '{field}': expected {expected}, got {found}"
    )]
    InvalidIndexField {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{kind} not found: {name}")]
    EntryNotFound { kind: &'static str, name: String },

    #[error("path traversal blocked: {0}")]
    PathTraversal(String),

    #[error("byte_offset {offset} out of range for {source_file} ({size} bytes)")]
    Range {
        source_file: String,
        offset: u64,
        size: u64,
    },

    #[error("source file not found: {0}")]
    SourceMissing(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Whether a query layer should answer this error by rebuilding the
    /// index from sources.
    pub fn is_rebuildable(&self) -> bool {
        matches!(
            self,
            Error::IndexNotFound(_)
                | Error::IndexCorrupt { .. }
                | Error::InvalidIndexField { .. }
        )
    }
}
