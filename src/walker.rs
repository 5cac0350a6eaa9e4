use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// Include pattern used when none is configured.
pub const DEFAULT_INCLUDE: &str = "*.md";

/// A discovered source document.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the source root, always `/` separated.
    pub relative_path: String,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

impl SourceFile {
    /// File name without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.relative_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.relative_path)
    }
}

/// Compile include globs. Patterns without a `/` match the file name only.
pub fn build_includes(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    if patterns.is_empty() {
        builder.add(glob(DEFAULT_INCLUDE)?);
    }
    for pattern in patterns {
        builder.add(glob(pattern)?);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid include patterns: {e}")))
}

fn glob(pattern: &str) -> Result<Glob> {
    Glob::new(pattern)
        .map_err(|e| Error::Config(format!("invalid glob '{pattern}': {e}")))
}

/// Recursively discover source documents under `root`.
///
/// Skips hidden entries and files whose name starts with `_`. A file is
/// kept when its name or its relative path matches `includes`. Results
/// are sorted by relative path.
pub fn discover_files(root: &Path, includes: &GlobSet) -> Result<Vec<SourceFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, includes, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    includes: &GlobSet,
    results: &mut Vec<SourceFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, includes, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            // Directory links are not followed, and file links must stay
            // inside the root.
            if resolved.is_file()
                && resolved.starts_with(root)
                && let Some(file) = make_source(root, &path, &resolved, includes)
            {
                results.push(file);
            }
        } else if file_type.is_file()
            && let Some(file) = make_source(root, &path, &path, includes)
        {
            results.push(file);
        }
    }

    Ok(())
}

fn make_source(
    root: &Path,
    original: &Path,
    resolved: &Path,
    includes: &GlobSet,
) -> Option<SourceFile> {
    let name = original.file_name()?.to_str()?;
    if name.starts_with('_') {
        return None;
    }

    let relative = original.strip_prefix(root).ok()?;
    let relative_path = to_slash(relative);
    if !includes.is_match(name) && !includes.is_match(&relative_path) {
        return None;
    }

    Some(SourceFile {
        relative_path,
        absolute_path: resolved.to_path_buf(),
    })
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
