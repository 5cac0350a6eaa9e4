//! Validated load and atomic save of the persisted [`Index`].

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    schema::Index,
};

/// Expected JSON shape of a recognised top-level field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    String,
    Object,
}

impl Shape {
    fn name(self) -> &'static str {
        match self {
            Shape::String => "string",
            Shape::Object => "object",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Shape::String => value.is_string(),
            Shape::Object => value.is_object(),
        }
    }
}

/// Recognised top-level fields. Anything else is ignored on load.
const FIELDS: &[(&str, Shape)] = &[
    ("version", Shape::String),
    ("generated_at", Shape::String),
    ("source_hash", Shape::String),
    ("sections", Shape::Object),
    ("entities", Shape::Object),
    ("examples", Shape::Object),
    ("tags", Shape::Object),
    ("authors", Shape::Object),
    ("stats", Shape::Object),
];

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Index {
    /// Write the index as pretty JSON, replacing `path` atomically.
    ///
    /// Parent directories are created as needed. The document is written
    /// to a sibling temporary file first and renamed over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        let result = (|| -> Result<()> {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, self)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    /// Load and validate a persisted index.
    ///
    /// A missing file is [`Error::IndexNotFound`]. Unparsable JSON or a
    /// non-object document is [`Error::IndexCorrupt`]. A recognised field
    /// of the wrong JSON type is [`Error::InvalidIndexField`]. Unknown
    /// fields are ignored.
    pub fn load(path: &Path) -> Result<Index> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::IndexNotFound(path.to_path_buf()));
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(corrupt(path, "index is not valid UTF-8"));
            }
            Err(e) => return Err(e.into()),
        };

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| corrupt(path, e.to_string()))?;
        Index::from_value(value).map_err(|e| match e {
            Error::Json(e) => corrupt(path, e.to_string()),
            Error::Config(reason) => corrupt(path, reason),
            other => other,
        })
    }

    /// Validate and convert an already parsed document.
    pub fn from_value(value: Value) -> Result<Index> {
        let Value::Object(mut object) = value else {
            return Err(Error::Config(format!(
                "top-level value is {}, expected object",
                json_type(&value)
            )));
        };

        let mut known = Map::new();
        for &(field, shape) in FIELDS {
            let Some(value) = object.remove(field) else {
                continue;
            };
            if !shape.accepts(&value) {
                return Err(Error::InvalidIndexField {
                    field: field.to_string(),
                    expected: shape.name(),
                    found: json_type(&value),
                });
            }
            known.insert(field.to_string(), value);
        }

        if !object.is_empty() {
            tracing::debug!(
                fields = ?object.keys().collect::<Vec<_>>(),
                "Ignoring unknown index fields"
            );
        }

        Ok(serde_json::from_value(Value::Object(known))?)
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> Error {
    Error::IndexCorrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{indexer::build, profile::Profile};

    fn sample_index() -> Index {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("single-reversal.md"),
            "# Candles\n## Hammer\nBullish.\n```pine\nplot(close)\n```\n## Doji\nIndecision.\n",
        )
        .unwrap();
        build(tmp.path(), Profile::Candlestick).unwrap()
    }

    #[test]
    fn round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("index.json");
        let index = sample_index();

        index.save(&path).unwrap();
        assert!(!path.with_file_name("index.json.tmp").exists());
        let loaded = Index::load(&path).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn save_replaces_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(&path, "stale").unwrap();

        Index::default().save(&path).unwrap();
        assert_eq!(Index::load(&path).unwrap(), Index::default());
    }

    #[test]
    fn missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Index::load(&tmp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
        assert!(err.is_rebuildable());
    }

    #[test]
    fn unparsable_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Index::load(&path).unwrap_err(),
            Error::IndexCorrupt { .. }
        ));
    }

    #[test]
    fn non_object_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let err = Index::load(&path).unwrap_err();
        match err {
            Error::IndexCorrupt { reason, .. } => {
                assert!(reason.contains("array"), "{reason}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wrong_field_type_is_rejected() {
        let err = Index::from_value(json!({ "sections": [] })).unwrap_err();
        match err {
            Error::InvalidIndexField {
                field,
                expected,
                found,
            } => {
                assert_eq!(field, "sections");
                assert_eq!(expected, "object");
                assert_eq!(found, "array");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = Index::from_value(json!({ "version": 1 })).unwrap_err();
        assert!(matches!(err, Error::InvalidIndexField { .. }));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let index = Index::from_value(json!({
            "version": "1.0.0",
            "source_hash": "abc",
            "__class__": "evil",
            "patterns": { "x": 1 }
        }))
        .unwrap();
        assert_eq!(index.source_hash, "abc");
        assert!(index.sections.is_empty());
    }

    #[test]
    fn bad_record_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.json");
        let doc = json!({
            "sections": {
                "a": { "id": "a", "title": "A", "level": 1,
                       "source_file": "a.md", "byte_offset": -5,
                       "byte_length": 1, "category": "a" }
            }
        });
        std::fs::write(&path, doc.to_string()).unwrap();
        assert!(matches!(
            Index::load(&path).unwrap_err(),
            Error::IndexCorrupt { .. }
        ));
    }
}
