use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use geojson::{JsonObject, JsonValue};
use tempfile::NamedTempFile;

/// How a document is serialized when it is written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Single line, no extra whitespace.
    #[default]
    Compact,
    /// Indented, one member per line.
    Pretty,
}

/// Errors raised while loading a document.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read file")]
    Io(#[from] io::Error),
    #[error("file is not well-formed JSON")]
    Json(#[from] serde_json::Error),
    #[error("top level of the document is not a JSON object")]
    NotAnObject,
    #[error("document has no `features` array")]
    MissingFeatures,
}

/// Errors raised while writing a document.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed to write temporary file")]
    Io(#[from] io::Error),
    #[error("failed to serialize document")]
    Json(#[from] serde_json::Error),
    #[error("failed to replace target file")]
    Persist(#[source] io::Error),
}

/// A GeoJSON document held as a raw JSON object.
///
/// Only the `features` member is ever touched. Every other member keeps its
/// value and its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    object: JsonObject,
}

impl Document {
    pub fn from_value(value: JsonValue) -> Result<Self, LoadError> {
        let JsonValue::Object(object) = value else {
            return Err(LoadError::NotAnObject);
        };
        match object.get("features") {
            Some(JsonValue::Array(_)) => Ok(Self { object }),
            _ => Err(LoadError::MissingFeatures),
        }
    }

    /// Moves the feature entries out, leaving an empty list behind.
    pub fn take_features(&mut self) -> Vec<JsonValue> {
        match self.object.get_mut("features") {
            Some(JsonValue::Array(features)) => std::mem::take(features),
            _ => Vec::new(),
        }
    }

    pub fn replace_features(&mut self, features: Vec<JsonObject>) {
        let features = features.into_iter().map(JsonValue::Object).collect();
        self.object
            .insert("features".to_string(), JsonValue::Array(features));
    }

    pub fn as_object(&self) -> &JsonObject {
        &self.object
    }
}

// Reads and parses a UTF-8 GeoJSON document
pub fn load(path: &Path) -> Result<Document, LoadError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let value: JsonValue = serde_json::from_reader(reader)?;
    Document::from_value(value)
}

/// Writes `document` to `path`.
///
/// The bytes go to a temporary file next to `path` first, which is then
/// renamed over the target. If anything fails the target is left as it was
/// and the temporary file is removed. An existing target keeps its
/// permissions, and a symlinked target is written through the link.
pub fn write(document: &Document, path: &Path, format: OutputFormat) -> Result<(), WriteError> {
    let path = resolve_target(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;

    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        match format {
            OutputFormat::Compact => serde_json::to_writer(&mut writer, document.as_object())?,
            OutputFormat::Pretty => serde_json::to_writer_pretty(&mut writer, document.as_object())?,
        }
        writer.flush()?;
    }

    match fs::metadata(&path) {
        Ok(existing) => temp.as_file().set_permissions(existing.permissions())?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    temp.as_file().sync_all()?;

    // Dropping the returned file removes it from disk.
    temp.persist(&path)
        .map_err(|err| WriteError::Persist(err.error))?;
    Ok(())
}

// Follows symlinks so the rename replaces the file they point at
fn resolve_target(path: &Path) -> io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(err) => Err(err),
    }
}
