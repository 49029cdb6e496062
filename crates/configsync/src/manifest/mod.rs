//! Manifest files: directory scan, multi-document decoding and sanitization.

mod decode;
mod sanitize;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::cluster::TypeMeta;
use crate::error::SyncError;

pub use decode::{decode, is_separator, Documents, Segments};
pub use sanitize::{sanitize, SERVER_METADATA_FIELDS};

/// One decoded document from a manifest file.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDocument {
    pub api_version: String,
    pub kind: String,
    /// File the document was read from.
    pub file: PathBuf,
    /// 1-based ordinal among the file's non-empty documents.
    pub index: usize,
    pub object: Map<String, Value>,
}

impl ManifestDocument {
    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta::new(&self.api_version, &self.kind)
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata_str("name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }

    /// Overrides `metadata.namespace`, creating `metadata` if absent.
    pub fn set_namespace(&mut self, namespace: &str) {
        let metadata = self
            .object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        if let Value::Object(metadata) = metadata {
            metadata.insert(
                "namespace".to_string(),
                Value::String(namespace.to_string()),
            );
        }
    }

    pub fn sanitize(&mut self) {
        sanitize(&mut self.object);
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.object.clone())
    }

    fn metadata_str(&self, field: &str) -> Option<&str> {
        self.object
            .get("metadata")?
            .get(field)?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

/// Lists the `.yaml`/`.yml` files directly inside `dir`, sorted by file
/// name. Subdirectories are not descended into.
pub fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            SyncError::ReadSource { path, source }
        })?;

        let path = entry.path();
        if path.is_file() && has_manifest_extension(path) {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

fn has_manifest_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Reads a manifest file and eagerly decodes all of its documents.
pub fn load_file(path: &Path) -> Result<Vec<ManifestDocument>, SyncError> {
    let bytes = std::fs::read(path).map_err(|e| SyncError::ReadSource {
        path: path.to_path_buf(),
        source: e,
    })?;

    decode(path, &bytes)
        .collect::<Result<Vec<_>, _>>()
        .map_err(SyncError::from)
}
