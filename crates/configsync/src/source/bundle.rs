//! ConfigMap content fetcher.
//!
//! Materializes every key of a ConfigMap as a file in a fresh temporary
//! directory and fingerprints the bundle with SHA-256.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::ResolvedSnapshot;
use crate::cancel::CancellationFlag;
use crate::cluster::{Bundle, BundleReader, ClusterError};
use crate::error::{FetchError, SyncError};

/// `description` of snapshots fetched from a ConfigMap.
pub const CONFIG_OBJECT_DESCRIPTION: &str = "configmap";

/// Deterministic fingerprint of a bundle: SHA-256 over the key-sorted
/// entries, each framed as `len(key) key len(value) value` with 8-byte
/// big-endian lengths. 64 lowercase hex characters.
pub fn content_identity(bundle: &Bundle) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in bundle {
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value);
    }
    hex::encode(hasher.finalize())
}

/// Rejects keys that would not stay a single file inside the snapshot.
pub fn validate_key(key: &str) -> Result<(), FetchError> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\', '\0']) {
        return Err(FetchError::InvalidBundleKey(key.to_string()));
    }
    Ok(())
}

/// Writes each entry of `bundle` to `dir/<key>`.
pub fn write_bundle(dir: &Path, bundle: &Bundle) -> Result<(), FetchError> {
    for (key, value) in bundle {
        let path = dir.join(key);
        std::fs::write(&path, value).map_err(|e| FetchError::io(path, e))?;
    }
    Ok(())
}

pub struct BundleFetcher<'a> {
    reader: &'a dyn BundleReader,
    cancel: &'a CancellationFlag,
}

impl<'a> BundleFetcher<'a> {
    pub fn new(reader: &'a dyn BundleReader, cancel: &'a CancellationFlag) -> Self {
        Self { reader, cancel }
    }

    /// Reads `namespace/name` into a new temporary directory owned by the caller.
    pub fn fetch(&self, namespace: &str, name: &str) -> Result<ResolvedSnapshot, SyncError> {
        self.cancel.check()?;

        let bundle = self
            .reader
            .read_bundle(namespace, name)
            .map_err(|e| match e {
                ClusterError::NotFound { .. } => FetchError::BundleNotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
                other => FetchError::Cluster(other),
            })?;

        for key in bundle.keys() {
            validate_key(key)?;
        }

        let dir = snapshot_dir();
        std::fs::create_dir(&dir).map_err(|e| FetchError::io(&dir, e))?;
        if let Err(e) = write_bundle(&dir, &bundle) {
            let _ = std::fs::remove_dir_all(&dir);
            return Err(e.into());
        }

        let identity = content_identity(&bundle);
        tracing::debug!(
            namespace,
            name,
            keys = bundle.len(),
            identity = %identity,
            "Materialized ConfigMap"
        );

        Ok(ResolvedSnapshot {
            identity,
            local_path: dir,
            description: CONFIG_OBJECT_DESCRIPTION.to_string(),
        })
    }
}

fn snapshot_dir() -> PathBuf {
    std::env::temp_dir().join(format!("configsync-{}", uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(entries: &[(&str, &str)]) -> Bundle {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_identity_is_64_hex() {
        let id = content_identity(&bundle(&[("a.txt", "hello"), ("b.txt", "world")]));
        assert_eq!(id.len(), 64);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn test_identity_of_empty_bundle() {
        assert_eq!(
            content_identity(&Bundle::new()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_identity_framing_prevents_ambiguity() {
        let a = content_identity(&bundle(&[("ab", "c")]));
        let b = content_identity(&bundle(&[("a", "bc")]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_changes_with_value() {
        let a = content_identity(&bundle(&[("k", "v1")]));
        let b = content_identity(&bundle(&[("k", "v2")]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("app.yaml").is_ok());
        assert!(validate_key(".hidden").is_ok());
        for bad in ["", ".", "..", "a/b", "..\\x", "../etc"] {
            assert!(
                matches!(validate_key(bad), Err(FetchError::InvalidBundleKey(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
