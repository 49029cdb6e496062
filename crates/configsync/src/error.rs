//! Error types for source resolution and apply.

use std::path::PathBuf;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::source::credentials::CredentialError;

/// Errors surfaced by the two engine entry points.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unsupported source: {0}")]
    SourceUnsupported(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to read source '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Cannot resolve {kind} ({api_version}) from '{file}': {source}")]
    Resolve {
        api_version: String,
        kind: String,
        file: PathBuf,
        #[source]
        source: ClusterError,
    },

    #[error("Dry-run failed for {kind} '{name}' from '{file}': {source}")]
    Validation {
        kind: String,
        name: String,
        file: PathBuf,
        #[source]
        source: ClusterError,
    },

    #[error("Failed to apply {kind} '{name}' from '{file}': {source}")]
    Apply {
        kind: String,
        name: String,
        file: PathBuf,
        #[source]
        source: ClusterError,
    },

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true if retrying the whole sync unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Fetch(e) => e.is_retryable(),
            SyncError::Resolve { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Errors from the content fetchers.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Git authentication failed: {0}")]
    Auth(String),

    #[error("Revision '{revision}' not found in {repo}")]
    RevisionNotFound { repo: String, revision: String },

    #[error("Git network error: {0}")]
    Network(String),

    #[error("ConfigMap '{namespace}/{name}' not found")]
    BundleNotFound { namespace: String, name: String },

    #[error("Bundle key '{0}' is not a valid file name")]
    InvalidBundleKey(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Failed to read bundle: {0}")]
    Cluster(#[source] ClusterError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Returns true if the error is likely transient and the fetch can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::Cluster(e) => e.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A malformed manifest document. `index` is the 1-based ordinal of the
/// document among the non-empty documents of the file.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("'{path}' is not valid UTF-8")]
    NotUtf8 { path: PathBuf },

    #[error("Failed to parse YAML in '{path}' (document {index}): {message}")]
    Yaml {
        path: PathBuf,
        index: usize,
        message: String,
    },

    #[error("Document {index} in '{path}' is not a mapping")]
    NotAMapping { path: PathBuf, index: usize },

    #[error("Document {index} in '{path}' is missing '{field}'")]
    MissingField {
        path: PathBuf,
        index: usize,
        field: &'static str,
    },
}

impl DecodeError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            DecodeError::NotUtf8 { path }
            | DecodeError::Yaml { path, .. }
            | DecodeError::NotAMapping { path, .. }
            | DecodeError::MissingField { path, .. } => path,
        }
    }
}

/// Errors loading [`EngineConfig`](crate::config::EngineConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value '{value}' for {name}")]
    InvalidEnv { name: String, value: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Classifies git stderr into a specific fetch error.
pub fn classify_git_error(stderr: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
        || lower.contains("could not read password")
        || lower.contains("repository not found")
        || lower.contains("host key verification failed")
    {
        return FetchError::Auth(message);
    }

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return FetchError::Network(message);
    }

    FetchError::Git(message)
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network() {
        let err = classify_git_error(
            "fatal: unable to access 'https://example.invalid/repo.git/': Could not resolve host",
        );
        assert!(matches!(err, FetchError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_auth() {
        let err = classify_git_error(
            "fatal: could not read Username for 'https://github.com': terminal prompts disabled",
        );
        assert!(matches!(err, FetchError::Auth(_)));
        assert!(!err.is_retryable());

        let err = classify_git_error("git@github.com: Permission denied (publickey).");
        assert!(matches!(err, FetchError::Auth(_)));
    }

    #[test]
    fn test_auth_wins_over_unable_to_access() {
        let err = classify_git_error(
            "fatal: unable to access 'https://host/repo/': Authentication failed",
        );
        assert!(matches!(err, FetchError::Auth(_)));
    }

    #[test]
    fn test_classify_generic() {
        let err = classify_git_error("fatal: not a git repository\n");
        match err {
            FetchError::Git(msg) => assert_eq!(msg, "fatal: not a git repository"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sync_error_retryable() {
        let network: SyncError = FetchError::Network("reset".into()).into();
        assert!(network.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::SourceUnsupported("none".into()).is_retryable());
    }

    #[test]
    fn test_decode_error_context() {
        let err = DecodeError::MissingField {
            path: PathBuf::from("/src/app.yaml"),
            index: 2,
            field: "kind",
        };
        assert_eq!(err.path(), std::path::Path::new("/src/app.yaml"));
        assert_eq!(
            err.to_string(),
            "Document 2 in '/src/app.yaml' is missing 'kind'"
        );
    }
}
