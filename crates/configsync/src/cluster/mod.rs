//! Target-system capabilities consumed by the sync engine.
//!
//! The engine never talks to an API server directly. It goes through two
//! narrow traits:
//! - [`ClusterClient`]: declarative apply (server-side apply) with dry-run,
//!   forced ownership and a field manager, plus resource scope lookup
//! - [`BundleReader`]: read a key/value bundle (a ConfigMap) by namespace + name
//!
//! Two implementations ship with the crate: [`RestClient`] for a real API
//! server and [`InMemoryCluster`] for tests and offline previews.

pub mod memory;
pub mod rest;

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use serde_json::Value;
use thiserror::Error;

pub use memory::{InMemoryCluster, ObjectKey};
pub use rest::{RestClient, RestConfig};

/// Field manager identity for every apply issued by the engine.
pub const FIELD_MANAGER: &str = "configsync";

/// A key/value bundle, keyed and iterated in sorted order.
pub type Bundle = BTreeMap<String, Vec<u8>>;

/// The `apiVersion` + `kind` pair identifying a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeMeta {
    pub api_version: String,
    pub kind: String,
}

impl TypeMeta {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Reads `apiVersion` and `kind` from a decoded object.
    pub fn from_object(object: &Value) -> Result<Self, ClusterError> {
        let field = |name: &str| {
            object
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ClusterError::InvalidObject(format!("missing {name}")))
        };
        Ok(Self {
            api_version: field("apiVersion")?,
            kind: field("kind")?,
        })
    }

    /// API group, empty for the core group (`v1`).
    pub fn group(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }
}

impl fmt::Display for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.api_version)
    }
}

/// Whether a resource type lives inside a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Parameters for a declarative apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchParams {
    /// Validate and simulate only; nothing is persisted.
    pub dry_run: bool,
    /// Take ownership of fields managed by other writers instead of failing.
    pub force: bool,
    /// Writer identity recorded as owner of the applied fields.
    pub field_manager: String,
}

impl PatchParams {
    pub fn apply(field_manager: impl Into<String>) -> Self {
        Self {
            dry_run: false,
            force: false,
            field_manager: field_manager.into(),
        }
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Errors reported by a cluster backend.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("API server rejected the request ({code} {reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("resource type {0} is not served by the API server")]
    UnknownKind(TypeMeta),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("client configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    /// Returns true for failures that may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Transport(_) => true,
            ClusterError::Api { code, .. } => matches!(code, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ClusterError::Api {
            code: 422,
            reason: "Invalid".to_string(),
            message: message.into(),
        }
    }
}

/// Declarative-mutation capability against the target system.
pub trait ClusterClient {
    /// Scope of a resource type as served by the target system.
    fn scope(&self, type_meta: &TypeMeta) -> Result<Scope, ClusterError>;

    /// Server-side apply `object`, returning the object as the server sees it.
    fn apply(&self, object: &Value, params: &PatchParams) -> Result<Value, ClusterError>;
}

/// Key/value bundle read capability.
pub trait BundleReader {
    fn read_bundle(&self, namespace: &str, name: &str) -> Result<Bundle, ClusterError>;
}

pub(crate) fn object_name(object: &Value) -> Result<&str, ClusterError> {
    object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ClusterError::InvalidObject("metadata.name is required".to_string()))
}

pub(crate) fn object_namespace(object: &Value) -> Option<&str> {
    object
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Collects `data` and base64-decoded `binaryData` of a ConfigMap.
pub(crate) fn bundle_from_config_map(config_map: &Value) -> Result<Bundle, ClusterError> {
    let mut bundle = Bundle::new();

    if let Some(data) = config_map.get("data").and_then(Value::as_object) {
        for (key, value) in data {
            let text = value.as_str().ok_or_else(|| {
                ClusterError::InvalidObject(format!("data key '{key}' is not a string"))
            })?;
            bundle.insert(key.clone(), text.as_bytes().to_vec());
        }
    }

    if let Some(binary) = config_map.get("binaryData").and_then(Value::as_object) {
        for (key, value) in binary {
            let encoded = value.as_str().ok_or_else(|| {
                ClusterError::InvalidObject(format!("binaryData key '{key}' is not a string"))
            })?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| {
                    ClusterError::InvalidObject(format!("binaryData key '{key}': {e}"))
                })?;
            if bundle.insert(key.clone(), bytes).is_some() {
                return Err(ClusterError::InvalidObject(format!(
                    "key '{key}' is present in both data and binaryData"
                )));
            }
        }
    }

    Ok(bundle)
}
