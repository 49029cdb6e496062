//! Apply engine: push a directory of manifests into the cluster.
//!
//! Files are processed in file-name order, documents in textual
//! order. Every document is namespace-overridden (namespaced kinds only),
//! sanitized, optionally validated with a dry-run apply, then committed
//! with forced ownership under the [`FIELD_MANAGER`] identity.
//!
//! With dry-run enabled, all documents of a file are validated before any
//! of them is committed, so a rejected document leaves its file untouched.
//! A consequence: a document that depends on an earlier document of the same
//! file, such as an object inside a `Namespace` declared above it, fails its
//! dry-run against a real API server until the dependency exists. Put such
//! dependencies in an earlier file.
//! The first error aborts the run; the documents applied up to that point
//! are reported in the [`ApplyFailure`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::cancel::CancellationFlag;
use crate::cluster::{ClusterClient, PatchParams, Scope, FIELD_MANAGER};
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::manifest::{load_file, manifest_files, ManifestDocument};
use crate::redact;

/// Where manifests are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// Overrides the namespace of every namespaced document when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl TargetRef {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    fn override_namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Applied,
    DryRunFailed,
    ApplyFailed,
}

/// Per-document result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub outcome: Outcome,
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub file: PathBuf,
    /// 1-based document ordinal within `file`.
    pub document: usize,
}

impl ApplyResult {
    fn new(doc: &ManifestDocument, outcome: Outcome) -> Self {
        Self {
            outcome,
            api_version: doc.api_version.clone(),
            kind: doc.kind.clone(),
            name: doc.name().unwrap_or_default().to_string(),
            namespace: doc.namespace().map(str::to_string),
            file: doc.file.clone(),
            document: doc.index,
        }
    }
}

/// Successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub results: Vec<ApplyResult>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ApplyReport {
    pub fn applied(&self) -> usize {
        self.results.len()
    }
}

/// Aborted run: the error plus everything committed before it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ApplyFailure {
    #[source]
    pub error: SyncError,
    /// Documents committed before the failure, in order.
    pub applied: Vec<ApplyResult>,
    /// The document that failed, when the failure is tied to one.
    pub failed: Option<ApplyResult>,
}

impl From<ApplyFailure> for SyncError {
    fn from(failure: ApplyFailure) -> Self {
        failure.error
    }
}

type DocResult<T> = Result<T, (SyncError, Option<ApplyResult>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    DryRun,
    Commit,
}

pub struct ApplyEngine<'a> {
    client: &'a dyn ClusterClient,
    config: &'a EngineConfig,
    cancel: &'a CancellationFlag,
}

impl<'a> ApplyEngine<'a> {
    pub fn new(
        client: &'a dyn ClusterClient,
        config: &'a EngineConfig,
        cancel: &'a CancellationFlag,
    ) -> Self {
        Self {
            client,
            config,
            cancel,
        }
    }

    /// Applies every manifest under `source`.
    pub fn apply_all(&self, source: &Path, target: &TargetRef) -> Result<ApplyReport, ApplyFailure> {
        let started_at = Utc::now();
        let mut applied = Vec::new();

        let files = manifest_files(source).map_err(|error| ApplyFailure {
            error,
            applied: Vec::new(),
            failed: None,
        })?;

        for file in &files {
            let _span =
                info_span!("manifest_file", file = %redact::manifest_label(file, source)).entered();

            if let Err((error, failed)) = self.apply_file(file, source, target, &mut applied) {
                warn!(error = %error, "Sync aborted");
                return Err(ApplyFailure {
                    error,
                    applied,
                    failed,
                });
            }
        }

        Ok(ApplyReport {
            results: applied,
            dry_run: self.config.dry_run,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn apply_file(
        &self,
        file: &Path,
        root: &Path,
        target: &TargetRef,
        applied: &mut Vec<ApplyResult>,
    ) -> DocResult<()> {
        self.cancel.check().map_err(|e| (e, None))?;

        let mut documents = load_file(file).map_err(|e| (e, None))?;
        for doc in &mut documents {
            self.prepare(doc, target)?;
        }

        if self.config.dry_run {
            for doc in &documents {
                self.submit(doc, Phase::DryRun)?;
            }
        }

        for doc in &documents {
            self.submit(doc, Phase::Commit)?;

            let result = ApplyResult::new(doc, Outcome::Applied);
            info!(
                kind = %result.kind,
                name = %result.name,
                namespace = result.namespace.as_deref().unwrap_or(""),
                file = %redact::manifest_label(file, root),
                "Applied manifest"
            );
            applied.push(result);
        }

        Ok(())
    }

    /// Namespace override, then sanitization.
    fn prepare(&self, doc: &mut ManifestDocument, target: &TargetRef) -> DocResult<()> {
        if let Some(namespace) = target.override_namespace() {
            self.cancel.check().map_err(|e| (e, None))?;

            let scope = self.client.scope(&doc.type_meta()).map_err(|source| {
                (
                    SyncError::Resolve {
                        api_version: doc.api_version.clone(),
                        kind: doc.kind.clone(),
                        file: doc.file.clone(),
                        source,
                    },
                    None,
                )
            })?;

            if scope == Scope::Namespaced {
                doc.set_namespace(namespace);
            }
        }

        doc.sanitize();
        Ok(())
    }

    fn submit(&self, doc: &ManifestDocument, phase: Phase) -> DocResult<()> {
        self.cancel.check().map_err(|e| (e, None))?;

        let mut params = PatchParams::apply(FIELD_MANAGER).force();
        if phase == Phase::DryRun {
            params = params.dry_run();
        }

        match self.client.apply(&doc.to_value(), &params) {
            Ok(_) => {
                if phase == Phase::DryRun {
                    debug!(kind = %doc.kind, name = doc.name().unwrap_or(""), "Dry-run passed");
                }
                Ok(())
            }
            Err(source) => {
                let kind = doc.kind.clone();
                let name = doc.name().unwrap_or_default().to_string();
                let file = doc.file.clone();
                Err(match phase {
                    Phase::DryRun => (
                        SyncError::Validation {
                            kind,
                            name,
                            file,
                            source,
                        },
                        Some(ApplyResult::new(doc, Outcome::DryRunFailed)),
                    ),
                    Phase::Commit => (
                        SyncError::Apply {
                            kind,
                            name,
                            file,
                            source,
                        },
                        Some(ApplyResult::new(doc, Outcome::ApplyFailed)),
                    ),
                })
            }
        }
    }
}

/// Applies every manifest under `path` to `client`.
pub fn apply_target(
    client: &dyn ClusterClient,
    path: &Path,
    target: &TargetRef,
    config: &EngineConfig,
    cancel: &CancellationFlag,
) -> Result<ApplyReport, ApplyFailure> {
    let _span = info_span!(
        "apply_target",
        namespace = target.namespace.as_deref().unwrap_or(""),
        dry_run = config.dry_run
    )
    .entered();

    ApplyEngine::new(client, config, cancel).apply_all(path, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InMemoryCluster, TypeMeta};
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn config(dry_run: bool) -> EngineConfig {
        EngineConfig {
            dry_run,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_target_ref_blank_namespace_is_no_override() {
        assert_eq!(TargetRef::namespace("").override_namespace(), None);
        assert_eq!(TargetRef::default().override_namespace(), None);
        assert_eq!(TargetRef::namespace("ns").override_namespace(), Some("ns"));
    }

    #[test]
    fn test_applies_config_map_with_dry_run() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "cm.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: test-cm\ndata:\n  key: value\n",
        );
        let cluster = InMemoryCluster::new();

        let report = apply_target(
            &cluster,
            dir.path(),
            &TargetRef::namespace("default"),
            &config(true),
            &CancellationFlag::new(),
        )
        .unwrap();

        assert_eq!(report.applied(), 1);
        assert!(report.dry_run);
        assert_eq!(report.results[0].namespace.as_deref(), Some("default"));
        assert_eq!(report.results[0].document, 1);
        assert_eq!(cluster.dry_run_count(), 1);
        assert_eq!(cluster.commit_count(), 1);
    }

    #[test]
    fn test_dry_run_disabled_skips_validation() {
        let dir = TempDir::new().unwrap();
        write(&dir, "cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n");
        let cluster = InMemoryCluster::new();

        apply_target(
            &cluster,
            dir.path(),
            &TargetRef::default(),
            &config(false),
            &CancellationFlag::new(),
        )
        .unwrap();

        assert_eq!(cluster.dry_run_count(), 0);
        assert!(cluster
            .get(&TypeMeta::new("v1", "ConfigMap"), Some("default"), "a")
            .is_some());
    }

    #[test]
    fn test_unknown_kind_is_resolve_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, "w.yaml", "apiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: w\n");
        let cluster =
            InMemoryCluster::new().without_kind(TypeMeta::new("example.com/v1", "Widget"));

        let failure = apply_target(
            &cluster,
            dir.path(),
            &TargetRef::namespace("ns"),
            &config(true),
            &CancellationFlag::new(),
        )
        .unwrap_err();

        assert!(matches!(failure.error, SyncError::Resolve { .. }));
        assert!(failure.failed.is_none());
        assert_eq!(cluster.commit_count(), 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        write(&dir, "cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n");
        let cluster = InMemoryCluster::new();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let failure = apply_target(&cluster, dir.path(), &TargetRef::default(), &config(true), &cancel)
            .unwrap_err();

        assert!(matches!(failure.error, SyncError::Cancelled));
        assert!(cluster.is_empty());
    }

    #[test]
    fn test_failure_converts_to_sync_error() {
        let failure = ApplyFailure {
            error: SyncError::Cancelled,
            applied: Vec::new(),
            failed: None,
        };
        assert_eq!(failure.to_string(), "Sync cancelled");
        let err: SyncError = failure.into();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
