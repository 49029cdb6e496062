//! Source resolution: turn a declared source into a local snapshot.

pub mod bundle;
pub mod credentials;
pub mod git;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use self::bundle::BundleFetcher;
use self::credentials::{AuthMethod, CredentialResolver, SecretRef};
use self::git::{GitFetcher, GitSource};
use crate::cancel::CancellationFlag;
use crate::cluster::BundleReader;
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::redact;

/// Where manifests come from. Exactly one kind per source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Git(GitSource),
    ConfigObject { namespace: String, name: String },
}

/// Result of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSnapshot {
    /// Commit id for git, content digest for ConfigMaps.
    pub identity: String,
    /// Directory of manifest files. Owned by the caller; never cleaned up
    /// by the resolver.
    pub local_path: PathBuf,
    /// Commit message for git, a fixed marker otherwise.
    pub description: String,
}

/// Source block as written in a sync resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ObjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitDeclaration {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub auth_secret_ref: Option<SecretRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl TryFrom<SourceDeclaration> for SourceSpec {
    type Error = SyncError;

    fn try_from(decl: SourceDeclaration) -> Result<Self, Self::Error> {
        match (decl.git, decl.config_map) {
            (Some(_), Some(_)) => Err(SyncError::SourceUnsupported(
                "both git and configMap are set; declare exactly one".to_string(),
            )),
            (None, None) => Err(SyncError::SourceUnsupported(
                "no source declared; set git or configMap".to_string(),
            )),
            (Some(git), None) => {
                if git.repo_url.trim().is_empty() {
                    return Err(SyncError::SourceUnsupported(
                        "git.repoURL is empty".to_string(),
                    ));
                }
                Ok(SourceSpec::Git(GitSource {
                    repo_url: git.repo_url,
                    revision: git.revision,
                    branch: git.branch,
                    auth_method: git.auth_method,
                    auth_secret_ref: git.auth_secret_ref,
                }))
            }
            (None, Some(object)) => {
                if object.namespace.is_empty() || object.name.is_empty() {
                    return Err(SyncError::SourceUnsupported(
                        "configMap needs both namespace and name".to_string(),
                    ));
                }
                Ok(SourceSpec::ConfigObject {
                    namespace: object.namespace,
                    name: object.name,
                })
            }
        }
    }
}

/// Dispatches a [`SourceSpec`] to its content fetcher.
pub struct SourceResolver<'a> {
    bundles: &'a dyn BundleReader,
    credentials: &'a dyn CredentialResolver,
    config: &'a EngineConfig,
    cancel: &'a CancellationFlag,
}

impl<'a> SourceResolver<'a> {
    pub fn new(
        bundles: &'a dyn BundleReader,
        credentials: &'a dyn CredentialResolver,
        config: &'a EngineConfig,
        cancel: &'a CancellationFlag,
    ) -> Self {
        Self {
            bundles,
            credentials,
            config,
            cancel,
        }
    }

    pub fn resolve(&self, spec: &SourceSpec) -> Result<ResolvedSnapshot, SyncError> {
        self.cancel.check()?;

        match spec {
            SourceSpec::Git(source) => {
                let _span = tracing::info_span!(
                    "fetch_source",
                    kind = "git",
                    repo = %redact::repo_url(&source.repo_url)
                )
                .entered();
                GitFetcher::new(self.credentials, &self.config.cache_dir, self.cancel)
                    .fetch(source)
            }
            SourceSpec::ConfigObject { namespace, name } => {
                let _span = tracing::info_span!(
                    "fetch_source",
                    kind = "configmap",
                    namespace = %namespace,
                    name = %name
                )
                .entered();
                BundleFetcher::new(self.bundles, self.cancel).fetch(namespace, name)
            }
        }
    }

    /// Validates a declaration and resolves it.
    pub fn resolve_declaration(
        &self,
        declaration: &SourceDeclaration,
    ) -> Result<ResolvedSnapshot, SyncError> {
        let spec = SourceSpec::try_from(declaration.clone())?;
        self.resolve(&spec)
    }
}

/// Fetches `spec` into a local snapshot.
pub fn fetch_source(
    spec: &SourceSpec,
    bundles: &dyn BundleReader,
    credentials: &dyn CredentialResolver,
    config: &EngineConfig,
    cancel: &CancellationFlag,
) -> Result<ResolvedSnapshot, SyncError> {
    SourceResolver::new(bundles, credentials, config, cancel).resolve(spec)
}
