//! Git content fetcher.

pub mod auth;
pub mod parse;
pub mod repository;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use self::auth::build_auth_env;
use self::parse::is_safe_ref_name;
use self::repository::GitRepository;
use super::credentials::{AuthMethod, CredentialResolver, SecretRef};
use super::ResolvedSnapshot;
use crate::cancel::CancellationFlag;
use crate::error::{FetchError, SyncError};
use crate::redact;

/// A git repository source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    pub repo_url: String,
    /// Exact commit, tag or ref. Wins over `branch` when both are set.
    pub revision: Option<String>,
    pub branch: Option<String>,
    pub auth_method: AuthMethod,
    pub auth_secret_ref: Option<SecretRef>,
}

impl GitSource {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            revision: None,
            branch: None,
            auth_method: AuthMethod::None,
            auth_secret_ref: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_auth(mut self, method: AuthMethod, secret_ref: Option<SecretRef>) -> Self {
        self.auth_method = method;
        self.auth_secret_ref = secret_ref;
        self
    }

    pub fn target(&self) -> GitRef {
        GitRef::select(self.revision.as_deref(), self.branch.as_deref())
    }
}

/// What to check out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    Revision(String),
    Branch(String),
    DefaultBranch,
}

impl GitRef {
    /// Revision beats branch; with neither set the remote's default branch
    /// is used. Blank values count as unset.
    pub fn select(revision: Option<&str>, branch: Option<&str>) -> Self {
        let revision = revision.map(str::trim).filter(|r| !r.is_empty());
        let branch = branch.map(str::trim).filter(|b| !b.is_empty());

        match (revision, branch) {
            (Some(revision), Some(branch)) => {
                log::warn!(
                    "Both revision '{}' and branch '{}' are set, using the revision",
                    revision,
                    branch
                );
                GitRef::Revision(revision.to_string())
            }
            (Some(revision), None) => GitRef::Revision(revision.to_string()),
            (None, Some(branch)) => GitRef::Branch(branch.to_string()),
            (None, None) => GitRef::DefaultBranch,
        }
    }
}

/// Cache location for `url`: one directory per repository URL.
pub fn cache_path(cache_dir: &Path, url: &str) -> PathBuf {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    cache_dir.join(&digest[..16])
}

/// Clone-or-update fetcher backed by a local cache directory.
pub struct GitFetcher<'a> {
    credentials: &'a dyn CredentialResolver,
    cache_dir: &'a Path,
    cancel: &'a CancellationFlag,
}

impl<'a> GitFetcher<'a> {
    pub fn new(
        credentials: &'a dyn CredentialResolver,
        cache_dir: &'a Path,
        cancel: &'a CancellationFlag,
    ) -> Self {
        Self {
            credentials,
            cache_dir,
            cancel,
        }
    }

    pub fn fetch(&self, source: &GitSource) -> Result<ResolvedSnapshot, SyncError> {
        let repo_label = redact::repo_url(&source.repo_url);
        let target = source.target();

        if let GitRef::Revision(name) | GitRef::Branch(name) = &target {
            if !is_safe_ref_name(name) {
                return Err(FetchError::RevisionNotFound {
                    repo: repo_label,
                    revision: name.clone(),
                }
                .into());
            }
        }

        let credentials = self
            .credentials
            .resolve(source.auth_method, source.auth_secret_ref.as_ref())
            .map_err(FetchError::from)?;
        let auth = build_auth_env(&credentials)?;

        let path = cache_path(self.cache_dir, &source.repo_url);
        let repo = GitRepository::new(&path, self.cancel).with_auth(&auth);

        if repo.is_git_repo() {
            log::debug!("Updating cached clone of {}", repo_label);
            repo.update(&source.repo_url)?;
        } else {
            log::info!("Cloning {}", repo_label);
            repo.clone_from(&source.repo_url)?;
        }

        let commit = repo.resolve(&target, &repo_label)?;
        repo.checkout(&commit)?;
        let description = repo.head_message()?;

        drop(auth);

        log::info!("Checked out {} at {}", repo_label, commit);
        Ok(ResolvedSnapshot {
            identity: commit,
            local_path: path,
            description,
        })
    }
}
