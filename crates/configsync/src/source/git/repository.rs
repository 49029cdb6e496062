//! Cached working copy of a remote repository.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::auth::AuthEnv;
use super::parse::{
    format_git_error, is_safe_ref_name, is_unknown_revision, parse_commit_message, parse_object_id,
};
use super::GitRef;
use crate::cancel::CancellationFlag;
use crate::error::{classify_git_error, FetchError, SyncError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A git working copy driven through the `git` CLI.
///
/// Every command runs with the auth environment attached and can be
/// interrupted through the cancellation flag.
pub struct GitRepository<'a> {
    repo_path: PathBuf,
    env: Vec<(String, String)>,
    cancel: &'a CancellationFlag,
}

impl<'a> GitRepository<'a> {
    pub fn new(repo_path: impl Into<PathBuf>, cancel: &'a CancellationFlag) -> Self {
        Self {
            repo_path: repo_path.into(),
            env: Vec::new(),
            cancel,
        }
    }

    pub fn with_auth(mut self, auth: &AuthEnv) -> Self {
        self.env = auth.env_vars.clone();
        self
    }

    pub fn is_git_repo(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    /// Clones `url` without checking out a working tree.
    pub fn clone_from(&self, url: &str) -> Result<(), SyncError> {
        if self.repo_path.exists() {
            std::fs::remove_dir_all(&self.repo_path)
                .map_err(|e| FetchError::io(&self.repo_path, e))?;
        }
        if let Some(parent) = self.repo_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }

        let path = self.repo_path.to_string_lossy();
        let mut cmd = self.command(None);
        cmd.args(["clone", "--no-checkout", "--", url, path.as_ref()]);
        self.run_checked(cmd)?;
        Ok(())
    }

    /// Points `origin` at `url` and fetches all branches and tags.
    pub fn update(&self, url: &str) -> Result<(), SyncError> {
        self.git(&["remote", "set-url", "origin", url])?;
        self.git(&["fetch", "--prune", "--prune-tags", "--tags", "--force", "origin"])?;
        Ok(())
    }

    /// Resolves `target` to a commit id, fetching it explicitly once if the
    /// regular fetch did not bring it in.
    pub fn resolve(&self, target: &GitRef, repo_label: &str) -> Result<String, SyncError> {
        match target {
            GitRef::DefaultBranch => {
                self.git(&["remote", "set-head", "origin", "--auto"])
                    .map_err(|e| self.not_found(e, repo_label, "HEAD"))?;
                self.rev_parse(&["refs/remotes/origin/HEAD"])?
                    .ok_or_else(|| self.missing(repo_label, "HEAD"))
            }
            GitRef::Branch(branch) | GitRef::Revision(branch) if !is_safe_ref_name(branch) => {
                Err(self.missing(repo_label, branch))
            }
            GitRef::Branch(branch) => {
                let remote_ref = format!("refs/remotes/origin/{branch}");
                if let Some(id) = self.rev_parse(&[&remote_ref])? {
                    return Ok(id);
                }
                let refspec = format!("+refs/heads/{branch}:{remote_ref}");
                self.git(&["fetch", "origin", "--", &refspec])
                    .map_err(|e| self.not_found(e, repo_label, branch))?;
                self.rev_parse(&[&remote_ref])?
                    .ok_or_else(|| self.missing(repo_label, branch))
            }
            GitRef::Revision(revision) => {
                let remote_ref = format!("refs/remotes/origin/{revision}");
                let tag_ref = format!("refs/tags/{revision}");
                let candidates = [remote_ref.as_str(), tag_ref.as_str(), revision.as_str()];
                if let Some(id) = self.rev_parse(&candidates)? {
                    return Ok(id);
                }
                log::debug!("Revision {} not present locally, fetching it", revision);
                self.git(&["fetch", "origin", "--", revision])
                    .map_err(|e| self.not_found(e, repo_label, revision))?;
                self.rev_parse(&["FETCH_HEAD"])?
                    .ok_or_else(|| self.missing(repo_label, revision))
            }
        }
    }

    /// Forces the working tree to `commit`, discarding local changes and
    /// untracked files.
    pub fn checkout(&self, commit: &str) -> Result<(), SyncError> {
        self.git(&["checkout", "--force", "--detach", commit])?;
        self.git(&["clean", "-ffdx"])?;
        Ok(())
    }

    pub fn head_commit(&self) -> Result<Option<String>, SyncError> {
        self.rev_parse(&["HEAD"])
    }

    pub fn head_message(&self) -> Result<String, SyncError> {
        let output = self.git(&["log", "-1", "--format=%B"])?;
        Ok(parse_commit_message(&output.stdout))
    }

    fn rev_parse(&self, candidates: &[&str]) -> Result<Option<String>, SyncError> {
        for candidate in candidates {
            let spec = format!("{candidate}^{{commit}}");
            let output = self.run(self.command_with(&["rev-parse", "--verify", "--quiet", &spec]))?;
            if output.status.success() {
                if let Some(id) = parse_object_id(&output.stdout) {
                    return Ok(Some(id));
                }
            }
        }
        Ok(None)
    }

    fn missing(&self, repo: &str, revision: &str) -> SyncError {
        FetchError::RevisionNotFound {
            repo: repo.to_string(),
            revision: revision.to_string(),
        }
        .into()
    }

    /// Maps a failed targeted fetch to `RevisionNotFound` when git says so.
    fn not_found(&self, err: SyncError, repo: &str, revision: &str) -> SyncError {
        match err {
            SyncError::Fetch(FetchError::Git(ref message)) if is_unknown_revision(message) => {
                self.missing(repo, revision)
            }
            other => other,
        }
    }

    fn command(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        // Error classification matches on English messages.
        cmd.env("LC_ALL", "C");
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    fn command_with(&self, args: &[&str]) -> Command {
        let mut cmd = self.command(Some(&self.repo_path));
        cmd.args(args);
        cmd
    }

    fn git(&self, args: &[&str]) -> Result<Output, SyncError> {
        self.run_checked(self.command_with(args))
    }

    fn run_checked(&self, cmd: Command) -> Result<Output, SyncError> {
        let output = self.run(cmd)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_git_error(&format_git_error(&output)).into())
        }
    }

    fn run(&self, cmd: Command) -> Result<Output, SyncError> {
        run_cancellable(cmd, self.cancel)
    }
}

/// Runs `cmd` to completion, killing it if `cancel` is set meanwhile.
fn run_cancellable(mut cmd: Command, cancel: &CancellationFlag) -> Result<Output, SyncError> {
    cancel.check()?;

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| FetchError::Git(format!("failed to run git: {e}")))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if cancel.is_cancelled() => {
                let _ = child.kill();
                let _ = child.wait();
                log::info!("Git command cancelled");
                return Err(SyncError::Cancelled);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(FetchError::Git(format!("failed to wait for git: {e}")).into()),
        }
    };

    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_git_repo_false() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationFlag::new();
        assert!(!GitRepository::new(dir.path(), &cancel).is_git_repo());
    }

    #[test]
    fn test_cancelled_before_spawn() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let repo = GitRepository::new(dir.path(), &cancel);
        assert!(matches!(repo.head_commit(), Err(SyncError::Cancelled)));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_running_command() {
        let cancel = CancellationFlag::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let started = std::time::Instant::now();
        let result = run_cancellable(cmd, &cancel);
        handle.join().unwrap();

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_option_like_ref_never_reaches_git() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationFlag::new();
        let repo = GitRepository::new(dir.path(), &cancel);

        for target in [
            GitRef::Revision("--upload-pack=touch pwned;git-upload-pack".into()),
            GitRef::Branch("-f".into()),
        ] {
            let err = repo.resolve(&target, "repo").unwrap_err();
            assert!(
                matches!(err, SyncError::Fetch(FetchError::RevisionNotFound { .. })),
                "{err:?}"
            );
        }
    }

    #[test]
    fn test_not_a_repository_is_git_error() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationFlag::new();
        let repo = GitRepository::new(dir.path(), &cancel);

        let err = repo.head_message().unwrap_err();
        assert!(matches!(err, SyncError::Fetch(FetchError::Git(_))));
    }
}
