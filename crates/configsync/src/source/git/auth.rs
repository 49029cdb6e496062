//! Environment for authenticating git subprocesses.

use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;

use crate::error::FetchError;
use crate::source::credentials::GitCredentials;

/// Quotes a value for a single-quoted POSIX shell string.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Removes a credential file from disk when dropped.
#[derive(Debug)]
struct TempSecretFile {
    path: PathBuf,
}

impl Drop for TempSecretFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to remove temporary credential file: {}", e);
        }
    }
}

/// Creates `<temp>/<prefix>-<uuid>` holding `contents`, readable only by the owner.
fn write_secret_file(prefix: &str, contents: &str, mode: u32) -> Result<TempSecretFile, FetchError> {
    let path = std::env::temp_dir().join(format!("{prefix}-{}", uuid::Uuid::new_v4()));

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&path)
            .map_err(|e| FetchError::io(&path, e))?;
        let guard = TempSecretFile { path: path.clone() };
        file.write_all(contents.as_bytes())
            .map_err(|e| FetchError::io(&path, e))?;
        Ok(guard)
    }

    #[cfg(not(unix))]
    {
        let _ = mode;
        std::fs::write(&path, contents).map_err(|e| FetchError::io(&path, e))?;
        Ok(TempSecretFile { path })
    }
}

fn path_str(path: &Path) -> Result<&str, FetchError> {
    path.to_str().ok_or_else(|| {
        FetchError::Auth(format!(
            "credential path is not valid UTF-8: {}",
            path.display()
        ))
    })
}

fn ssh_command(key: &Path) -> Result<String, FetchError> {
    let key = path_str(key)?;
    // A leading '-' would be read by ssh as an option.
    let key = if key.starts_with('-') {
        format!("./{key}")
    } else {
        key.to_string()
    };
    Ok(format!(
        "ssh -i {} -o IdentitiesOnly=yes -o BatchMode=yes -o StrictHostKeyChecking=accept-new",
        shell_quote(&key)
    ))
}

/// Environment variables for one git invocation plus any credential files
/// they point at. Keep it alive until the git command has finished.
#[derive(Debug)]
pub struct AuthEnv {
    pub env_vars: Vec<(String, String)>,
    _secret_file: Option<TempSecretFile>,
}

impl AuthEnv {
    fn new(env_vars: Vec<(String, String)>, secret_file: Option<TempSecretFile>) -> Self {
        Self {
            env_vars,
            _secret_file: secret_file,
        }
    }
}

/// Builds the git environment for `credentials`.
///
/// Interactive prompts are always disabled so missing or wrong credentials
/// fail fast instead of blocking the sync.
pub fn build_auth_env(credentials: &GitCredentials) -> Result<AuthEnv, FetchError> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    match credentials {
        GitCredentials::None => Ok(AuthEnv::new(env, None)),

        GitCredentials::Token { username, token } => {
            let script = format!(
                "#!/bin/sh\ncase \"$1\" in\nUsername*) printf '%s\\n' {} ;;\n*) printf '%s\\n' {} ;;\nesac\n",
                shell_quote(username),
                shell_quote(token.expose_secret()),
            );
            let file = write_secret_file(".git-askpass", &script, 0o700)?;
            env.push(("GIT_ASKPASS".to_string(), path_str(&file.path)?.to_string()));
            Ok(AuthEnv::new(env, Some(file)))
        }

        GitCredentials::SshKeyPath(path) => {
            if !path.is_file() {
                return Err(FetchError::Auth(format!(
                    "SSH key file not found: {}",
                    path.display()
                )));
            }
            env.push(("GIT_SSH_COMMAND".to_string(), ssh_command(path)?));
            Ok(AuthEnv::new(env, None))
        }

        GitCredentials::SshKeyMaterial(key) => {
            let mut material = key.expose_secret().trim_end().to_string();
            material.push('\n');
            let file = write_secret_file(".git-ssh-key", &material, 0o600)?;
            env.push(("GIT_SSH_COMMAND".to_string(), ssh_command(&file.path)?));
            Ok(AuthEnv::new(env, Some(file)))
        }
    }
}
