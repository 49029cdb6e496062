//! Git output parsing helpers.

use std::process::Output;

/// Combines stderr and stdout of a failed git command into one message.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => match output.status.code() {
            Some(code) => format!("git exited with status {code}"),
            None => "git was terminated by a signal".to_string(),
        },
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{stderr}\n{stdout}"),
    }
}

/// Returns true if `name` can be handed to git as a ref or revision
/// argument. Names starting with `-` would be parsed as options.
pub fn is_safe_ref_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Returns true when git reports that a ref or object does not exist.
pub fn is_unknown_revision(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "couldn't find remote ref",
        "unknown revision",
        "bad revision",
        "invalid reference",
        "not a valid object name",
        "did not match any file(s) known to git",
        "reference is not a tree",
        "needed a single revision",
        "no such remote ref",
        "not our ref",
    ]
    .iter()
    .any(|pattern| lower.contains(pattern))
}

/// Parses the object name printed by `git rev-parse`.
pub fn parse_object_id(stdout: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stdout);
    let id = text.lines().next()?.trim();
    let valid_len = id.len() == 40 || id.len() == 64;
    (valid_len && id.bytes().all(|b| b.is_ascii_hexdigit())).then(|| id.to_ascii_lowercase())
}

/// Commit message as printed by `git log --format=%B`, without trailing blank lines.
pub fn parse_commit_message(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout).trim().to_string()
}
