//! Git utilities - error type, constants and helper functions
//!
//! Provides common types used across git operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::parse::{Branch, FileChange, ParsedDiff, StashEntry};

/// Maximum diff size in bytes (1MB)
pub const MAX_DIFF_SIZE: usize = 1_048_576;

/// Error type for git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotAGitRepo(String),

    #[error("Failed to run git: {0}")]
    IoError(#[from] std::io::Error),

    #[error("git {command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("git {command} failed: {}", failure_detail(.stderr, .stdout))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{0}")]
    Invalid(String),
}

fn failure_detail<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = stdout.trim();
    if stdout.is_empty() {
        "unknown error"
    } else {
        stdout
    }
}

impl GitError {
    /// Short user-facing reason
    pub fn reason(&self) -> String {
        match self {
            GitError::CommandFailed { stdout, stderr, .. } => {
                failure_detail(stderr, stdout).to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result of a mutating git operation (commit, push, pull)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOpResult {
    pub success: bool,
    pub message: String,
}

impl GitOpResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(err: &GitError) -> Self {
        Self {
            success: false,
            message: err.reason(),
        }
    }
}

/// Staged / unstaged split returned to the file panel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangedFiles {
    pub staged: Vec<FileChange>,
    pub unstaged: Vec<FileChange>,
}

/// Local and remote branch listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchList {
    pub local: Vec<Branch>,
    pub remote: Vec<Branch>,
}

/// Diff of one changed file, raw and rendered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub staged: bool,
    pub text: String,
    pub truncated: bool,
    pub diff: ParsedDiff,
}

/// Both sides of a conflicting file: working tree vs switch target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPair {
    pub left: String,
    pub right: String,
}

/// Result of a stash push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StashPushResult {
    pub success: bool,
    pub stash: Option<StashEntry>,
    pub message: String,
}

/// Outcome of `checkout_local_branch`
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    Switched,
    /// `incoming` is the ref whose content collides with the working tree:
    /// the target branch when checkout refused, the remote branch after a merge.
    /// `unmerged` is set when the merge left the paths unmerged in the index.
    Conflicts {
        files: Vec<String>,
        incoming: String,
        unmerged: bool,
    },
}

/// Truncate text if it exceeds MAX_DIFF_SIZE
pub fn truncate_if_needed(text: &str) -> (String, bool) {
    if text.len() > MAX_DIFF_SIZE {
        let mut cut = MAX_DIFF_SIZE;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let truncated_text = &text[..cut];
        if let Some(last_newline) = truncated_text.rfind('\n') {
            (truncated_text[..=last_newline].to_string(), true)
        } else {
            (truncated_text.to_string(), true)
        }
    } else {
        (text.to_string(), false)
    }
}

/// Reject pathspecs that could be read as options or escape the work tree
pub fn validate_pathspec(path: &str) -> Result<(), GitError> {
    if path.is_empty() {
        return Err(GitError::Invalid("Empty path".to_string()));
    }
    if path.starts_with('/') || path.split(['/', '\\']).any(|c| c == "..") {
        return Err(GitError::Invalid(format!("Path escapes repository: {}", path)));
    }
    Ok(())
}

/// Reject ref names git would parse as options or that are not valid refs
pub fn validate_ref_name(name: &str) -> Result<(), GitError> {
    let invalid = name.is_empty()
        || name.starts_with('-')
        || name.contains("..")
        || name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));
    if invalid {
        return Err(GitError::Invalid(format!("Invalid ref name: {}", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_if_needed() {
        let short_text = "short text";
        let (result, truncated) = truncate_if_needed(short_text);
        assert_eq!(result, short_text);
        assert!(!truncated);

        let long = "line\n".repeat(MAX_DIFF_SIZE / 5 + 10);
        let (result, truncated) = truncate_if_needed(&long);
        assert!(truncated);
        assert!(result.len() <= MAX_DIFF_SIZE);
        assert!(result.ends_with('\n'));
    }

    #[test]
    fn test_validate_pathspec() {
        assert!(validate_pathspec("src/main.rs").is_ok());
        assert!(validate_pathspec("-rf").is_ok());
        assert!(validate_pathspec("../etc/passwd").is_err());
        assert!(validate_pathspec("/etc/passwd").is_err());
        assert!(validate_pathspec("").is_err());
    }

    #[test]
    fn test_validate_ref_name() {
        assert!(validate_ref_name("feature/login").is_ok());
        assert!(validate_ref_name("origin/main").is_ok());
        assert!(validate_ref_name("--force").is_err());
        assert!(validate_ref_name("a..b").is_err());
        assert!(validate_ref_name("has space").is_err());
    }

    #[test]
    fn test_command_failed_reason_prefers_stderr() {
        let err = GitError::CommandFailed {
            command: "push".to_string(),
            code: Some(1),
            stdout: "out".to_string(),
            stderr: "fatal: no upstream\n".to_string(),
        };
        assert_eq!(err.reason(), "fatal: no upstream");
        assert_eq!(err.to_string(), "git push failed: fatal: no upstream");
    }
}
