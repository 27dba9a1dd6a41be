//! Git file operations
//!
//! Per-file diffs and file contents at a ref, used by the changes panel and
//! the conflict viewer.

use std::path::Path;
use tracing::debug;

use super::parse;
use super::runner::GitCli;
use super::utils::*;

impl GitCli {
    /// Get git diff for a specific file
    ///
    /// For tracked files: `git diff -- <path>` (working) or `git diff --cached -- <path>` (staged)
    /// For untracked files: `git diff --no-index -- /dev/null <path>`
    pub async fn file_diff(
        &self,
        repo: &Path,
        path: &str,
        staged: bool,
    ) -> Result<FileDiff, GitError> {
        validate_pathspec(path)?;

        let text = if !staged && self.is_untracked(repo, path).await? {
            self.untracked_diff(repo, path).await?
        } else if staged {
            self.run(repo, &["diff", "--cached", "--", path]).await?
        } else {
            self.run(repo, &["diff", "--", path]).await?
        };

        let (text, truncated) = truncate_if_needed(&text);
        let diff = parse::parse_diff(&text);
        Ok(FileDiff {
            path: path.to_string(),
            staged,
            text,
            truncated,
            diff,
        })
    }

    async fn is_untracked(&self, repo: &Path, path: &str) -> Result<bool, GitError> {
        let out = self
            .output(repo, &["ls-files", "--error-unmatch", "--", path])
            .await?;
        Ok(!out.success())
    }

    async fn untracked_diff(&self, repo: &Path, path: &str) -> Result<String, GitError> {
        let out = self
            .output(repo, &["diff", "--no-index", "--", "/dev/null", path])
            .await?;
        // --no-index exits 1 when the files differ, which is the normal case here
        match out.code {
            Some(0) | Some(1) => Ok(out.stdout),
            code => Err(GitError::CommandFailed {
                command: "diff".to_string(),
                code,
                stdout: out.stdout,
                stderr: out.stderr,
            }),
        }
    }

    /// Content of `path` at `rev`; a path missing at that ref yields an empty string
    ///
    /// Uses `git show <rev>:<path>`
    pub async fn show_file_at(&self, repo: &Path, rev: &str, path: &str) -> Result<String, GitError> {
        validate_ref_name(rev)?;
        validate_pathspec(path)?;
        let spec = format!("{}:{}", rev, path);
        match self.run(repo, &["show", &spec]).await {
            Ok(text) => Ok(text),
            Err(GitError::CommandFailed { stderr, .. })
                if stderr.contains("does not exist") || stderr.contains("exists on disk, but not in") =>
            {
                debug!(rev, path, "Path absent at revision");
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Working-tree content of `path`, falling back to `HEAD:<path>` when the
    /// file is not on disk
    pub async fn working_file(&self, repo: &Path, path: &str) -> Result<String, GitError> {
        validate_pathspec(path)?;
        match tokio::fs::read(repo.join(path)).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.show_file_at(repo, "HEAD", path).await
            }
            Err(e) => Err(GitError::IoError(e)),
        }
    }

    /// Current (left) and incoming (right) content of a conflicting file
    pub async fn conflict_file_pair(
        &self,
        repo: &Path,
        path: &str,
        target: &str,
    ) -> Result<ConflictPair, GitError> {
        let left = self.working_file(repo, path).await?;
        let right = self.show_file_at(repo, target, path).await?;
        Ok(ConflictPair { left, right })
    }
}
