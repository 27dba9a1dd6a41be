//! Git branch management
//!
//! Provides branch listing with tracking info and the local branch switch
//! that feeds the conflict workflow.

use std::path::Path;
use tracing::{debug, info};

use super::parse;
use super::runner::GitCli;
use super::utils::*;

impl GitCli {
    /// List local and remote branches
    ///
    /// Uses:
    /// - `git branch` for local names and the current marker
    /// - `git branch -a` for `remotes/` entries
    /// - `git branch -vv` for upstream tracking and ahead/behind
    pub async fn branches(&self, repo: &Path) -> Result<BranchList, GitError> {
        let plain = self.run(repo, &["branch", "--no-color"]).await?;
        let all = self.run(repo, &["branch", "-a", "--no-color"]).await?;
        let verbose = self.run(repo, &["branch", "-vv", "--no-color"]).await?;

        let parsed = parse::parse_branches(&plain, &all, &verbose);
        if let Some(current) = parsed.current() {
            debug!(repo = %repo.display(), branch = %current.name, "Current branch");
        }
        Ok(BranchList {
            local: parsed.local,
            remote: parsed.remote,
        })
    }

    /// Paths left unmerged in the index
    ///
    /// Uses `git diff --name-only --diff-filter=U`
    pub async fn unmerged_files(&self, repo: &Path) -> Result<Vec<String>, GitError> {
        let out = self
            .run(repo, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(parse::parse_name_list(&out))
    }

    /// Switch to a local branch, then merge the paired remote branch if given.
    ///
    /// Local changes that would be overwritten, or paths left unmerged by the
    /// merge, are reported as `CheckoutOutcome::Conflicts`; any other failure
    /// is an error.
    pub async fn checkout_local_branch(
        &self,
        repo: &Path,
        branch: &str,
        remote: Option<&str>,
    ) -> Result<CheckoutOutcome, GitError> {
        validate_ref_name(branch)?;
        if let Some(remote) = remote {
            validate_ref_name(remote)?;
        }

        let out = self.output(repo, &["checkout", branch, "--"]).await?;
        if !out.success() {
            let files = parse::parse_overwritten_files(&format!("{}\n{}", out.stderr, out.stdout));
            if !files.is_empty() {
                info!(repo = %repo.display(), branch, count = files.len(), "Checkout blocked by local changes");
                return Ok(CheckoutOutcome::Conflicts {
                    files,
                    incoming: branch.to_string(),
                    unmerged: false,
                });
            }
            return Err(GitError::CommandFailed {
                command: "checkout".to_string(),
                code: out.code,
                stdout: out.stdout,
                stderr: out.stderr,
            });
        }

        let Some(remote) = remote else {
            return Ok(CheckoutOutcome::Switched);
        };

        let merge = self.output(repo, &["merge", "--no-edit", remote]).await?;
        if merge.success() {
            return Ok(CheckoutOutcome::Switched);
        }

        let mut files = self.unmerged_files(repo).await?;
        let unmerged = !files.is_empty();
        if !unmerged {
            files = parse::parse_overwritten_files(&format!("{}\n{}", merge.stderr, merge.stdout));
        }
        if files.is_empty() {
            return Err(GitError::CommandFailed {
                command: "merge".to_string(),
                code: merge.code,
                stdout: merge.stdout,
                stderr: merge.stderr,
            });
        }
        info!(repo = %repo.display(), branch, remote, count = files.len(), "Merge left conflicts");
        Ok(CheckoutOutcome::Conflicts {
            files,
            incoming: remote.to_string(),
            unmerged,
        })
    }
}
