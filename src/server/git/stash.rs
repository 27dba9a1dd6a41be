//! Git stash operations

use std::path::Path;
use tracing::{debug, info};

use super::parse::{self, StashEntry};
use super::runner::GitCli;
use super::utils::*;

impl GitCli {
    /// Files recorded in a stash entry
    ///
    /// Uses `git stash show --include-untracked --name-only <name>`, falling back
    /// to plain `--name-only` on gits without `--include-untracked` for show.
    pub async fn stash_files(&self, repo: &Path, name: &str) -> Result<Vec<String>, GitError> {
        let out = self
            .output(repo, &["stash", "show", "--include-untracked", "--name-only", name])
            .await?;
        if out.success() {
            return Ok(parse::parse_name_list(&out.stdout));
        }
        debug!(stash = name, "stash show --include-untracked unsupported, retrying");
        let out = self.run(repo, &["stash", "show", "--name-only", name]).await?;
        Ok(parse::parse_name_list(&out))
    }

    /// Uses `git stash list`, then `git stash show` per entry
    pub async fn stash_list(&self, repo: &Path) -> Result<Vec<StashEntry>, GitError> {
        let out = self.run(repo, &["stash", "list"]).await?;
        let mut entries = parse::parse_stash_list(&out);
        for entry in &mut entries {
            entry.files = self.stash_files(repo, &entry.name).await?;
        }
        Ok(entries)
    }

    /// Stash the selected files (untracked ones included) and return the new entry
    ///
    /// Uses `git stash push --include-untracked -m <message> -- <files>`
    pub async fn stash_push(
        &self,
        repo: &Path,
        files: &[String],
        message: &str,
    ) -> Result<StashPushResult, GitError> {
        if files.is_empty() {
            return Err(GitError::Invalid("No files selected".to_string()));
        }
        for file in files {
            validate_pathspec(file)?;
        }
        let message = message.trim();
        let mut args = vec!["stash", "push", "--include-untracked"];
        if !message.is_empty() {
            args.extend(["-m", message]);
        }
        args.push("--");
        args.extend(files.iter().map(String::as_str));

        let out = self.run(repo, &args).await?;
        if out.contains("No local changes to save") {
            return Ok(StashPushResult {
                success: false,
                stash: None,
                message: "No local changes to save".to_string(),
            });
        }

        let list = self.run(repo, &["stash", "list"]).await?;
        let mut stash = parse::parse_stash_list(&list).into_iter().next();
        if let Some(entry) = stash.as_mut() {
            entry.files = self.stash_files(repo, &entry.name).await?;
            info!(repo = %repo.display(), stash = %entry.name, files = entry.files.len(), "Stashed");
        }

        Ok(StashPushResult {
            success: true,
            stash,
            message: format!("Stashed {} file(s)", files.len()),
        })
    }
}
