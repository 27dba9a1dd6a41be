//! Git commit, push and pull
//!
//! Multi-step operations are not rolled back: a failed commit after `git add`
//! leaves the files staged.

use std::path::Path;
use tracing::info;

use super::runner::GitCli;
use super::utils::*;

fn summary(stdout: &str, fallback: &str) -> String {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

impl GitCli {
    /// Uses `git add -- <files>`
    pub async fn stage(&self, repo: &Path, files: &[String]) -> Result<(), GitError> {
        if files.is_empty() {
            return Err(GitError::Invalid("No files selected".to_string()));
        }
        for file in files {
            validate_pathspec(file)?;
        }
        let mut args = vec!["add", "--"];
        args.extend(files.iter().map(String::as_str));
        self.run(repo, &args).await?;
        Ok(())
    }

    /// Stage `files` and commit them, optionally pushing the current branch
    ///
    /// Uses `git add -- <files>`, `git commit -m <message>`, `git push <remote> HEAD`
    pub async fn commit(
        &self,
        repo: &Path,
        remote: &str,
        files: &[String],
        message: &str,
        push: bool,
    ) -> Result<GitOpResult, GitError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(GitError::Invalid("Commit message cannot be empty".to_string()));
        }
        self.stage(repo, files).await?;

        let out = self.run(repo, &["commit", "-m", message]).await?;
        info!(repo = %repo.display(), files = files.len(), "Committed");
        let committed = summary(&out, "Committed");

        if push {
            validate_ref_name(remote)?;
            self.run(repo, &["push", remote, "HEAD"]).await?;
            return Ok(GitOpResult::ok(format!("{} (pushed to {})", committed, remote)));
        }
        Ok(GitOpResult::ok(committed))
    }

    /// Uses `git push <remote> <branch>`
    pub async fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<GitOpResult, GitError> {
        validate_ref_name(remote)?;
        validate_ref_name(branch)?;
        self.run(repo, &["push", remote, branch]).await?;
        info!(repo = %repo.display(), remote, branch, "Pushed");
        Ok(GitOpResult::ok(format!("Pushed {} to {}", branch, remote)))
    }

    /// Uses `git pull --no-edit <remote> <branch>`
    pub async fn pull(&self, repo: &Path, remote: &str, branch: &str) -> Result<GitOpResult, GitError> {
        validate_ref_name(remote)?;
        validate_ref_name(branch)?;
        let out = self
            .run(repo, &["pull", "--no-edit", remote, branch])
            .await?;
        info!(repo = %repo.display(), remote, branch, "Pulled");
        Ok(GitOpResult::ok(summary(&out, "Pulled")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::stub::StubGit;
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_commit_stages_then_commits() {
        let git = StubGit::new();
        git.reply(&["commit"], "[main abc1234] Fix\n 1 file changed\n");

        let result = git
            .cli()
            .commit(Path::new("/repo"), "origin", &files(&["a.txt", "b.txt"]), "Fix", false)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.message, "[main abc1234] Fix");

        let calls = git.calls();
        assert_eq!(calls[0], vec!["add", "--", "a.txt", "b.txt"]);
        assert_eq!(calls[1], vec!["commit", "-m", "Fix"]);
        assert!(!git.called(&["push"]));
    }

    #[tokio::test]
    async fn test_commit_with_push() {
        let git = StubGit::new();
        let result = git
            .cli()
            .commit(Path::new("/repo"), "upstream", &files(&["a.txt"]), "Fix", true)
            .await
            .unwrap();
        assert!(result.success);
        assert!(git.called(&["push", "upstream", "HEAD"]));
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_files_staged() {
        let git = StubGit::new();
        git.fail(&["commit"], "error: unable to create index.lock");
        let result = git
            .cli()
            .commit(Path::new("/repo"), "origin", &files(&["a.txt"]), "Fix", false)
            .await;
        assert!(matches!(result, Err(GitError::CommandFailed { .. })));
        // No reset is attempted after the add
        assert!(git.called(&["add"]));
        assert!(!git.called(&["reset"]));
    }

    #[tokio::test]
    async fn test_commit_validation() {
        let git = StubGit::new();
        let cli = git.cli();
        assert!(cli.commit(Path::new("/repo"), "origin", &files(&["a.txt"]), "  ", false).await.is_err());
        assert!(cli.commit(Path::new("/repo"), "origin", &[], "msg", false).await.is_err());
        assert!(git.calls().is_empty());
    }

    #[tokio::test]
    async fn test_push_and_pull_args() {
        let git = StubGit::new();
        let cli = git.cli();
        cli.push(Path::new("/repo"), "origin", "main").await.unwrap();
        cli.pull(Path::new("/repo"), "origin", "main").await.unwrap();
        assert!(git.called(&["push", "origin", "main"]));
        assert!(git.called(&["pull", "--no-edit", "origin", "main"]));
    }
}
