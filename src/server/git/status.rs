//! Git status and history queries
//!
//! Provides the changed-file listing and the commit log.

use std::path::Path;

use super::parse::{self, ParsedLog, ParsedStatus, LOG_FORMAT};
use super::runner::GitCli;
use super::utils::*;

impl GitCli {
    /// Fail early with `NotAGitRepo` instead of a raw command failure
    pub async fn ensure_repo(&self, repo: &Path) -> Result<(), GitError> {
        match self.run(repo, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(out) if out.trim() == "true" => Ok(()),
            Ok(_) | Err(GitError::CommandFailed { .. }) => {
                Err(GitError::NotAGitRepo(repo.display().to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Uses `git status --porcelain=v1 --untracked-files=all`
    pub async fn status(&self, repo: &Path) -> Result<ParsedStatus, GitError> {
        let out = self
            .run(repo, &["status", "--porcelain=v1", "--untracked-files=all"])
            .await?;
        Ok(parse::parse_status(&out))
    }

    pub async fn changed_files(&self, repo: &Path) -> Result<ChangedFiles, GitError> {
        let status = self.status(repo).await?;
        Ok(ChangedFiles {
            staged: status.staged(),
            unstaged: status.unstaged(),
        })
    }

    /// Commit log across `branches` (HEAD when empty), newest first.
    ///
    /// Uses `git log --date=short --pretty=format:%h %p|%d|%an|%ad|%s -n <limit> <branches>`
    pub async fn commit_history(
        &self,
        repo: &Path,
        branches: &[String],
    ) -> Result<ParsedLog, GitError> {
        for branch in branches {
            validate_ref_name(branch)?;
        }
        let limit = format!("-n{}", self.log_limit);
        let mut args = vec!["log", "--date=short", LOG_FORMAT, limit.as_str()];
        args.extend(branches.iter().map(String::as_str));
        // Refs only; keeps a branch named like a file from being read as a path
        args.push("--");

        let out = self.run(repo, &args).await?;
        Ok(parse::parse_log(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::super::stub::StubGit;
    use super::*;

    #[tokio::test]
    async fn test_changed_files_split() {
        let git = StubGit::new();
        git.reply(&["status"], "M  staged.txt\n M edited.txt\n?? new.txt\n");

        let files = git.cli().changed_files(Path::new("/repo")).await.unwrap();
        let staged: Vec<_> = files.staged.iter().map(|f| f.path.as_str()).collect();
        let unstaged: Vec<_> = files.unstaged.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(staged, vec!["staged.txt"]);
        assert_eq!(unstaged, vec!["edited.txt", "new.txt"]);
        assert_eq!(files.unstaged[1].status, "??");
    }

    #[tokio::test]
    async fn test_commit_history_args_and_parse() {
        let git = StubGit::new();
        git.reply(
            &["log"],
            "abc123 def456| (HEAD -> main, origin/main)|Alice|2024-01-02|Fix bug\n\
             def456 |  |Bob|2024-01-01|Initial\n",
        );
        let cli = git.cli().with_log_limit(50);
        let log = cli
            .commit_history(Path::new("/repo"), &["main".to_string()])
            .await
            .unwrap();

        assert_eq!(log.commits.len(), 2);
        assert_eq!(log.commits[0].branches, vec!["main", "origin/main"]);
        assert_eq!(log.commits[0].parents, vec!["def456"]);
        assert!(log.commits[1].parents.is_empty());
        assert!(git.called(&["log", "--date=short", LOG_FORMAT, "-n50", "main", "--"]));
    }

    #[tokio::test]
    async fn test_commit_history_rejects_option_like_branch() {
        let git = StubGit::new();
        let result = git
            .cli()
            .commit_history(Path::new("/repo"), &["--output=/tmp/x".to_string()])
            .await;
        assert!(matches!(result, Err(GitError::Invalid(_))));
        assert!(git.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_repo() {
        let git = StubGit::new();
        git.fail(&["rev-parse"], "fatal: not a git repository");
        let result = git.cli().ensure_repo(Path::new("/tmp")).await;
        assert!(matches!(result, Err(GitError::NotAGitRepo(_))));

        let git = StubGit::new();
        git.reply(&["rev-parse"], "true\n");
        assert!(git.cli().ensure_repo(Path::new("/repo")).await.is_ok());
    }
}
