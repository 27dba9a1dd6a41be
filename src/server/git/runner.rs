//! Subprocess execution for git
//!
//! Arguments are always passed as discrete tokens; nothing is routed through a shell.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use super::utils::GitError;
use crate::config::GitSection;

/// Captured output of one git invocation
#[derive(Debug, Clone, Default)]
pub struct GitOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes git inside a working tree. Implemented by [`SystemGit`] and by test stubs.
#[async_trait]
pub trait GitExecutor: Send + Sync {
    async fn run(&self, repo: &Path, args: &[&str]) -> Result<GitOutput, GitError>;
}

/// Runs the installed git binary with a per-call timeout.
///
/// The child is spawned with `kill_on_drop`, so dropping the returned future
/// (timeout or connection teardown) also terminates the process.
#[derive(Debug, Clone)]
pub struct SystemGit {
    binary: PathBuf,
    timeout: Duration,
}

impl SystemGit {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    /// Resolve `name` through PATH (or accept an explicit path)
    pub fn resolve(name: &str, timeout: Duration) -> Result<Self, GitError> {
        let binary = which::which(name).map_err(|e| {
            GitError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("git executable '{}' not found: {}", name, e),
            ))
        })?;
        debug!(binary = %binary.display(), "Resolved git executable");
        Ok(Self::new(binary, timeout))
    }
}

#[async_trait]
impl GitExecutor for SystemGit {
    async fn run(&self, repo: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        trace!(repo = %repo.display(), command = %args.join(" "), "Spawning git");

        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(repo)
            // Stable, English output for the parsers; never block on a credential prompt
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(GitOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(GitError::IoError(e)),
            Err(_) => Err(GitError::Timeout {
                command: args.first().copied().unwrap_or_default().to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Git command orchestrator: one instance is shared by every connection.
///
/// Invocations against the same repository are not serialized here; git's own
/// `index.lock` decides, and a lock failure surfaces as `CommandFailed`.
#[derive(Clone)]
pub struct GitCli {
    exec: Arc<dyn GitExecutor>,
    pub(super) log_limit: usize,
}

impl GitCli {
    pub fn new(exec: Arc<dyn GitExecutor>) -> Self {
        Self {
            exec,
            log_limit: 200,
        }
    }

    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit.max(1);
        self
    }

    pub fn from_config(section: &GitSection) -> Result<Self, GitError> {
        let exec = SystemGit::resolve(&section.binary, section.timeout())?;
        Ok(Self::new(Arc::new(exec)).with_log_limit(section.log_limit))
    }

    /// Run and return the raw output regardless of exit status
    pub(super) async fn output(&self, repo: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        self.exec.run(repo, args).await.inspect_err(|e| {
            warn!(repo = %repo.display(), command = %args.join(" "), error = %e, "git invocation failed");
        })
    }

    /// Run and require a zero exit status; returns stdout
    pub(super) async fn run(&self, repo: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(repo, args).await?;
        if output.success() {
            return Ok(output.stdout);
        }

        let err = GitError::CommandFailed {
            command: args.first().copied().unwrap_or_default().to_string(),
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        };
        warn!(
            repo = %repo.display(),
            command = %args.join(" "),
            code = ?output.code,
            error = %err,
            "git command exited with failure"
        );
        Err(err)
    }
}
