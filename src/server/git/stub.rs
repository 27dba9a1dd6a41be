//! Scripted `GitExecutor` for unit tests

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::runner::{GitCli, GitExecutor, GitOutput};
use super::utils::GitError;

/// Replies to git invocations by argument prefix; unmatched calls succeed with
/// empty output. Every call is recorded.
#[derive(Default)]
pub struct StubGit {
    rules: Mutex<Vec<(Vec<String>, GitOutput)>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl StubGit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, prefix: &[&str], stdout: &str) {
        self.push(prefix, Some(0), stdout, "");
    }

    pub fn fail(&self, prefix: &[&str], stderr: &str) {
        self.push(prefix, Some(1), "", stderr);
    }

    pub fn push_exit(&self, prefix: &[&str], code: i32, stdout: &str) {
        self.push(prefix, Some(code), stdout, "");
    }

    fn push(&self, prefix: &[&str], code: Option<i32>, stdout: &str, stderr: &str) {
        let prefix = prefix.iter().map(|s| s.to_string()).collect();
        let output = GitOutput {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };
        // Later rules win over earlier ones
        self.rules.lock().unwrap().insert(0, (prefix, output));
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &[&str]) -> bool {
        self.calls()
            .iter()
            .any(|call| call.len() >= prefix.len() && call.iter().zip(prefix).all(|(a, b)| a == b))
    }

    pub fn cli(self: &Arc<Self>) -> GitCli {
        GitCli::new(self.clone())
    }
}

#[async_trait]
impl GitExecutor for StubGit {
    async fn run(&self, _repo: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        self.calls
            .lock()
            .unwrap()
            .push(args.iter().map(|s| s.to_string()).collect());

        let rules = self.rules.lock().unwrap();
        let hit = rules.iter().find(|(prefix, _)| {
            args.len() >= prefix.len() && prefix.iter().zip(args).all(|(p, a)| p == a)
        });
        Ok(hit.map(|(_, out)| out.clone()).unwrap_or(GitOutput {
            code: Some(0),
            ..Default::default()
        }))
    }
}
