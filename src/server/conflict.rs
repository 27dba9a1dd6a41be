//! Conflict resolution workflow
//!
//! Tracks, per connection and repository, a branch switch that could not
//! complete cleanly:
//!
//! ```text
//! Clean -> SwitchRequested -> Conflicted -> Resolving -> Clean
//!                          \-> Clean                  \-> Conflicted
//! ```
//!
//! A failed resolution keeps the session exactly as it was so the user can
//! retry or pick another action.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RepoConfig;
use crate::server::git::{
    BranchList, ChangedFiles, CheckoutOutcome, ConflictPair, GitCli, GitError, StashEntry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPhase {
    Clean,
    SwitchRequested,
    Conflicted,
    Resolving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    Commit,
    Stash,
    Discard,
}

#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("No unresolved conflicts for this repository")]
    NoConflict,
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Git(#[from] GitError),
}

/// A branch switch blocked by conflicting files
#[derive(Debug, Clone)]
pub struct ConflictSession {
    pub target_branch: String,
    pub remote_branch: Option<String>,
    /// Ref providing the incoming side of each pair
    pub incoming: String,
    /// The paired merge left these paths unmerged in the index
    pub unmerged: bool,
    pub files: Vec<String>,
    pub pairs: HashMap<String, ConflictPair>,
    pub action: Option<ResolveAction>,
}

/// Serializable view of one repository's workflow state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSnapshot {
    pub phase: ConflictPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_branch: Option<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReport {
    pub success: bool,
    pub conflict_files: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ResolveReport {
    pub action: ResolveAction,
    pub message: String,
    pub stash: Option<StashEntry>,
    pub status: ChangedFiles,
    pub branches: BranchList,
}

/// Workflow state of one repository
#[derive(Debug)]
pub struct ConflictWorkflow {
    phase: ConflictPhase,
    session: Option<ConflictSession>,
}

impl Default for ConflictWorkflow {
    fn default() -> Self {
        Self {
            phase: ConflictPhase::Clean,
            session: None,
        }
    }
}

impl ConflictWorkflow {
    pub fn phase(&self) -> ConflictPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&ConflictSession> {
        self.session.as_ref()
    }

    pub fn snapshot(&self) -> ConflictSnapshot {
        ConflictSnapshot {
            phase: self.phase,
            target_branch: self.session.as_ref().map(|s| s.target_branch.clone()),
            remote_branch: self.session.as_ref().and_then(|s| s.remote_branch.clone()),
            files: self
                .session
                .as_ref()
                .map(|s| s.files.clone())
                .unwrap_or_default(),
        }
    }

    fn reset(&mut self) {
        self.phase = ConflictPhase::Clean;
        self.session = None;
    }

    /// Switch to `branch` (merging `remote_branch` if paired). Conflicts move the
    /// workflow to `Conflicted` and capture a current/incoming pair per file.
    pub async fn checkout(
        &mut self,
        git: &GitCli,
        repo: &RepoConfig,
        branch: &str,
        remote_branch: Option<&str>,
    ) -> Result<CheckoutReport, ConflictError> {
        self.phase = ConflictPhase::SwitchRequested;
        self.session = None;

        let outcome = match git
            .checkout_local_branch(&repo.path, branch, remote_branch)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.reset();
                return Err(e.into());
            }
        };

        match outcome {
            CheckoutOutcome::Switched => {
                self.reset();
                info!(repo = %repo.name, branch, "Switched branch");
                Ok(CheckoutReport {
                    success: true,
                    conflict_files: Vec::new(),
                    message: format!("Switched to branch '{}'", branch),
                })
            }
            CheckoutOutcome::Conflicts {
                files,
                incoming,
                unmerged,
            } => {
                let mut pairs = HashMap::new();
                for file in &files {
                    match git.conflict_file_pair(&repo.path, file, &incoming).await {
                        Ok(pair) => {
                            pairs.insert(file.clone(), pair);
                        }
                        // Fetched on demand instead
                        Err(e) => warn!(repo = %repo.name, file = %file, "Could not capture conflict pair: {}", e),
                    }
                }

                info!(repo = %repo.name, branch, files = files.len(), "Branch switch has conflicts");
                self.phase = ConflictPhase::Conflicted;
                self.session = Some(ConflictSession {
                    target_branch: branch.to_string(),
                    remote_branch: remote_branch.map(str::to_string),
                    incoming,
                    unmerged,
                    files: files.clone(),
                    pairs,
                    action: None,
                });
                Ok(CheckoutReport {
                    success: false,
                    conflict_files: files,
                    message: format!(
                        "Switching to '{}' would overwrite local changes",
                        branch
                    ),
                })
            }
        }
    }

    /// Current vs incoming content of `path`; the captured pair when the
    /// session holds one for the same target, otherwise read from git
    pub async fn file_diff(
        &self,
        git: &GitCli,
        repo: &RepoConfig,
        path: &str,
        target: &str,
    ) -> Result<ConflictPair, ConflictError> {
        if let Some(session) = &self.session {
            let same_target = target == session.target_branch || target == session.incoming;
            if same_target {
                if let Some(pair) = session.pairs.get(path) {
                    return Ok(pair.clone());
                }
            }
        }
        Ok(git.conflict_file_pair(&repo.path, path, target).await?)
    }

    /// Apply `action` to the selected conflicting files (all when `files` is None)
    pub async fn resolve(
        &mut self,
        git: &GitCli,
        repo: &RepoConfig,
        action: ResolveAction,
        files: Option<&[String]>,
        push: bool,
    ) -> Result<ResolveReport, ConflictError> {
        if self.phase != ConflictPhase::Conflicted {
            return Err(ConflictError::NoConflict);
        }
        let Some(session) = self.session.as_ref() else {
            return Err(ConflictError::NoConflict);
        };

        if action == ResolveAction::Discard {
            return Err(ConflictError::Unsupported(
                "Discarding conflicting changes is not supported".to_string(),
            ));
        }
        // git refuses to stash while the index holds unmerged entries
        if action == ResolveAction::Stash && session.unmerged {
            return Err(ConflictError::Invalid(format!(
                "Cannot stash while merging '{}' left unmerged paths; commit the resolution instead",
                session.incoming
            )));
        }

        let selected: Vec<String> = match files {
            Some(files) if !files.is_empty() => {
                if let Some(unknown) = files.iter().find(|f| !session.files.contains(f)) {
                    return Err(ConflictError::Invalid(format!(
                        "'{}' is not one of the conflicting files",
                        unknown
                    )));
                }
                files.to_vec()
            }
            _ => session.files.clone(),
        };
        let branch = session.target_branch.clone();

        self.phase = ConflictPhase::Resolving;
        if let Some(session) = self.session.as_mut() {
            session.action = Some(action);
        }

        let applied = apply(git, repo, action, &selected, &branch, push).await;
        let (message, stash) = match applied {
            Ok(done) => done,
            Err(e) => {
                warn!(repo = %repo.name, ?action, "Conflict resolution failed: {}", e);
                self.phase = ConflictPhase::Conflicted;
                if let Some(session) = self.session.as_mut() {
                    session.action = None;
                }
                return Err(e);
            }
        };

        self.reset();
        info!(repo = %repo.name, ?action, files = selected.len(), "Conflicts resolved");

        let status = git.changed_files(&repo.path).await.unwrap_or_else(|e| {
            warn!(repo = %repo.name, "Status refresh failed: {}", e);
            ChangedFiles::default()
        });
        let branches = git.branches(&repo.path).await.unwrap_or_else(|e| {
            warn!(repo = %repo.name, "Branch refresh failed: {}", e);
            BranchList::default()
        });

        Ok(ResolveReport {
            action,
            message,
            stash,
            status,
            branches,
        })
    }
}

fn commit_message(branch: &str, files: &[String]) -> String {
    let mut message = format!("Resolve conflicts before switching to {}\n\n", branch);
    for file in files {
        message.push_str("- ");
        message.push_str(file);
        message.push('\n');
    }
    message
}

fn stash_message(branch: &str) -> String {
    format!(
        "Before switching to {} ({})",
        branch,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

async fn apply(
    git: &GitCli,
    repo: &RepoConfig,
    action: ResolveAction,
    files: &[String],
    branch: &str,
    push: bool,
) -> Result<(String, Option<StashEntry>), ConflictError> {
    match action {
        ResolveAction::Commit => {
            let result = git
                .commit(&repo.path, &repo.remote, files, &commit_message(branch, files), push)
                .await?;
            Ok((result.message, None))
        }
        ResolveAction::Stash => {
            let result = git
                .stash_push(&repo.path, files, &stash_message(branch))
                .await?;
            if !result.success {
                return Err(ConflictError::Failed(result.message));
            }
            Ok((result.message, result.stash))
        }
        ResolveAction::Discard => Err(ConflictError::Unsupported(
            "Discarding conflicting changes is not supported".to_string(),
        )),
    }
}

/// Workflows of one connection, keyed by repository name
#[derive(Debug, Default)]
pub struct ConflictTracker {
    repos: HashMap<String, ConflictWorkflow>,
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow(&mut self, repo: &str) -> &mut ConflictWorkflow {
        self.repos.entry(repo.to_string()).or_default()
    }

    pub fn snapshot(&self, repo: &str) -> ConflictSnapshot {
        self.repos
            .get(repo)
            .map(ConflictWorkflow::snapshot)
            .unwrap_or_else(|| ConflictWorkflow::default().snapshot())
    }
}
