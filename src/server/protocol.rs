use serde::{Deserialize, Serialize};

use crate::server::conflict::{ConflictSnapshot, ResolveAction};
use crate::server::git::parse::Hunk;
use crate::server::git::{Branch, BranchList, ChangedFiles, Commit, FileChange, StashEntry};
use crate::server::ssh::RemoteEntry;

pub mod terminal;

pub use terminal::SessionDescriptor;

/// Protocol version (MessagePack binary frames, kebab-case tags, camelCase fields)
pub const PROTOCOL_VERSION: u32 = 1;

/// Feature flags announced in `hello`
pub const CAPABILITIES: &[&str] = &["terminal", "sftp", "git", "conflicts"];

/// Upper bound on terminal geometry accepted from clients
const MAX_TERMINAL_DIM: u32 = 1000;

// ============================================================================
// Client -> server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Ping,

    // Terminal
    Start {
        session: SessionDescriptor,
    },
    Input {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    Resize {
        cols: u32,
        rows: u32,
    },
    Stop,

    // Remote files
    List {
        path: String,
        #[serde(default)]
        refresh: bool,
    },
    Upload {
        path: String,
        name: String,
        /// Base64 file content
        data: String,
    },
    DownloadBatch {
        paths: Vec<String>,
    },
    Move {
        src: String,
        dest: String,
    },

    // Git status / history
    FetchChangedFiles {
        repo: String,
    },
    FetchFileDiff {
        repo: String,
        path: String,
        #[serde(default)]
        staged: bool,
    },
    FetchCommitHistory {
        repo: String,
        #[serde(default)]
        branches: Vec<String>,
    },
    FetchStashes {
        repo: String,
    },

    // Git mutations
    GitCommit {
        repo: String,
        files: Vec<String>,
        message: String,
        #[serde(default)]
        push: bool,
    },
    GitPush {
        repo: String,
        branch: String,
    },
    GitPull {
        repo: String,
        branch: String,
    },
    GitStashPush {
        repo: String,
        files: Vec<String>,
        #[serde(default)]
        message: String,
    },

    // Conflict workflow
    CheckoutLocalBranch {
        repo: String,
        branch: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote_branch: Option<String>,
    },
    FetchConflictFileDiff {
        repo: String,
        path: String,
        target_branch: String,
    },
    ResolveConflicts {
        repo: String,
        action: ResolveAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files: Option<Vec<String>>,
        #[serde(default)]
        push: bool,
    },
    ConflictState {
        repo: String,
    },
}

fn require(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{} is required", field))
    } else {
        Ok(())
    }
}

fn require_all(values: &[String], field: &str) -> Result<(), String> {
    if values.is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    values.iter().try_for_each(|v| require(v, field))
}

impl ClientMessage {
    /// Wire name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Ping => "ping",
            ClientMessage::Start { .. } => "start",
            ClientMessage::Input { .. } => "input",
            ClientMessage::Resize { .. } => "resize",
            ClientMessage::Stop => "stop",
            ClientMessage::List { .. } => "list",
            ClientMessage::Upload { .. } => "upload",
            ClientMessage::DownloadBatch { .. } => "download-batch",
            ClientMessage::Move { .. } => "move",
            ClientMessage::FetchChangedFiles { .. } => "fetch-changed-files",
            ClientMessage::FetchFileDiff { .. } => "fetch-file-diff",
            ClientMessage::FetchCommitHistory { .. } => "fetch-commit-history",
            ClientMessage::FetchStashes { .. } => "fetch-stashes",
            ClientMessage::GitCommit { .. } => "git-commit",
            ClientMessage::GitPush { .. } => "git-push",
            ClientMessage::GitPull { .. } => "git-pull",
            ClientMessage::GitStashPush { .. } => "git-stash-push",
            ClientMessage::CheckoutLocalBranch { .. } => "checkout-local-branch",
            ClientMessage::FetchConflictFileDiff { .. } => "fetch-conflict-file-diff",
            ClientMessage::ResolveConflicts { .. } => "resolve-conflicts",
            ClientMessage::ConflictState { .. } => "conflict-state",
        }
    }

    /// Boundary checks applied before any handler runs
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ClientMessage::Ping | ClientMessage::Stop | ClientMessage::Input { .. } => Ok(()),
            ClientMessage::Start { session } => session.validate(),
            ClientMessage::Resize { cols, rows } => {
                if (1..=MAX_TERMINAL_DIM).contains(cols) && (1..=MAX_TERMINAL_DIM).contains(rows) {
                    Ok(())
                } else {
                    Err(format!("invalid terminal size {}x{}", cols, rows))
                }
            }
            ClientMessage::List { path, .. } => require(path, "path"),
            ClientMessage::Upload { path, name, .. } => {
                require(path, "path")?;
                require(name, "name")
            }
            ClientMessage::DownloadBatch { paths } => require_all(paths, "paths"),
            ClientMessage::Move { src, dest } => {
                require(src, "src")?;
                require(dest, "dest")
            }
            ClientMessage::FetchChangedFiles { repo }
            | ClientMessage::FetchCommitHistory { repo, .. }
            | ClientMessage::FetchStashes { repo }
            | ClientMessage::ConflictState { repo } => require(repo, "repo"),
            ClientMessage::FetchFileDiff { repo, path, .. } => {
                require(repo, "repo")?;
                require(path, "path")
            }
            ClientMessage::GitCommit {
                repo,
                files,
                message,
                ..
            } => {
                require(repo, "repo")?;
                require_all(files, "files")?;
                require(message, "message")
            }
            ClientMessage::GitPush { repo, branch } | ClientMessage::GitPull { repo, branch } => {
                require(repo, "repo")?;
                require(branch, "branch")
            }
            ClientMessage::GitStashPush { repo, files, .. } => {
                require(repo, "repo")?;
                require_all(files, "files")
            }
            ClientMessage::CheckoutLocalBranch {
                repo,
                branch,
                remote_branch,
            } => {
                require(repo, "repo")?;
                require(branch, "branch")?;
                match remote_branch {
                    Some(remote) => require(remote, "remoteBranch"),
                    None => Ok(()),
                }
            }
            ClientMessage::FetchConflictFileDiff {
                repo,
                path,
                target_branch,
            } => {
                require(repo, "repo")?;
                require(path, "path")?;
                require(target_branch, "targetBranch")
            }
            ClientMessage::ResolveConflicts { repo, files, .. } => {
                require(repo, "repo")?;
                match files {
                    Some(files) => files.iter().try_for_each(|f| require(f, "files")),
                    None => Ok(()),
                }
            }
        }
    }
}

// ============================================================================
// Server -> client
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Hello {
        version: u32,
        connection_id: String,
        capabilities: Vec<String>,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },

    // Terminal
    Output {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    SftpPwd {
        path: String,
    },
    ShellClosed,
    Stopped {
        had_session: bool,
    },

    // Remote files
    ListData {
        path: String,
        entries: Vec<RemoteEntry>,
    },
    UploadResult {
        success: bool,
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    DownloadReady {
        name: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    MoveResult {
        success: bool,
        src: String,
        dest: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    // Git
    ChangedFiles {
        repo: String,
        staged: Vec<FileChange>,
        unstaged: Vec<FileChange>,
    },
    FileDiff {
        repo: String,
        path: String,
        staged: bool,
        text: String,
        truncated: bool,
        hunks: Vec<Hunk>,
    },
    CommitHistory {
        repo: String,
        commits: Vec<Commit>,
    },
    Stashes {
        repo: String,
        stashes: Vec<StashEntry>,
    },
    GitResult {
        repo: String,
        op: String,
        success: bool,
        message: String,
    },
    StashResult {
        repo: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        stash: Option<StashEntry>,
        message: String,
    },

    // Conflict workflow
    CheckoutResult {
        repo: String,
        branch: String,
        success: bool,
        conflict_files: Vec<String>,
        message: String,
    },
    ConflictFileDiff {
        repo: String,
        path: String,
        left: String,
        right: String,
    },
    ConflictResolved {
        repo: String,
        action: ResolveAction,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stash: Option<StashEntry>,
        status: ChangedFiles,
        branches: BranchList,
    },
    ConflictState {
        repo: String,
        state: ConflictSnapshot,
    },
}

/// Body of `GET /api/repos/{repo}/branches`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchesResponse {
    pub local: Vec<Branch>,
    pub remote: Vec<Branch>,
}

impl From<BranchList> for BranchesResponse {
    fn from(list: BranchList) -> Self {
        Self {
            local: list.local,
            remote: list.remote,
        }
    }
}
