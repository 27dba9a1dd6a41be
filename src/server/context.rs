//! Shared context and error type
//!
//! Handlers receive one `HandlerContext` per connection and return `AppError`,
//! which the dispatch layer turns into `ServerMessage::Error`.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::config::{RepoConfig, ServerConfig};
use crate::server::channel_registry::{FileHandle, SharedChannelRegistry};
use crate::server::conflict::{ConflictError, ConflictTracker};
use crate::server::file_transfer::TransferError;
use crate::server::git::{GitCli, GitError};
use crate::server::protocol::ServerMessage;
use crate::server::ssh::{BridgeError, RemoteConnector};

/// Process-wide state shared by every connection
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub git: GitCli,
    pub registry: SharedChannelRegistry,
    pub connector: Arc<dyn RemoteConnector>,
}

/// Handler context: everything one connection's handlers need
#[derive(Clone)]
pub struct HandlerContext {
    pub connection_id: String,
    pub state: AppState,
    /// Conflict workflows of this connection
    pub conflicts: Arc<Mutex<ConflictTracker>>,
    /// Queue drained by the connection's writer task
    pub outbound: mpsc::Sender<ServerMessage>,
}

impl HandlerContext {
    pub fn new(
        connection_id: String,
        state: AppState,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            connection_id,
            state,
            conflicts: Arc::new(Mutex::new(ConflictTracker::new())),
            outbound,
        }
    }

    /// Queue a message for this connection; a closed queue means the client is gone
    pub async fn send(&self, msg: ServerMessage) {
        if self.outbound.send(msg).await.is_err() {
            debug!(connection = %self.connection_id, "Outbound queue closed, dropping message");
        }
    }

    pub fn git(&self) -> &GitCli {
        &self.state.git
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Look up a configured repository by name
    pub fn resolve_repo(&self, name: &str) -> Result<RepoConfig, AppError> {
        resolve_repo(&self.state.config, name)
    }

    /// File-transfer handle of this connection's binding
    pub async fn file_handle(&self) -> Result<FileHandle, AppError> {
        self.state
            .registry
            .lock()
            .await
            .file_handle(&self.connection_id)
            .ok_or_else(|| AppError::NotFound("no active session".to_string()))
    }
}

pub fn resolve_repo(config: &ServerConfig, name: &str) -> Result<RepoConfig, AppError> {
    config
        .repo(name)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("repository '{}'", name)))
}

/// Unified application error, converted to `ServerMessage::Error` by dispatch
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Connection failed: {0}")]
    ConnectFailure(String),

    #[error("Command failed: {0}")]
    SubprocessFailure(String),

    #[error("Conflicts detected in {} file(s)", .0.len())]
    ConflictDetected(Vec<String>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Protocol error code
    pub fn code(&self) -> &str {
        match self {
            AppError::AuthFailure(_) => "auth_failed",
            AppError::ConnectFailure(_) => "connect_failed",
            AppError::SubprocessFailure(_) => "subprocess_failed",
            AppError::ConflictDetected(_) => "conflict_detected",
            AppError::NotFound(_) => "not_found",
            AppError::Invalid(_) => "invalid_request",
            AppError::Unsupported(_) => "unsupported",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn to_server_error(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<GitError> for AppError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::NotAGitRepo(path) => AppError::NotFound(format!("git repository at {}", path)),
            GitError::Invalid(msg) => AppError::Invalid(msg),
            other => AppError::SubprocessFailure(other.to_string()),
        }
    }
}

impl From<BridgeError> for AppError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Invalid(msg) => AppError::Invalid(msg),
            BridgeError::NotFound(what) => AppError::NotFound(what),
            other => AppError::ConnectFailure(other.to_string()),
        }
    }
}

impl From<TransferError> for AppError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Invalid(msg) => AppError::Invalid(msg),
            TransferError::Remote(inner) => inner.into(),
            TransferError::Archive(msg) => AppError::Internal(msg),
        }
    }
}

impl From<ConflictError> for AppError {
    fn from(e: ConflictError) -> Self {
        match e {
            ConflictError::NoConflict => {
                AppError::Invalid("No unresolved conflicts for this repository".to_string())
            }
            ConflictError::Invalid(msg) => AppError::Invalid(msg),
            ConflictError::Unsupported(msg) => AppError::Unsupported(msg),
            ConflictError::Failed(msg) => AppError::SubprocessFailure(msg),
            ConflictError::Git(inner) => inner.into(),
        }
    }
}
