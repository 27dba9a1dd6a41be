use tracing::warn;

use crate::server::context::{AppError, HandlerContext};
use crate::server::git::{GitError, GitOpResult};
use crate::server::protocol::{ClientMessage, ServerMessage};

/// Failed commands become `success: false` replies; rejected input is an error event
fn op_outcome(
    repo: &str,
    op: &str,
    result: Result<GitOpResult, GitError>,
) -> Result<GitOpResult, AppError> {
    match result {
        Ok(done) => Ok(done),
        Err(e @ GitError::Invalid(_)) => Err(e.into()),
        Err(e) => {
            warn!(repo, op, "Git operation failed: {}", e);
            Ok(GitOpResult::failed(&e))
        }
    }
}

async fn send_op_result(ctx: &HandlerContext, repo: &str, op: &str, result: GitOpResult) {
    ctx.send(ServerMessage::GitResult {
        repo: repo.to_string(),
        op: op.to_string(),
        success: result.success,
        message: result.message,
    })
    .await;
}

/// Repository queries and mutations
pub async fn handle_git_message(
    client_msg: &ClientMessage,
    ctx: &HandlerContext,
) -> Result<bool, AppError> {
    match client_msg {
        ClientMessage::FetchChangedFiles { repo } => {
            let config = ctx.resolve_repo(repo)?;
            let files = ctx.git().changed_files(&config.path).await?;
            ctx.send(ServerMessage::ChangedFiles {
                repo: repo.clone(),
                staged: files.staged,
                unstaged: files.unstaged,
            })
            .await;
            Ok(true)
        }

        ClientMessage::FetchFileDiff { repo, path, staged } => {
            let config = ctx.resolve_repo(repo)?;
            let diff = ctx.git().file_diff(&config.path, path, *staged).await?;
            ctx.send(ServerMessage::FileDiff {
                repo: repo.clone(),
                path: diff.path,
                staged: diff.staged,
                text: diff.text,
                truncated: diff.truncated,
                hunks: diff.diff.hunks,
            })
            .await;
            Ok(true)
        }

        ClientMessage::FetchCommitHistory { repo, branches } => {
            let config = ctx.resolve_repo(repo)?;
            let log = ctx.git().commit_history(&config.path, branches).await?;
            ctx.send(ServerMessage::CommitHistory {
                repo: repo.clone(),
                commits: log.commits,
            })
            .await;
            Ok(true)
        }

        ClientMessage::FetchStashes { repo } => {
            let config = ctx.resolve_repo(repo)?;
            let stashes = ctx.git().stash_list(&config.path).await?;
            ctx.send(ServerMessage::Stashes {
                repo: repo.clone(),
                stashes,
            })
            .await;
            Ok(true)
        }

        ClientMessage::GitCommit {
            repo,
            files,
            message,
            push,
        } => {
            let config = ctx.resolve_repo(repo)?;
            let result = ctx
                .git()
                .commit(&config.path, &config.remote, files, message, *push)
                .await;
            let result = op_outcome(repo, "commit", result)?;
            send_op_result(ctx, repo, "commit", result).await;
            Ok(true)
        }

        ClientMessage::GitPush { repo, branch } => {
            let config = ctx.resolve_repo(repo)?;
            let result = ctx.git().push(&config.path, &config.remote, branch).await;
            let result = op_outcome(repo, "push", result)?;
            send_op_result(ctx, repo, "push", result).await;
            Ok(true)
        }

        ClientMessage::GitPull { repo, branch } => {
            let config = ctx.resolve_repo(repo)?;
            let result = ctx.git().pull(&config.path, &config.remote, branch).await;
            if result.is_err() {
                // A pull that stops on conflicts is a workflow branch, not a fault
                let unmerged = ctx.git().unmerged_files(&config.path).await.unwrap_or_default();
                if !unmerged.is_empty() {
                    return Err(AppError::ConflictDetected(unmerged));
                }
            }
            let result = op_outcome(repo, "pull", result)?;
            send_op_result(ctx, repo, "pull", result).await;
            Ok(true)
        }

        ClientMessage::GitStashPush {
            repo,
            files,
            message,
        } => {
            let config = ctx.resolve_repo(repo)?;
            let reply = match ctx.git().stash_push(&config.path, files, message).await {
                Ok(result) => ServerMessage::StashResult {
                    repo: repo.clone(),
                    success: result.success,
                    stash: result.stash,
                    message: result.message,
                },
                Err(e @ GitError::Invalid(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(repo = %repo, "Stash failed: {}", e);
                    ServerMessage::StashResult {
                        repo: repo.clone(),
                        success: false,
                        stash: None,
                        message: e.reason(),
                    }
                }
            };
            ctx.send(reply).await;
            Ok(true)
        }

        _ => Ok(false),
    }
}
