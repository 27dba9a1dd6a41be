use tracing::warn;

use crate::server::context::{AppError, HandlerContext};
use crate::server::conflict::ConflictError;
use crate::server::git::GitError;
use crate::server::protocol::{ClientMessage, ServerMessage};

/// Branch switch and conflict resolution workflow
pub async fn handle_conflict_message(
    client_msg: &ClientMessage,
    ctx: &HandlerContext,
) -> Result<bool, AppError> {
    match client_msg {
        ClientMessage::CheckoutLocalBranch {
            repo,
            branch,
            remote_branch,
        } => {
            let config = ctx.resolve_repo(repo)?;
            let mut conflicts = ctx.conflicts.lock().await;
            let report = conflicts
                .workflow(repo)
                .checkout(ctx.git(), &config, branch, remote_branch.as_deref())
                .await;
            drop(conflicts);

            let reply = match report {
                Ok(report) => ServerMessage::CheckoutResult {
                    repo: repo.clone(),
                    branch: branch.clone(),
                    success: report.success,
                    conflict_files: report.conflict_files,
                    message: report.message,
                },
                Err(ConflictError::Git(e)) if !matches!(e, GitError::Invalid(_)) => {
                    warn!(repo = %repo, branch = %branch, "Checkout failed: {}", e);
                    ServerMessage::CheckoutResult {
                        repo: repo.clone(),
                        branch: branch.clone(),
                        success: false,
                        conflict_files: Vec::new(),
                        message: e.reason(),
                    }
                }
                Err(e) => return Err(e.into()),
            };
            ctx.send(reply).await;
            Ok(true)
        }

        ClientMessage::FetchConflictFileDiff {
            repo,
            path,
            target_branch,
        } => {
            let config = ctx.resolve_repo(repo)?;
            let mut conflicts = ctx.conflicts.lock().await;
            let pair = conflicts
                .workflow(repo)
                .file_diff(ctx.git(), &config, path, target_branch)
                .await;
            drop(conflicts);
            let pair = pair?;

            ctx.send(ServerMessage::ConflictFileDiff {
                repo: repo.clone(),
                path: path.clone(),
                left: pair.left,
                right: pair.right,
            })
            .await;
            Ok(true)
        }

        ClientMessage::ResolveConflicts {
            repo,
            action,
            files,
            push,
        } => {
            let config = ctx.resolve_repo(repo)?;
            let mut conflicts = ctx.conflicts.lock().await;
            let report = conflicts
                .workflow(repo)
                .resolve(ctx.git(), &config, *action, files.as_deref(), *push)
                .await;
            drop(conflicts);
            let report = report?;

            ctx.send(ServerMessage::ConflictResolved {
                repo: repo.clone(),
                action: report.action,
                message: report.message,
                stash: report.stash,
                status: report.status,
                branches: report.branches,
            })
            .await;
            Ok(true)
        }

        ClientMessage::ConflictState { repo } => {
            ctx.resolve_repo(repo)?;
            let state = ctx.conflicts.lock().await.snapshot(repo);
            ctx.send(ServerMessage::ConflictState {
                repo: repo.clone(),
                state,
            })
            .await;
            Ok(true)
        }

        _ => Ok(false),
    }
}
