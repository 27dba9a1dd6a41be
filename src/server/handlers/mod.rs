//! Client message handlers
//!
//! Each domain handler returns `Ok(true)` when it consumed the message, so
//! `dispatch` can try them in turn. Replies go through `HandlerContext::send`.

pub mod conflict;
pub mod file;
pub mod git;
pub mod terminal;

use tracing::{debug, warn};

use crate::server::context::{AppError, HandlerContext};
use crate::server::protocol::{ClientMessage, ServerMessage};

/// Validate and route one client message. Failures are reported to the
/// client as a single `error` event.
pub async fn dispatch(msg: ClientMessage, ctx: &HandlerContext) {
    let kind = msg.kind();
    debug!(connection = %ctx.connection_id, kind, "Handling client message");

    if let Err(e) = route(&msg, ctx).await {
        warn!(connection = %ctx.connection_id, kind, code = e.code(), "Request failed: {}", e);
        ctx.send(e.to_server_error()).await;
    }
}

async fn route(msg: &ClientMessage, ctx: &HandlerContext) -> Result<(), AppError> {
    msg.validate().map_err(AppError::Invalid)?;

    if let ClientMessage::Ping = msg {
        ctx.send(ServerMessage::Pong).await;
        return Ok(());
    }
    if terminal::handle_terminal_message(msg, ctx).await? {
        return Ok(());
    }
    if file::handle_file_message(msg, ctx).await? {
        return Ok(());
    }
    if git::handle_git_message(msg, ctx).await? {
        return Ok(());
    }
    if conflict::handle_conflict_message(msg, ctx).await? {
        return Ok(());
    }
    Err(AppError::Internal(format!("no handler for '{}'", msg.kind())))
}
