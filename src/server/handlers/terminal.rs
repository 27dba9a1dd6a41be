use tracing::info;

use crate::server::channel_registry;
use crate::server::context::{AppError, HandlerContext};
use crate::server::protocol::{ClientMessage, ServerMessage};
use crate::server::ssh::{PtyRequest, SshTarget};

/// Shell lifecycle: start, input, resize, stop
pub async fn handle_terminal_message(
    client_msg: &ClientMessage,
    ctx: &HandlerContext,
) -> Result<bool, AppError> {
    match client_msg {
        ClientMessage::Start { session } => {
            let ssh = &ctx.config().ssh;
            let target = SshTarget::from_descriptor(session, &ssh.platform_users)?;
            let pty = PtyRequest {
                term: ssh.term.clone(),
                cols: ssh.cols,
                rows: ssh.rows,
            };

            info!(connection = %ctx.connection_id, ssh = ?target, "Starting remote session");
            let pwd = channel_registry::start_session(
                &ctx.state.registry,
                ctx.state.connector.as_ref(),
                &ctx.connection_id,
                &target,
                &pty,
                ctx.outbound.clone(),
            )
            .await?;

            ctx.send(ServerMessage::SftpPwd { path: pwd }).await;
            Ok(true)
        }

        ClientMessage::Input { data } => {
            channel_registry::send_input(&ctx.state.registry, &ctx.connection_id, data).await;
            Ok(true)
        }

        ClientMessage::Resize { cols, rows } => {
            channel_registry::resize(&ctx.state.registry, &ctx.connection_id, *cols, *rows).await;
            Ok(true)
        }

        ClientMessage::Stop => {
            let had_session = channel_registry::teardown(&ctx.state.registry, &ctx.connection_id).await;
            ctx.send(ServerMessage::Stopped { had_session }).await;
            Ok(true)
        }

        _ => Ok(false),
    }
}
