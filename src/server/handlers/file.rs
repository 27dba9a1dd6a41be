use tracing::info;

use crate::server::context::{AppError, HandlerContext};
use crate::server::file_transfer;
use crate::server::protocol::{ClientMessage, ServerMessage};

/// Remote file operations over the bound session's SFTP channel
pub async fn handle_file_message(
    client_msg: &ClientMessage,
    ctx: &HandlerContext,
) -> Result<bool, AppError> {
    match client_msg {
        ClientMessage::List { path, refresh } => {
            let handle = ctx.file_handle().await?;
            let entries = file_transfer::list(&handle, path, *refresh).await?;
            ctx.send(ServerMessage::ListData {
                path: path.clone(),
                entries,
            })
            .await;
            Ok(true)
        }

        ClientMessage::Upload { path, name, data } => {
            let handle = ctx.file_handle().await?;
            let uploaded = file_transfer::upload(&handle, path, name, data).await?;
            ctx.send(ServerMessage::UploadResult {
                success: true,
                path: uploaded,
                message: None,
            })
            .await;
            Ok(true)
        }

        ClientMessage::DownloadBatch { paths } => {
            let handle = ctx.file_handle().await?;
            let (name, data) = file_transfer::download_batch(&handle, paths).await?;
            info!(connection = %ctx.connection_id, archive = %name, bytes = data.len(), "Archive ready");
            ctx.send(ServerMessage::DownloadReady { name, data }).await;
            Ok(true)
        }

        ClientMessage::Move { src, dest } => {
            let handle = ctx.file_handle().await?;
            file_transfer::move_path(&handle, src, dest).await?;
            ctx.send(ServerMessage::MoveResult {
                success: true,
                src: src.clone(),
                dest: dest.clone(),
                message: None,
            })
            .await;
            Ok(true)
        }

        _ => Ok(false),
    }
}
