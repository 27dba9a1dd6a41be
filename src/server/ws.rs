use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::AuthSection;
use crate::server::channel_registry;
use crate::server::context::{resolve_repo, AppError, AppState, HandlerContext};
use crate::server::handlers;
use crate::server::protocol::{
    BranchesResponse, ClientMessage, ServerMessage, CAPABILITIES, PROTOCOL_VERSION,
};

/// Messages queued for one client before handlers start waiting on the writer
const OUTBOUND_BUFFER: usize = 256;
const INBOUND_BUFFER: usize = 64;

/// Build the HTTP router: `/ws`, the branch listing and the health probe
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/repos/:repo/branches", get(branches_handler))
        .route("/healthz", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C
pub async fn run_server(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "Listening on ws://{}/ws (protocol v{})",
        addr, PROTOCOL_VERSION
    );
    if state.config.auth.disabled {
        warn!("Authentication is disabled, every client is accepted");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

/// Serve on an already bound listener (used by integration tests)
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// ============================================================================
// Authentication
// ============================================================================

/// Bearer token from the `Authorization` header, else the `token` query parameter
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
        })
        .filter(|t| !t.is_empty());

    from_header.or_else(|| query.get("token").map(|t| t.trim().to_string()).filter(|t| !t.is_empty()))
}

pub fn authorize(
    auth: &AuthSection,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<(), AppError> {
    if auth.disabled {
        return Ok(());
    }
    match extract_token(headers, query) {
        None => Err(AppError::AuthFailure("missing bearer token".to_string())),
        Some(token) if auth.tokens.iter().any(|t| *t == token) => Ok(()),
        Some(_) => Err(AppError::AuthFailure("invalid token".to_string())),
    }
}

fn error_response(err: AppError) -> Response {
    let status = match &err {
        AppError::AuthFailure(_) => StatusCode::UNAUTHORIZED,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Invalid(_) => StatusCode::BAD_REQUEST,
        AppError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = serde_json::json!({
        "code": err.code(),
        "message": err.to_string(),
    });
    (status, Json(body)).into_response()
}

// ============================================================================
// HTTP endpoints
// ============================================================================

async fn branches_handler(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(e) = authorize(&state.config.auth, &headers, &query) {
        warn!(repo = %repo, "Rejected branch listing: {}", e);
        return error_response(e);
    }
    let config = match resolve_repo(&state.config, &repo) {
        Ok(config) => config,
        Err(e) => return error_response(e),
    };
    if let Err(e) = state.git.ensure_repo(&config.path).await {
        return error_response(e.into());
    }
    match state.git.branches(&config.path).await {
        Ok(list) => Json(BranchesResponse::from(list)).into_response(),
        Err(e) => {
            warn!(repo = %repo, "Branch listing failed: {}", e);
            error_response(e.into())
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.registry.lock().await.len();
    Json(serde_json::json!({
        "status": "ok",
        "version": PROTOCOL_VERSION,
        "sessions": sessions,
    }))
}

// ============================================================================
// WebSocket
// ============================================================================

/// WebSocket upgrade handler; credentials are checked before upgrading
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(e) = authorize(&state.config.auth, &headers, &query) {
        warn!("Rejected WebSocket upgrade: {}", e);
        return error_response(e);
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

enum Inbound {
    Message(ClientMessage),
    Malformed(String),
}

fn decode_frame(msg: Message) -> Option<Inbound> {
    match msg {
        Message::Binary(data) => {
            trace!("Received binary client message: {} bytes", data.len());
            Some(match rmp_serde::from_slice::<ClientMessage>(&data) {
                Ok(msg) => Inbound::Message(msg),
                Err(e) => Inbound::Malformed(format!("Malformed message: {}", e)),
            })
        }
        Message::Text(_) => Some(Inbound::Malformed(
            "Text frames are not supported, binary MessagePack expected".to_string(),
        )),
        // Handled by axum
        Message::Ping(_) | Message::Pong(_) => None,
        Message::Close(_) => None,
    }
}

/// Handle one WebSocket connection until the client goes away
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection = %connection_id, "New WebSocket connection established");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let (in_tx, mut in_rx) = mpsc::channel::<Inbound>(INBOUND_BUFFER);
    let (closed_tx, mut closed_rx) = watch::channel(false);

    // Writer: the only task touching the sink
    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            // to_vec_named keeps field names so clients see maps, not arrays
            let bytes = match rmp_serde::to_vec_named(&msg) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(connection = %writer_id, "Failed to encode server message: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Binary(bytes)).await {
                debug!(connection = %writer_id, "Socket send failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: decodes frames and flags disconnects
    let reader_id = connection_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(_)) => {
                    info!(connection = %reader_id, "WebSocket connection closed by client");
                    break;
                }
                Ok(msg) => {
                    if let Some(inbound) = decode_frame(msg) {
                        if in_tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(connection = %reader_id, "WebSocket error: {}", e);
                    break;
                }
            }
        }
        let _ = closed_tx.send(true);
    });

    let ctx = HandlerContext::new(connection_id.clone(), state.clone(), out_tx);
    ctx.send(ServerMessage::Hello {
        version: PROTOCOL_VERSION,
        connection_id: connection_id.clone(),
        capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
    })
    .await;

    // Events run one at a time; a disconnect drops the in-flight handler
    while let Some(inbound) = in_rx.recv().await {
        match inbound {
            Inbound::Malformed(reason) => {
                warn!(connection = %connection_id, "{}", reason);
                ctx.send(AppError::Invalid(reason).to_server_error()).await;
            }
            Inbound::Message(msg) => {
                tokio::select! {
                    _ = handlers::dispatch(msg, &ctx) => {}
                    _ = closed_rx.wait_for(|closed| *closed) => {
                        info!(connection = %connection_id, "Client left during a request, cancelling it");
                        break;
                    }
                }
            }
        }
    }

    reader.abort();
    if channel_registry::teardown(&state.registry, &connection_id).await {
        info!(connection = %connection_id, "Released remote session on disconnect");
    }
    drop(ctx);
    if tokio::time::timeout(std::time::Duration::from_secs(2), writer).await.is_err() {
        debug!(connection = %connection_id, "Writer did not drain in time");
    }
    info!(connection = %connection_id, "WebSocket connection handler finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth.parse().unwrap());
        headers
    }

    fn query(token: &str) -> HashMap<String, String> {
        HashMap::from([("token".to_string(), token.to_string())])
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            extract_token(&headers("Bearer abc"), &HashMap::new()).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_token(&headers("bearer  abc "), &HashMap::new()).as_deref(),
            Some("abc")
        );
        assert_eq!(extract_token(&HeaderMap::new(), &query("q1")).as_deref(), Some("q1"));
        // Header wins over query
        assert_eq!(extract_token(&headers("Bearer h"), &query("q")).as_deref(), Some("h"));
        assert_eq!(extract_token(&headers("Basic xyz"), &HashMap::new()), None);
        assert_eq!(extract_token(&HeaderMap::new(), &query("")), None);
    }

    #[test]
    fn test_authorize() {
        let auth = AuthSection {
            tokens: vec!["secret".to_string()],
            disabled: false,
        };
        assert!(authorize(&auth, &headers("Bearer secret"), &HashMap::new()).is_ok());
        assert!(authorize(&auth, &HeaderMap::new(), &query("secret")).is_ok());

        let err = authorize(&auth, &headers("Bearer nope"), &HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "auth_failed");
        assert!(authorize(&auth, &HeaderMap::new(), &HashMap::new()).is_err());

        let open = AuthSection {
            tokens: Vec::new(),
            disabled: true,
        };
        assert!(authorize(&open, &HeaderMap::new(), &HashMap::new()).is_ok());
    }

    #[test]
    fn test_decode_frame() {
        let bytes = rmp_serde::to_vec_named(&ClientMessage::Ping).unwrap();
        assert!(matches!(
            decode_frame(Message::Binary(bytes)),
            Some(Inbound::Message(ClientMessage::Ping))
        ));
        assert!(matches!(
            decode_frame(Message::Binary(vec![0xc1])),
            Some(Inbound::Malformed(_))
        ));
        assert!(decode_frame(Message::Ping(Vec::new())).is_none());
    }
}
