//! WebSocket control plane and read-only REST API.
//!
//! Every WebSocket client receives every supervisor event. Requests from a
//! client run in their own task, so a slow clone for one bot never delays
//! events or requests for another; their replies go back to that client only.

use crate::controller::{Controller, describe_error};
use crate::hub::Delivery;
use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use botvisor_core::{BotError, ClientMessage, ProcessManager, ServerMessage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the axum router. Static files from `public_dir` answer every path
/// the API does not claim.
pub fn router<M: ProcessManager>(
    controller: Arc<Controller<M>>,
    public_dir: Option<&std::path::Path>,
) -> Router {
    let mut app = Router::new()
        .route("/ws", get(ws_upgrade::<M>))
        .route("/api/health", get(api_health))
        .route("/api/bots", get(api_bots::<M>))
        .route("/api/logs/{name}", get(api_log::<M>));

    if let Some(dir) = public_dir {
        if dir.exists() {
            info!("Serving static files from {}", dir.display());
            app = app.fallback_service(
                tower_http::services::ServeDir::new(dir).append_index_html_on_directories(true),
            );
        } else {
            warn!("Public dir not found: {}", dir.display());
        }
    }

    app.with_state(controller)
}

// ── WebSocket ──────────────────────────────────────────────────────────

async fn ws_upgrade<M: ProcessManager>(
    ws: WebSocketUpgrade,
    State(controller): State<Arc<Controller<M>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, controller))
}

async fn handle_ws<M: ProcessManager>(mut socket: WebSocket, controller: Arc<Controller<M>>) {
    info!("Client connected");
    let mut events = controller.hub().subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();

    loop {
        let outgoing = tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        dispatch(&controller, text.as_str(), &reply_tx);
                        continue;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ping/Pong handled by axum
                    Some(Err(e)) => {
                        debug!("WebSocket receive failed: {}", e);
                        break;
                    }
                }
            }
            delivery = events.recv() => {
                match delivery {
                    Some(Delivery::Event(event)) => ServerMessage::from(event),
                    Some(Delivery::Missed(n)) => {
                        warn!("WebSocket client lagged, {} events dropped", n);
                        ServerMessage::error(format!(
                            "Connection fell behind, {n} events were not delivered"
                        ))
                    }
                    None => break,
                }
            }
            Some(reply) = reply_rx.recv() => reply,
        };

        if let Err(e) = send(&mut socket, &outgoing).await {
            debug!("WebSocket send failed, closing connection: {}", e);
            break;
        }
    }

    let _ = socket.send(WsMessage::Close(None)).await;
    info!("Client disconnected");
}

/// Parse one text frame and run it in the background
fn dispatch<M: ProcessManager>(
    controller: &Arc<Controller<M>>,
    text: &str,
    replies: &mpsc::UnboundedSender<ServerMessage>,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            let _ = replies.send(ServerMessage::error(format!("Invalid message: {e}")));
            return;
        }
    };

    let controller = controller.clone();
    let replies = replies.clone();
    tokio::spawn(async move {
        let reply = match controller.handle(message.clone()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Request {:?} failed: {}", message, e);
                Some(ServerMessage::error(describe_error(&message, &e)))
            }
        };
        if let Some(reply) = reply {
            // The client may have disconnected meanwhile
            let _ = replies.send(reply);
        }
    });
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    tokio::time::timeout(WS_SEND_TIMEOUT, socket.send(WsMessage::Text(json.into()))).await??;
    Ok(())
}

// ── REST ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogResponse {
    bot_name: String,
    log: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

async fn api_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn api_bots<M: ProcessManager>(State(controller): State<Arc<Controller<M>>>) -> Response {
    match controller.list_bots().await {
        Ok(bots) => Json(bots).into_response(),
        Err(e) => {
            warn!("Failed to list bots: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read bot directory",
            )
        }
    }
}

async fn api_log<M: ProcessManager>(
    State(controller): State<Arc<Controller<M>>>,
    Path(name): Path<String>,
) -> Response {
    match controller.read_log(&name).await {
        Ok(log) => Json(LogResponse {
            bot_name: name,
            log,
        })
        .into_response(),
        Err(BotError::NotFound(_)) | Err(BotError::InvalidName(_)) => {
            error_response(StatusCode::NOT_FOUND, "Log not found")
        }
        Err(e) => {
            warn!("Failed to read log of bot {}: {}", name, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read log")
        }
    }
}
