// SPDX-License-Identifier: GPL-3.0-only
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::api::handlers::{ApiError, ApiHandlers, ApiResponse};
use crate::installer::{InstallEvent, JobKind};
use crate::version::VersionSnapshot;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum WsMessage {
    GetVersions,
    GetUpdates,
    RefreshVersions,
    StartUpdate { kind: JobKind },
    CancelUpdates,
}

#[derive(Debug, Serialize, Deserialize)]
struct WsResponse {
    success: bool,
    data: Option<serde_json::Value>,
    error: Option<String>,
}

/// Pushed to every client without being asked.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsEvent {
    Install(InstallEvent),
    Snapshot(VersionSnapshot),
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(handlers): State<Arc<ApiHandlers>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, handlers))
}

fn send_json<T: Serialize>(tx: &mpsc::UnboundedSender<Message>, value: &T) -> anyhow::Result<()> {
    tx.send(Message::Text(serde_json::to_string(value)?))?;
    Ok(())
}

async fn handle_socket(socket: WebSocket, handlers: Arc<ApiHandlers>) {
    let (sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let ctx = Arc::clone(handlers.context());
    let installs = ctx.installer.subscribe();
    let mut snapshots = ctx.snapshot.subscribe();

    let current = Arc::clone(&snapshots.borrow_and_update());
    let mut greeting = vec![WsEvent::Snapshot(VersionSnapshot::clone(&current))];
    greeting.extend(ctx.installer.states().into_iter().map(WsEvent::Install));
    for event in &greeting {
        if let Err(e) = send_json(&tx, event) {
            error!(error = %e, "Failed to queue WebSocket greeting");
            return;
        }
    }

    let mut send_task = tokio::spawn(async move {
        let mut sender = sender;
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sender.send(msg).await {
                debug!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    let events_tx = tx.clone();
    let mut events_task = tokio::spawn(forward_events(installs, snapshots, events_tx));

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = handle_message(text, &handlers, &tx).await {
                        error!(error = %e, "Failed to handle WebSocket message");
                    }
                }
                Message::Close(_) => {
                    info!("WebSocket connection closed");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
            events_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
            events_task.abort();
        }
        _ = (&mut events_task) => {
            send_task.abort();
            recv_task.abort();
        }
    };
}

async fn forward_events(
    mut installs: broadcast::Receiver<InstallEvent>,
    mut snapshots: watch::Receiver<Arc<VersionSnapshot>>,
    tx: mpsc::UnboundedSender<Message>,
) {
    loop {
        let event = tokio::select! {
            received = installs.recv() => match received {
                Ok(event) => WsEvent::Install(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagging behind install events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = Arc::clone(&snapshots.borrow_and_update());
                WsEvent::Snapshot(VersionSnapshot::clone(&snapshot))
            }
        };

        if send_json(&tx, &event).is_err() {
            break;
        }
    }
}

fn to_ws_response<T: Serialize>(result: Result<Json<ApiResponse<T>>, ApiError>) -> WsResponse {
    match result {
        Ok(Json(api_response)) => WsResponse {
            success: api_response.success,
            data: api_response.data.map(|v| serde_json::to_value(v).unwrap_or_default()),
            error: api_response.error,
        },
        Err(e) => WsResponse {
            success: false,
            data: None,
            error: Some(e.message().to_string()),
        },
    }
}

async fn handle_message(
    text: String,
    handlers: &ApiHandlers,
    tx: &mpsc::UnboundedSender<Message>,
) -> anyhow::Result<()> {
    let msg: WsMessage = match serde_json::from_str(&text) {
        Ok(m) => m,
        Err(e) => {
            let response = WsResponse {
                success: false,
                data: None,
                error: Some(format!("Invalid message format: {}", e)),
            };
            return send_json(tx, &response);
        }
    };

    let response = match msg {
        WsMessage::GetVersions => to_ws_response(handlers.versions().await),
        WsMessage::RefreshVersions => to_ws_response(handlers.refresh_versions().await),
        WsMessage::GetUpdates => to_ws_response(handlers.update_states().await),
        WsMessage::StartUpdate { kind } => to_ws_response(handlers.start_update(kind).await),
        WsMessage::CancelUpdates => to_ws_response(handlers.cancel_updates().await),
    };

    send_json(tx, &response)
}
