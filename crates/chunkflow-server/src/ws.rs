use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use chunkflow_state::StateEvent;

use crate::server::AppState;

/// GET `/ws`: upgrade and stream state changes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Wire shape of a [`StateEvent`].
fn wire_message(event: &StateEvent) -> serde_json::Value {
    match event {
        StateEvent::WorkUnitUpdate {
            chunk,
            status,
            phase,
            attention_reason,
        } => json!({
            "type": "work_unit_update",
            "data": {
                "chunk": chunk,
                "status": status,
                "phase": phase,
                "attention_reason": attention_reason,
            },
        }),
        StateEvent::AttentionUpdate {
            action,
            chunk,
            reason,
        } => json!({
            "type": "attention_update",
            "data": {
                "action": action,
                "chunk": chunk,
                "reason": reason,
            },
        }),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so no update is lost in between; clients
    // must tolerate a duplicate delta around the snapshot boundary.
    let mut events = state.store.subscribe();

    let initial = {
        let work_units = state.store.list_work_units(None).unwrap_or_default();
        let attention_items = state.attention_items();
        json!({
            "type": "initial_state",
            "data": {
                "work_units": work_units,
                "attention_items": attention_items,
            },
        })
    };
    if sender
        .send(Message::Text(initial.to_string().into()))
        .await
        .is_err()
    {
        return;
    }
    info!(connection_id = %connection_id, "WebSocket connected");

    // Forward broadcast events until either side closes. Lagged receivers
    // skip missed events; clients reconcile via /status and /work-units.
    let forward = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let text = wire_message(&event).to_string();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(connection_id = %connection_id, skipped, "WebSocket client lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    let drain = async {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
            // Heartbeats and client chatter are ignored.
        }
    };

    tokio::select! {
        () = forward => {},
        () = drain => {},
    }

    info!(connection_id = %connection_id, "WebSocket disconnected");
}
