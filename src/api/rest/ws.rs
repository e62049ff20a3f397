use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};

use crate::broadcast::Topic;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubscribeParams {
    topic: Option<String>,
}

/// Subscription boundary. A client connects with
/// `/ws?topic=drivers|driver:<uuid>|order:<uuid>` and receives one snapshot
/// message followed by the entity's ordered event stream. Sequence numbers
/// in the events let the client spot a gap and reconnect for a fresh
/// snapshot.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SubscribeParams>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let topic: Topic = params
        .topic
        .as_deref()
        .unwrap_or("drivers")
        .parse()
        .map_err(AppError::InvalidInput)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, topic)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, topic: Topic) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the snapshot so nothing published in between
    // is lost; the client dedupes overlap by sequence number.
    let mut events = BroadcastStream::new(state.broadcaster.subscribe());

    info!(?topic, "websocket client connected");

    let snapshot = match topic {
        Topic::AllDrivers => json!({ "snapshot": { "drivers": state.drivers.list() } }),
        Topic::Driver(id) => {
            json!({ "snapshot": { "driver": state.drivers.snapshot(id).ok() } })
        }
        Topic::Order(id) => json!({ "snapshot": { "order": state.orders.snapshot(id).ok() } }),
    };
    if sender
        .send(Message::Text(snapshot.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let send_task = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                // Fell behind the ring buffer: tell the client to resync.
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket subscriber lagged");
                    let notice = json!({ "lagged": skipped });
                    if sender
                        .send(Message::Text(notice.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    continue;
                }
            };

            if !topic.matches(&event) {
                continue;
            }

            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
