//! Live category feed over WebSocket.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use domain::{CATEGORY_TOPIC, TopicMessage};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use store::Store;
use tokio::sync::{broadcast, mpsc};

use crate::state::AppState;

/// Outbound frames buffered per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// GET /ws/categories
pub async fn categories<S: Store + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<S: Store + 'static>(socket: WebSocket, state: Arc<AppState<S>>) {
    // Subscribe before the snapshot so no change falls in between.
    let updates = state.hub.subscribe();
    metrics::gauge!("ws_connections").increment(1.0);
    tracing::info!("category feed connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Value>(OUTBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                tracing::debug!("category feed sink closed");
                break;
            }
        }
    });

    let _ = tx
        .send(json!({
            "type": "connection_established",
            "message": "WebSocket connection established",
        }))
        .await;

    match state.catalog.category_tree().await {
        Ok(tree) => {
            let _ = tx
                .send(json!({
                    "type": "categories_list",
                    "message": "Current categories at connection time",
                    "categories": tree,
                }))
                .await;
        }
        Err(e) => tracing::warn!(error = %e, "failed to load categories for feed"),
    }

    let forward_task = tokio::spawn(forward_updates(updates, tx.clone()));

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(reply) = reply_to(text.as_str())
                    && tx.send(reply).await.is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "category feed receive error");
                break;
            }
        }
    }

    forward_task.abort();
    send_task.abort();
    metrics::gauge!("ws_connections").decrement(1.0);
    tracing::info!("category feed disconnected");
}

/// Relays category changes from the hub to one connection.
async fn forward_updates(mut updates: broadcast::Receiver<TopicMessage>, tx: mpsc::Sender<Value>) {
    loop {
        match updates.recv().await {
            Ok(message) if message.topic == CATEGORY_TOPIC => {
                let frame = json!({ "type": "category_update", "payload": message.payload });
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "category feed lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Answers a client frame. Only `ping` gets a reply; anything else is ignored.
fn reply_to(text: &str) -> Option<Value> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame.get("type").and_then(Value::as_str) != Some("ping") {
        return None;
    }
    let data = frame.get("data").cloned().unwrap_or_else(|| json!({}));
    Some(json!({ "type": "pong", "data": data }))
}

#[cfg(test)]
mod tests {
    use domain::{BroadcastHub, ChangeBroadcaster};

    use super::*;

    #[test]
    fn ping_gets_pong_with_data() {
        let reply = reply_to(r#"{"type":"ping","data":{"n":1}}"#).unwrap();
        assert_eq!(reply["type"], "pong");
        assert_eq!(reply["data"]["n"], 1);

        let reply = reply_to(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(reply["data"], json!({}));
    }

    #[test]
    fn other_frames_are_ignored() {
        assert!(reply_to(r#"{"type":"subscribe"}"#).is_none());
        assert!(reply_to("not json").is_none());
    }

    #[tokio::test]
    async fn only_category_topic_is_forwarded() {
        let hub = BroadcastHub::default();
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(forward_updates(hub.subscribe(), tx));

        hub.publish("other_topic", json!({"x": 1})).unwrap();
        hub.publish(CATEGORY_TOPIC, json!({"action": "delete"})).unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["type"], "category_update");
        assert_eq!(frame["payload"]["action"], "delete");
        task.abort();
    }
}
