use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{sync::mpsc, time};

use super::WebSocketManager;

pub struct WsServerOptions {
    pub ws_ping_sec: u64,
    pub enable_app_ping: bool,
}

impl Default for WsServerOptions {
    fn default() -> Self {
        Self {
            ws_ping_sec: 30,
            enable_app_ping: true,
        }
    }
}

/// Pumps every broadcast on `topic` to `socket` until the client goes away.
///
/// Inbound traffic is limited to keep-alives: WS pings are answered by the
/// writer and `{"type":"ping"}` text frames get an app-level pong.
pub async fn serve_topic(
    socket: WebSocket,
    manager: WebSocketManager,
    topic: String,
    opts: WsServerOptions,
) {
    let mut rx = manager.subscribe(&topic).await;
    let (mut sink, mut socket_rx) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let forward_task = {
        let out_tx = out_tx.clone();
        let topic = topic.clone();
        tokio::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if out_tx.send(Message::Text(msg.into())).await.is_err() {
                    tracing::info!(topic = %topic, "client disconnected while forwarding");
                    break;
                }
            }
        })
    };

    let ping_task = {
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            loop {
                time::sleep(std::time::Duration::from_secs(opts.ws_ping_sec)).await;
                if out_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        })
    };

    while let Some(Ok(msg)) = socket_rx.next().await {
        match msg {
            Message::Text(text) => {
                if opts.enable_app_ping && is_app_ping(text.as_str()) {
                    let pong = serde_json::json!({
                        "event": "pong",
                        "topic": topic,
                        "payload": {},
                        "ts": Utc::now().to_rfc3339(),
                    });
                    let _ = out_tx.send(Message::Text(pong.to_string().into())).await;
                }
            }
            Message::Ping(payload) => {
                let _ = out_tx.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => break,
            Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    forward_task.abort();
    ping_task.abort();
    drop(out_tx);
    let _ = writer_task.await;
    tracing::info!(topic = %topic, "ws session ended");
}

fn is_app_ping(raw: &str) -> bool {
    matches!(
        serde_json::from_str::<Value>(raw),
        Ok(Value::Object(map)) if map.get("type").and_then(Value::as_str) == Some("ping")
    )
}

#[cfg(test)]
mod tests {
    use super::is_app_ping;

    #[test]
    fn recognises_app_level_ping() {
        assert!(is_app_ping(r#"{"type":"ping"}"#));
        assert!(!is_app_ping(r#"{"type":"scan"}"#));
        assert!(!is_app_ping("ping"));
    }
}
