// util/src/ws/mod.rs
pub mod manager;
pub mod serve;

pub use manager::WebSocketManager;

use chrono::Utc;
use serde::Serialize;

/// Standard event envelope sent over WebSocket topics.
#[derive(Serialize)]
pub struct EventEnvelope<'a, T> {
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'a str,
    pub topic: &'a str,
    pub payload: T,
    pub ts: String,
}

/// Broadcast a JSON-serialized `EventEnvelope` on `topic`.
pub async fn emit<T: Serialize>(ws: &WebSocketManager, topic: &str, event: &str, payload: &T) {
    let env = EventEnvelope {
        r#type: "event",
        event,
        topic,
        payload,
        ts: Utc::now().to_rfc3339(),
    };
    match serde_json::to_string(&env) {
        Ok(json) => ws.broadcast(topic, json).await,
        Err(err) => tracing::warn!(topic, event, error = %err, "failed to serialize ws event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn emit_wraps_payload_in_envelope() {
        let ws = WebSocketManager::new();
        let mut rx = ws.subscribe("attendance:course:9").await;

        emit(&ws, "attendance:course:9", "attendance.grace_ended", &serde_json::json!({"course_id": 9})).await;

        let raw = rx.recv().await.unwrap();
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["type"], "event");
        assert_eq!(v["event"], "attendance.grace_ended");
        assert_eq!(v["topic"], "attendance:course:9");
        assert_eq!(v["payload"]["course_id"], 9);
        assert!(v["ts"].as_str().is_some());
    }
}
