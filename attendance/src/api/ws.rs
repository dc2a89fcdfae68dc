use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use util::ws::{WebSocketManager, emit, serve::{WsServerOptions, serve_topic}};

use super::state::AppState;
use crate::coordinator::SessionHandle;
use crate::types::CourseId;

pub fn course_topic(course_id: CourseId) -> String {
    format!("attendance:course:{course_id}")
}

/// Forwards a coordinator's events onto its course topic until the
/// coordinator and all of its handles are gone.
pub fn bridge_events(handle: &SessionHandle, ws: WebSocketManager) -> JoinHandle<()> {
    let mut events = handle.subscribe();
    let topic = course_topic(handle.course_id());
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => emit(&ws, &topic, event.name(), &event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %topic, skipped, "ws bridge lagged behind session events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// GET /ws/courses/{course_id}
pub async fn course_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(course_id): Path<CourseId>,
) -> impl IntoResponse {
    let manager = state.ws().clone();
    let topic = course_topic(course_id);
    ws.on_upgrade(move |socket| serve_topic(socket, manager, topic, WsServerOptions::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::WallClock;
    use crate::coordinator::{CoordinatorConfig, SessionCoordinator, SessionDeps};
    use crate::gateway::PersistenceGateway;
    use crate::roster::StaticRoster;
    use crate::store::MemorySessionStateStore;
    use crate::types::{AttendanceRecord, CourseId, StudentIdentity};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Arc;

    struct NullGateway;

    #[async_trait]
    impl PersistenceGateway for NullGateway {
        async fn commit(
            &self,
            _course_id: CourseId,
            _date: NaiveDate,
            _records: &[AttendanceRecord],
        ) -> Result<(), crate::error::PersistenceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn session_events_reach_the_course_topic() {
        let deps = SessionDeps {
            gateway: Arc::new(NullGateway),
            roster: Arc::new(StaticRoster::new(vec![StudentIdentity {
                id: 1,
                display_name: "Ada".into(),
                rfid_code: "0042".into(),
            }])),
            store: Arc::new(MemorySessionStateStore::new()),
        };
        let handle = SessionCoordinator::spawn(5, CoordinatorConfig::default(), deps, WallClock::system());
        let ws = WebSocketManager::new();
        let mut rx = ws.subscribe(&course_topic(5)).await;
        bridge_events(&handle, ws.clone());

        let config = CoordinatorConfig::default().session_config(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(), None, None);
        handle.start(config).await.unwrap();

        let raw = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["event"], "attendance.session_started");
        assert_eq!(v["topic"], "attendance:course:5");
        assert_eq!(v["payload"]["course_id"], 5);
    }
}
