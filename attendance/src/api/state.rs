use std::sync::Arc;

use util::ws::WebSocketManager;

use super::ws::bridge_events;
use crate::coordinator::SessionHandle;
use crate::registry::SessionRegistry;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    registry: SessionRegistry,
    ws: WebSocketManager,
}

impl AppState {
    /// Wraps `registry` so that every coordinator it spawns publishes its
    /// events to `ws`.
    pub fn new(registry: SessionRegistry, ws: WebSocketManager) -> Self {
        let bridge_ws = ws.clone();
        let registry = registry.with_observer(Arc::new(move |handle: &SessionHandle| {
            bridge_events(handle, bridge_ws.clone());
        }));
        Self { registry, ws }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn ws(&self) -> &WebSocketManager {
        &self.ws
    }
}
