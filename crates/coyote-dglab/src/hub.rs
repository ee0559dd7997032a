//! Routing table shared by the accept loop, app connections and local clients.
//!
//! Locks are `parking_lot` and never held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use coyote_core::{DeviceEvent, RetCode};
use coyote_session::transport::TransportError;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::message::{
    BIND_MARKER, KIND_BIND, KIND_BREAK, KIND_HEARTBEAT, KIND_MSG, MAX_MESSAGE_LEN, WireMessage,
    parse_app_payload,
};

const EVENT_CAPACITY: usize = 64;

/// State of one in-process control endpoint, shared with its `LocalClient`s.
#[derive(Debug)]
pub(crate) struct LocalEndpoint {
    pub id: String,
    /// App id of the bound peer, if any.
    pub bound: watch::Sender<Option<String>>,
    pub events: broadcast::Sender<DeviceEvent>,
    /// Fired when the server shuts down.
    pub closed: CancellationToken,
}

impl LocalEndpoint {
    fn new(id: String, closed: CancellationToken) -> Self {
        let (bound, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id,
            bound,
            events,
            closed,
        }
    }

    pub fn target_id(&self) -> Option<String> {
        self.bound.borrow().clone()
    }
}

#[derive(Default)]
struct HubState {
    locals: HashMap<String, Arc<LocalEndpoint>>,
    /// App connection id -> outbound frame queue.
    remotes: HashMap<String, mpsc::UnboundedSender<Message>>,
    /// App connection id -> bound local id.
    app_to_local: HashMap<String, String>,
}

pub(crate) struct Hub {
    state: Mutex<HubState>,
    closed: CancellationToken,
}

impl Hub {
    pub fn new(closed: CancellationToken) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            closed,
        }
    }

    pub fn register_local(&self) -> Arc<LocalEndpoint> {
        let id = uuid::Uuid::new_v4().to_string();
        let endpoint = Arc::new(LocalEndpoint::new(id.clone(), self.closed.child_token()));
        self.state.lock().locals.insert(id, Arc::clone(&endpoint));
        tracing::debug!(client_id = %endpoint.id, "dglab: local client registered");
        endpoint
    }

    pub fn register_remote(&self, app_id: &str, tx: mpsc::UnboundedSender<Message>) {
        self.state.lock().remotes.insert(app_id.to_string(), tx);
    }

    /// Forget an app connection. A bound local client becomes unbound and
    /// observes `CLIENT_DISCONNECTED` on its event stream.
    pub fn remove_remote(&self, app_id: &str) {
        let local = {
            let mut state = self.state.lock();
            state.remotes.remove(app_id);
            state
                .app_to_local
                .remove(app_id)
                .and_then(|local_id| state.locals.get(&local_id).cloned())
        };
        if let Some(local) = local {
            local.bound.send_replace(None);
            let _ = local.events.send(DeviceEvent::Ret(RetCode::ClientDisconnected));
            tracing::info!(client_id = %local.id, app_id = %app_id, "dglab: app disconnected");
        }
    }

    /// Handle one text frame from an app connection. Returns the reply frame
    /// to send back on that connection, if any.
    pub fn handle_app_text(&self, app_id: &str, text: &str) -> Option<WireMessage> {
        if text.len() > MAX_MESSAGE_LEN {
            return Some(WireMessage::ret(KIND_MSG, "", "", RetCode::MessageTooLong));
        }
        let Ok(msg) = serde_json::from_str::<WireMessage>(text) else {
            return Some(WireMessage::ret(KIND_MSG, "", "", RetCode::NonJsonContent));
        };

        match msg.kind.as_str() {
            KIND_BIND if msg.message == BIND_MARKER => self.bind(app_id, &msg),
            KIND_MSG => self.deliver(app_id, &msg),
            KIND_HEARTBEAT => None,
            other => {
                tracing::debug!(app_id = %app_id, kind = %other, "dglab: ignoring frame");
                None
            }
        }
    }

    fn bind(&self, app_id: &str, msg: &WireMessage) -> Option<WireMessage> {
        let local_id = msg.client_id.as_str();
        let reply = |code| Some(WireMessage::ret(KIND_BIND, local_id, app_id, code));

        if msg.target_id != app_id {
            return reply(RetCode::IncompatibleRelationship);
        }

        let local = {
            let mut state = self.state.lock();
            let Some(local) = state.locals.get(local_id).cloned() else {
                return reply(RetCode::TargetClientNotFound);
            };
            if state.app_to_local.contains_key(app_id) || local.bound.borrow().is_some() {
                return reply(RetCode::IdAlreadyBound);
            }
            state
                .app_to_local
                .insert(app_id.to_string(), local_id.to_string());
            local
        };

        local.bound.send_replace(Some(app_id.to_string()));
        tracing::info!(client_id = %local_id, app_id = %app_id, "dglab: app bound");
        reply(RetCode::Success)
    }

    fn deliver(&self, app_id: &str, msg: &WireMessage) -> Option<WireMessage> {
        let local = {
            let state = self.state.lock();
            match state.app_to_local.get(app_id) {
                Some(local_id) if *local_id == msg.client_id => state.locals.get(local_id).cloned(),
                _ => None,
            }
        };
        let Some(local) = local else {
            return Some(WireMessage::ret(
                KIND_BIND,
                msg.client_id.as_str(),
                app_id,
                RetCode::IncompatibleRelationship,
            ));
        };

        match parse_app_payload(&msg.message) {
            Some(event) => {
                tracing::debug!(client_id = %local.id, event = ?event, "dglab: app event");
                // No subscriber is fine.
                let _ = local.events.send(event);
            }
            None => {
                tracing::debug!(client_id = %local.id, payload = %msg.message, "dglab: unknown app payload");
            }
        }
        None
    }

    /// Send a control payload from a local client to its bound app.
    pub fn send_to_app(&self, local: &LocalEndpoint, payload: String) -> Result<(), TransportError> {
        if local.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let app_id = local.target_id().ok_or(TransportError::NotBound)?;
        let frame = WireMessage::new(KIND_MSG, local.id.as_str(), app_id.as_str(), payload);
        if frame.message.len() > MAX_MESSAGE_LEN {
            return Err(TransportError::Protocol(format!(
                "message of {} bytes exceeds the {MAX_MESSAGE_LEN}-byte limit",
                frame.message.len()
            )));
        }

        let state = self.state.lock();
        let tx = state.remotes.get(&app_id).ok_or(TransportError::NotBound)?;
        tx.send(Message::Text(frame.to_json()))
            .map_err(|_| TransportError::Protocol("app connection closed".to_string()))
    }

    /// Heartbeat every app connection with its current pairing.
    pub fn heartbeat(&self) {
        let state = self.state.lock();
        for (app_id, tx) in &state.remotes {
            let local_id = state.app_to_local.get(app_id).cloned().unwrap_or_default();
            let frame = WireMessage::ret(KIND_HEARTBEAT, app_id.as_str(), local_id, RetCode::Success);
            let _ = tx.send(Message::Text(frame.to_json()));
        }
    }

    /// Tell bound apps the terminal is gone and drop every registration.
    pub fn close(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for (app_id, local_id) in state.app_to_local.drain() {
            if let Some(tx) = state.remotes.get(&app_id) {
                let frame = WireMessage::ret(KIND_BREAK, local_id, app_id.as_str(), RetCode::ClientDisconnected);
                let _ = tx.send(Message::Text(frame.to_json()));
            }
        }
        for local in state.locals.values() {
            local.bound.send_replace(None);
            local.closed.cancel();
        }
        state.locals.clear();
        state.remotes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Hub {
        Hub::new(CancellationToken::new())
    }

    fn bind_frame(local_id: &str, app_id: &str) -> String {
        WireMessage::new(KIND_BIND, local_id, app_id, BIND_MARKER).to_json()
    }

    fn connect_app(hub: &Hub, app_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register_remote(app_id, tx);
        rx
    }

    #[test]
    fn bind_pairs_app_with_local_client() {
        let hub = hub();
        let local = hub.register_local();
        let _rx = connect_app(&hub, "app-1");

        let reply = hub.handle_app_text("app-1", &bind_frame(&local.id, "app-1")).unwrap();
        assert_eq!(reply.message, "200");
        assert_eq!(local.target_id().as_deref(), Some("app-1"));
    }

    #[test]
    fn bind_rejects_unknown_and_double_binding() {
        let hub = hub();
        let local = hub.register_local();
        let _rx1 = connect_app(&hub, "app-1");
        let _rx2 = connect_app(&hub, "app-2");

        let reply = hub.handle_app_text("app-1", &bind_frame("nope", "app-1")).unwrap();
        assert_eq!(reply.message, "401");

        hub.handle_app_text("app-1", &bind_frame(&local.id, "app-1"));
        let reply = hub.handle_app_text("app-2", &bind_frame(&local.id, "app-2")).unwrap();
        assert_eq!(reply.message, "400");

        let reply = hub.handle_app_text("app-2", &bind_frame(&local.id, "someone-else")).unwrap();
        assert_eq!(reply.message, "402");
    }

    #[test]
    fn rejects_non_json_and_oversized_frames() {
        let hub = hub();
        assert_eq!(hub.handle_app_text("a", "not json").unwrap().message, "403");
        let big = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert_eq!(hub.handle_app_text("a", &big).unwrap().message, "405");
    }

    #[test]
    fn app_events_reach_local_subscribers() {
        let hub = hub();
        let local = hub.register_local();
        let mut events = local.events.subscribe();
        let _rx = connect_app(&hub, "app-1");
        hub.handle_app_text("app-1", &bind_frame(&local.id, "app-1"));

        let frame = WireMessage::new(KIND_MSG, local.id.as_str(), "app-1", "feedback-3").to_json();
        assert!(hub.handle_app_text("app-1", &frame).is_none());
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::Feedback(3));
    }

    #[test]
    fn unpaired_app_messages_are_refused() {
        let hub = hub();
        let local = hub.register_local();
        let frame = WireMessage::new(KIND_MSG, local.id.as_str(), "app-1", "feedback-3").to_json();
        assert_eq!(hub.handle_app_text("app-1", &frame).unwrap().message, "402");
    }

    #[test]
    fn removing_bound_app_unbinds_and_notifies() {
        let hub = hub();
        let local = hub.register_local();
        let mut events = local.events.subscribe();
        let _rx = connect_app(&hub, "app-1");
        hub.handle_app_text("app-1", &bind_frame(&local.id, "app-1"));

        hub.remove_remote("app-1");
        assert!(local.target_id().is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            DeviceEvent::Ret(RetCode::ClientDisconnected)
        );
    }

    #[test]
    fn send_to_app_requires_binding() {
        let hub = hub();
        let local = hub.register_local();
        let mut rx = connect_app(&hub, "app-1");
        assert_eq!(
            hub.send_to_app(&local, "clear-1".into()).unwrap_err(),
            TransportError::NotBound
        );

        hub.handle_app_text("app-1", &bind_frame(&local.id, "app-1"));
        hub.send_to_app(&local, "clear-1".into()).unwrap();
        let Message::Text(text) = rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let frame: WireMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.kind, KIND_MSG);
        assert_eq!(frame.client_id, local.id);
        assert_eq!(frame.target_id, "app-1");
        assert_eq!(frame.message, "clear-1");
    }

    #[test]
    fn close_breaks_bound_apps_and_closes_locals() {
        let hub = hub();
        let local = hub.register_local();
        let mut rx = connect_app(&hub, "app-1");
        hub.handle_app_text("app-1", &bind_frame(&local.id, "app-1"));

        hub.close();
        assert!(local.closed.is_cancelled());
        assert!(local.target_id().is_none());
        let Message::Text(text) = rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let frame: WireMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.kind, KIND_BREAK);
        assert_eq!(frame.message, "209");
        assert_eq!(
            hub.send_to_app(&local, "clear-1".into()).unwrap_err(),
            TransportError::Closed
        );
    }
}
