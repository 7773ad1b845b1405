//! Connection management: connect loop, session handling, and reconnection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use crate::types::{
    ConnectionState, CredentialProvider, Error, ErrorHandler, LifecycleHandler, MessageHandler,
};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Caller-supplied handlers
// ---------------------------------------------------------------------------

pub(crate) struct Handlers {
    pub on_message: Option<MessageHandler>,
    pub on_error: Option<ErrorHandler>,
    pub on_open: Option<LifecycleHandler>,
    pub on_close: Option<LifecycleHandler>,
}

impl Handlers {
    pub(crate) fn message(&self, value: &serde_json::Value) {
        if let Some(h) = &self.on_message {
            h(value);
        }
    }

    pub(crate) fn error(&self, err: &Error) {
        if let Some(h) = &self.on_error {
            h(err);
        }
    }

    fn open(&self) {
        if let Some(h) = &self.on_open {
            h();
        }
    }

    fn close(&self) {
        if let Some(h) = &self.on_close {
            h();
        }
    }
}

// ---------------------------------------------------------------------------
// State shared between the public handle and the background task
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    state: Mutex<ConnectionState>,
    last_message: Mutex<Option<serde_json::Value>>,
    pub(crate) handlers: Handlers,
    pub(crate) teardown: CancellationToken,
}

impl Shared {
    pub(crate) fn new(handlers: Handlers) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
            last_message: Mutex::new(None),
            handlers,
            teardown: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub(crate) fn last_message(&self) -> Option<serde_json::Value> {
        lock(&self.last_message).clone()
    }

    fn store_message(&self, value: serde_json::Value) {
        *lock(&self.last_message) = Some(value);
    }
}

// ---------------------------------------------------------------------------
// Credential attachment
// ---------------------------------------------------------------------------

/// Append the credential snapshot for this attempt as a `token` query
/// parameter. The endpoint itself was validated at construction.
fn attach_credential(endpoint: &url::Url, token: Option<&str>) -> url::Url {
    let mut u = endpoint.clone();
    if let Some(token) = token {
        u.query_pairs_mut().append_pair("token", token);
    }
    u
}

// ---------------------------------------------------------------------------
// Connect loop
// ---------------------------------------------------------------------------

pub(crate) struct ConnectLoop {
    pub shared: Arc<Shared>,
    pub endpoint: url::Url,
    pub credentials: Option<CredentialProvider>,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
}

/// Drive the channel until teardown (or until a close with reconnection
/// disabled). One iteration per connection attempt.
pub(crate) async fn run(mut p: ConnectLoop) {
    let teardown = p.shared.teardown.clone();

    loop {
        // Fresh credential snapshot per attempt; a token rotated between
        // reconnects is picked up here.
        let token = p.credentials.as_ref().and_then(|provider| provider());
        let ws_url = attach_credential(&p.endpoint, token.as_deref());

        p.shared.set_state(ConnectionState::Connecting);
        tracing::debug!(endpoint = %p.endpoint, "connecting");

        let connected = tokio::select! {
            res = tokio_tungstenite::connect_async(ws_url.as_str()) => res,
            () = teardown.cancelled() => {
                // Dropping the in-flight handshake closes its socket once it
                // resolves; the transport is never handed out.
                p.shared.set_state(ConnectionState::Closed);
                return;
            }
        };

        match connected {
            Ok((ws, _resp)) => {
                p.shared.set_state(ConnectionState::Open);
                tracing::info!("connected");
                p.shared.handlers.open();

                let end = run_session(&mut p, ws).await;

                // Outbound messages never survive a disconnect.
                while p.outbound_rx.try_recv().is_ok() {}

                p.shared.set_state(ConnectionState::Closed);
                tracing::info!("connection closed");
                p.shared.handlers.close();

                if matches!(end, SessionEnd::Teardown) {
                    return;
                }
            }
            Err(e) => {
                let err = Error::from(e);
                tracing::warn!("connect failed: {err}");
                p.shared.handlers.error(&err);
                // A failed attempt still surfaces the natural close, matching
                // socket semantics: error precedes close, never replaces it.
                p.shared.set_state(ConnectionState::Closed);
                p.shared.handlers.close();
            }
        }

        if !p.auto_reconnect {
            return;
        }

        // Fixed-interval retry. This sleep is the owned reconnect timer;
        // teardown cancels it so no further attempt can fire.
        tokio::select! {
            () = tokio::time::sleep(p.reconnect_interval) => {}
            () = teardown.cancelled() => return,
        }
    }
}

enum SessionEnd {
    /// Transport closed or errored; reconnection may follow.
    Dropped,
    /// Explicit teardown closed the transport. No reconnection.
    Teardown,
}

async fn run_session(p: &mut ConnectLoop, ws: WsStream) -> SessionEnd {
    let (mut ws_write, mut ws_read) = ws.split();
    let teardown = p.shared.teardown.clone();

    loop {
        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        deliver(&p.shared, text.as_bytes());
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        deliver(&p.shared, &data);
                    }
                    Some(Ok(tungstenite::Message::Close(_))) => {
                        tracing::info!("close frame from server");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong frames; tungstenite answers pings itself.
                    }
                    Some(Err(e)) => {
                        let err = Error::from(e);
                        tracing::warn!("WebSocket error: {err}");
                        p.shared.handlers.error(&err);
                        return SessionEnd::Dropped;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        return SessionEnd::Dropped;
                    }
                }
            }

            msg = p.outbound_rx.recv() => {
                match msg {
                    Some(text) => {
                        if let Err(e) = ws_write.send(tungstenite::Message::Text(text.into())).await {
                            let err = Error::from(e);
                            tracing::warn!("send failed: {err}");
                            p.shared.handlers.error(&err);
                            return SessionEnd::Dropped;
                        }
                    }
                    None => {
                        // Handle dropped; its Drop also cancels the token.
                        p.shared.set_state(ConnectionState::Closing);
                        let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                        return SessionEnd::Teardown;
                    }
                }
            }

            () = teardown.cancelled() => {
                p.shared.set_state(ConnectionState::Closing);
                let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                return SessionEnd::Teardown;
            }
        }
    }
}

/// Decode one inbound frame. A malformed frame is dropped and reported; it
/// does not change connection state or the stored last message.
fn deliver(shared: &Shared, raw: &[u8]) {
    match serde_json::from_slice::<serde_json::Value>(raw) {
        Ok(value) => {
            shared.store_message(value.clone());
            shared.handlers.message(&value);
        }
        Err(e) => {
            let err = Error::Decode(e);
            tracing::warn!("dropping malformed frame: {err}");
            shared.handlers.error(&err);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn no_handlers() -> Handlers {
        Handlers {
            on_message: None,
            on_error: None,
            on_open: None,
            on_close: None,
        }
    }

    #[test]
    fn attach_credential_appends_token() {
        let endpoint = url::Url::parse("ws://localhost:8000/ws/monitoring/").unwrap();
        let with = attach_credential(&endpoint, Some("abc123"));
        assert_eq!(
            with.as_str(),
            "ws://localhost:8000/ws/monitoring/?token=abc123"
        );
    }

    #[test]
    fn attach_credential_without_token_leaves_url_unchanged() {
        let endpoint = url::Url::parse("wss://example.com/ws").unwrap();
        let without = attach_credential(&endpoint, None);
        assert_eq!(without, endpoint);
    }

    #[test]
    fn attach_credential_escapes_token() {
        let endpoint = url::Url::parse("ws://example.com/ws").unwrap();
        let with = attach_credential(&endpoint, Some("a b&c"));
        assert_eq!(with.as_str(), "ws://example.com/ws?token=a+b%26c");
    }

    #[test]
    fn shared_state_transitions() {
        let shared = Shared::new(no_handlers());
        assert_eq!(shared.state(), ConnectionState::Idle);
        assert!(!shared.is_connected());

        shared.set_state(ConnectionState::Connecting);
        assert!(!shared.is_connected());

        shared.set_state(ConnectionState::Open);
        assert!(shared.is_connected());

        shared.set_state(ConnectionState::Closed);
        assert!(!shared.is_connected());
    }

    #[test]
    fn deliver_stores_latest_message() {
        let shared = Shared::new(no_handlers());
        deliver(&shared, br#"{"seq":1}"#);
        deliver(&shared, br#"{"seq":2}"#);
        assert_eq!(shared.last_message(), Some(serde_json::json!({"seq": 2})));
    }

    #[test]
    fn deliver_malformed_frame_reports_and_keeps_previous() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let shared = Shared::new(Handlers {
            on_error: Some(Box::new(move |err| {
                assert!(matches!(err, Error::Decode(_)));
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..no_handlers()
        });
        shared.set_state(ConnectionState::Open);

        deliver(&shared, br#"{"ok":true}"#);
        deliver(&shared, b"{not json");

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(shared.last_message(), Some(serde_json::json!({"ok": true})));
        assert!(shared.is_connected());
    }
}
