//! Public entry point: [`RealtimeChannel`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::connection::{self, ConnectLoop, Handlers, Shared};
use crate::types::{ChannelConfig, ConnectionState, Error};

/// Handle to one logical real-time connection.
///
/// Created inert by [`new`](RealtimeChannel::new); [`start`](RealtimeChannel::start)
/// begins connecting. The channel reconnects automatically after any
/// non-teardown close until [`disconnect`](RealtimeChannel::disconnect) is
/// called. Dropping the handle tears the channel down.
pub struct RealtimeChannel {
    shared: Arc<Shared>,
    outbound_tx: mpsc::UnboundedSender<String>,
    pending: Mutex<Option<ConnectLoop>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RealtimeChannel {
    /// Create an inert channel.
    ///
    /// Validates URL syntax only; no network activity happens until
    /// [`start`](Self::start). Connection failures never surface here — they
    /// are reported asynchronously through the configured handlers.
    pub fn new(config: ChannelConfig) -> Result<Self, Error> {
        let endpoint = url::Url::parse(&config.url)?;
        let handlers = Handlers {
            on_message: config.on_message,
            on_error: config.on_error,
            on_open: config.on_open,
            on_close: config.on_close,
        };
        let shared = Arc::new(Shared::new(handlers));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let pending = ConnectLoop {
            shared: shared.clone(),
            endpoint,
            credentials: config.credentials,
            auto_reconnect: config.auto_reconnect,
            reconnect_interval: config.reconnect_interval,
            outbound_rx,
        };
        Ok(Self {
            shared,
            outbound_tx,
            pending: Mutex::new(Some(pending)),
        })
    }

    /// Begin connecting on the current tokio runtime.
    ///
    /// Idempotent; a second call, or a call after
    /// [`disconnect`](Self::disconnect), is a no-op. Callers wanting
    /// construct-equals-start semantics call [`new`](Self::new) and `start`
    /// back to back.
    pub fn start(&self) {
        if self.shared.teardown.is_cancelled() {
            return;
        }
        if let Some(task) = lock(&self.pending).take() {
            tokio::spawn(connection::run(task));
        }
    }

    /// Transmit `message` as a JSON frame if the connection is open;
    /// otherwise a silent no-op.
    ///
    /// Best-effort by design: nothing is queued for later delivery and no
    /// error is returned. The sends this channel carries are idempotent
    /// pings/acks where loss is tolerable.
    pub fn send<T: serde::Serialize>(&self, message: &T) {
        if !self.shared.is_connected() {
            return;
        }
        match serde_json::to_string(message) {
            Ok(text) => {
                // Delivery failures surface through on_error from the
                // background task, like any other transport error.
                let _ = self.outbound_tx.send(text);
            }
            Err(e) => self.shared.handlers.error(&Error::Encode(e)),
        }
    }

    /// Tear the channel down. Idempotent.
    ///
    /// Cancels any pending reconnect so no future attempt fires, and closes
    /// an open transport. After the background task observes the
    /// cancellation, no further handlers run except the single natural close
    /// handler from closing that open transport.
    pub fn disconnect(&self) {
        self.shared.teardown.cancel();
        // Never started: there is no task to drive the transition.
        if lock(&self.pending).take().is_some() {
            self.shared.set_state(ConnectionState::Closed);
        }
    }

    /// `true` while the connection is open.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Current lifecycle state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Latest decoded inbound payload, if any. Latest-wins; no history is
    /// retained.
    pub fn last_message(&self) -> Option<serde_json::Value> {
        self.shared.last_message()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.shared.teardown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_url() {
        let result = RealtimeChannel::new(ChannelConfig::new("not a url"));
        assert!(matches!(result, Err(Error::Url(_))));
    }

    #[test]
    fn new_channel_is_idle() {
        let channel = RealtimeChannel::new(ChannelConfig::new("ws://127.0.0.1:9/ws")).unwrap();
        assert_eq!(channel.state(), ConnectionState::Idle);
        assert!(!channel.is_connected());
        assert!(channel.last_message().is_none());
    }

    #[test]
    fn send_before_start_is_a_no_op() {
        let channel = RealtimeChannel::new(ChannelConfig::new("ws://127.0.0.1:9/ws")).unwrap();
        channel.send(&serde_json::json!({"ping": 1}));
        assert!(!channel.is_connected());
    }

    #[test]
    fn disconnect_before_start_is_terminal_and_idempotent() {
        let channel = RealtimeChannel::new(ChannelConfig::new("ws://127.0.0.1:9/ws")).unwrap();
        channel.disconnect();
        channel.disconnect();
        channel.disconnect();
        assert_eq!(channel.state(), ConnectionState::Closed);

        // start after teardown must not connect.
        channel.start();
        assert_eq!(channel.state(), ConnectionState::Closed);
    }
}
