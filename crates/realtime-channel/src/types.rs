//! Public types for the realtime-channel crate.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Default delay between a close and the next connection attempt.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Returns the credential to attach to a connection attempt, or `None` to
/// connect unauthenticated.
///
/// Called afresh on every attempt, so a token rotated between reconnects is
/// picked up automatically. The channel never caches the returned value
/// beyond the single attempt it was read for.
pub type CredentialProvider = Box<dyn Fn() -> Option<String> + Send + Sync>;

/// Handler invoked with each decoded inbound payload.
pub type MessageHandler = Box<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Handler invoked with each reported failure (see [`Error`]).
pub type ErrorHandler = Box<dyn Fn(&Error) + Send + Sync>;

/// Handler invoked on a connection lifecycle transition (open or close).
pub type LifecycleHandler = Box<dyn Fn() + Send + Sync>;

/// Configuration for a [`RealtimeChannel`](crate::RealtimeChannel).
///
/// Supplied once at construction; changing it requires constructing a new
/// channel.
pub struct ChannelConfig {
    /// WebSocket endpoint. Must be an absolute `ws://` or `wss://` URL.
    pub url: String,
    /// Invoked with each decoded inbound payload.
    pub on_message: Option<MessageHandler>,
    /// Invoked on connection, transport, and frame decode failures.
    pub on_error: Option<ErrorHandler>,
    /// Invoked each time the connection opens.
    pub on_open: Option<LifecycleHandler>,
    /// Invoked each time the connection closes.
    pub on_close: Option<LifecycleHandler>,
    /// Reconnect automatically after any non-teardown close. Default `true`.
    pub auto_reconnect: bool,
    /// Delay between a close and the next connection attempt. Default 3s.
    ///
    /// Retries repeat at this fixed interval for as long as `auto_reconnect`
    /// holds and the channel has not been torn down — no backoff, no attempt
    /// cap. That favors availability for low-frequency dashboard feeds over
    /// politeness toward a permanently gone endpoint.
    pub reconnect_interval: Duration,
    /// Credential read at each connection attempt. `None`, or a provider
    /// returning `None`, connects without one — not an error.
    pub credentials: Option<CredentialProvider>,
}

impl ChannelConfig {
    /// Configuration with defaults: auto-reconnect on, 3s interval, no
    /// handlers, no credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            on_message: None,
            on_error: None,
            on_open: None,
            on_close: None,
            auto_reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            credentials: None,
        }
    }
}

/// Connection lifecycle state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created but not started. Never re-entered.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The transport is open; messages flow.
    Open,
    /// An explicit teardown is closing an open transport.
    Closing,
    /// No live transport. Terminal once teardown has been requested.
    Closed,
}

/// Failures reported through the error handler.
///
/// The channel never returns transport failures synchronously from its
/// public methods; everything surfaces through
/// [`ChannelConfig::on_error`]. The one exception is
/// [`Error::Url`], which [`RealtimeChannel::new`](crate::RealtimeChannel::new)
/// returns for a syntactically invalid endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("frame decode error: {0}")]
    Decode(serde_json::Error),

    #[error("message encode error: {0}")]
    Encode(serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ChannelConfig::new("wss://example.com/ws");
        assert_eq!(config.url, "wss://example.com/ws");
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_interval, Duration::from_millis(3000));
        assert!(config.on_message.is_none());
        assert!(config.credentials.is_none());
    }

    #[test]
    fn error_display() {
        let err = Error::Url(url::ParseError::EmptyHost);
        assert!(err.to_string().contains("URL parse error"));

        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err = Error::Decode(bad.unwrap_err());
        assert!(err.to_string().contains("frame decode error"));
    }
}
