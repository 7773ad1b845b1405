//! Resilient real-time channel client.
//!
//! Maintains one logical WebSocket connection to a configured endpoint,
//! re-establishing it automatically after any disconnect unless explicitly
//! torn down, and fans inbound JSON frames out to caller-supplied handlers.
//!
//! # Features
//! - Automatic fixed-interval reconnection
//! - Fresh credential lookup on every connection attempt
//! - Per-frame JSON decode with error isolation (a malformed frame never
//!   drops the connection)
//! - Best-effort sends, gated on the connection being open
//! - Deterministic teardown: after [`RealtimeChannel::disconnect`] no
//!   reconnect fires and no handler runs beyond the single natural close
//!
//! # Example
//! ```no_run
//! use realtime_channel::{ChannelConfig, RealtimeChannel};
//!
//! # fn example() -> Result<(), realtime_channel::Error> {
//! let mut config = ChannelConfig::new("wss://example.com/ws/monitoring/");
//! config.on_message = Some(Box::new(|msg| println!("got: {msg}")));
//! config.credentials = Some(Box::new(|| std::env::var("CHANNEL_TOKEN").ok()));
//!
//! let channel = RealtimeChannel::new(config)?;
//! channel.start();
//! # Ok(())
//! # }
//! ```

mod channel;
mod connection;
mod types;

pub use channel::RealtimeChannel;
pub use types::{
    ChannelConfig, ConnectionState, CredentialProvider, DEFAULT_RECONNECT_INTERVAL, Error,
    ErrorHandler, LifecycleHandler, MessageHandler,
};
