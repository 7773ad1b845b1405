//! Connect to a realtime endpoint and print decoded frames.
//!
//! ```sh
//! cargo run -p realtime-channel --example watch -- <WS_URL>
//! ```
//!
//! A bearer token is read from the `CHANNEL_TOKEN` environment variable if
//! set and attached to every connection attempt. Decoded payloads go to
//! stdout (pipe to `jq` for formatting); lifecycle chatter goes to stderr.

use realtime_channel::{ChannelConfig, RealtimeChannel};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .ok_or("usage: watch <WS_URL>")?;

    let mut config = ChannelConfig::new(url);
    config.credentials = Some(Box::new(|| std::env::var("CHANNEL_TOKEN").ok()));
    config.on_message = Some(Box::new(|msg| println!("{msg}")));
    config.on_open = Some(Box::new(|| eprintln!("connected")));
    config.on_close = Some(Box::new(|| eprintln!("disconnected")));
    config.on_error = Some(Box::new(|err| eprintln!("error: {err}")));

    let channel = RealtimeChannel::new(config)?;
    channel.start();

    tokio::signal::ctrl_c().await?;
    channel.disconnect();
    Ok(())
}
