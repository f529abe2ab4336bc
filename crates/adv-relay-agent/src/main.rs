//! # adv-relay Agent
//!
//! Relays device telemetry from a source MQTT broker to per-device topics
//! on a target broker.
//!
//! ## Pipeline
//!
//! 1. **Route**: extract the device identifier from `adv/{device_id}/data`
//!    and apply the whitelist policy
//! 2. **Decode**: base64 `data` field to binary envelope to output records
//! 3. **Publish**: one JSON message per record on the device's outbound
//!    topic, through a publisher connection dedicated to that device

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod bridge;
mod config;
mod directory;
mod registry;
mod routing;
mod runtime;
mod transport;

pub use config::RelayConfig;
pub use runtime::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args()
        .nth(1)
        .is_some_and(|arg| arg == "--version" || arg == "-v")
    {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting adv-relay agent"
    );

    // Load configuration
    let config = RelayConfig::load()?;

    tracing::info!(
        devices = config.devices.len(),
        skip_unknown = config.skip_unknown,
        "Configuration loaded"
    );

    let relay = Relay::new(config)?;

    // Run relay
    relay.run().await?;

    Ok(())
}
