//! # Device Twin Agent
//!
//! Reports sensor readings from a device to its edge and cloud twin.
//!
//! ## Lifecycle
//!
//! 1. **Connect**: TLS connection to the edge MQTT broker
//! 2. **Announce**: publish state `online`
//! 3. **Report**: each line on stdin is a reading, synced to the edge and then
//!    the cloud
//! 4. **Shutdown**: on EOF or Ctrl+C, publish state `offline`
//!
//! A failed state update is fatal and ends the process with an error.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting device twin agent"
    );

    // Load configuration
    let config = AgentConfig::from_env()?;

    tracing::info!(
        device_id = %config.device_id,
        broker = %config.broker.mqtt_broker,
        "Agent initialized"
    );

    // Run agent
    Agent::new(config).run().await?;

    Ok(())
}
