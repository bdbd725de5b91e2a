//! # Device Twin Client
//!
//! Publishes device twin documents over MQTT.
//!
//! ## Sync sequence
//!
//! [`TwinSync::update`] reports one reading in two phases:
//! 1. Twin update to the edge (`.../twin/update`)
//! 2. After a fixed pause, the same document to the cloud (`.../twin/cloud_update`)
//!
//! State updates (`.../state/update`) are fatal when they fail; twin updates
//! are reported and skipped.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sync;
pub mod transport;

pub use sync::{Severity, SyncConfig, SyncError, SyncReport, TwinSync};
pub use transport::{MqttTransport, MqttTransportConfig, Transport, TransportError};

/// Connect a device to the broker with default settings.
///
/// An empty `username` disables authentication; an empty `password` sends
/// the username alone. Connection failures are logged, not returned.
///
/// # Errors
///
/// Returns error if the broker URL is invalid.
pub async fn init(
    mqtt_broker: &str,
    device_id: &str,
    username: &str,
    password: &str,
) -> Result<TwinSync<MqttTransport>, TransportError> {
    let transport_config =
        MqttTransportConfig::new(mqtt_broker, device_id).with_credentials(username, password);
    let transport = MqttTransport::connect(transport_config).await?;

    Ok(TwinSync::new(transport, SyncConfig::new(device_id)))
}
