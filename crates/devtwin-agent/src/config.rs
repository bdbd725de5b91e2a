//! Agent configuration.

use anyhow::{bail, Context, Result};
use devtwin_client::sync::{DEFAULT_CLOUD_DELAY, DEFAULT_TWIN_FIELD};
use devtwin_client::transport::qos_from_level;
use devtwin_client::{MqttTransportConfig, SyncConfig};
use devtwin_proto::{TopicScheme, DEFAULT_PREFIX};
use std::time::Duration;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Device identifier, used as MQTT client ID and in topics
    pub device_id: String,

    /// Broker configuration
    pub broker: BrokerConfig,

    /// Twin reporting configuration
    pub twin: TwinConfig,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// MQTT broker URL
    pub mqtt_broker: String,

    /// Username (empty disables authentication)
    pub username: String,

    /// Password
    pub password: String,

    /// QoS level for publishes (0, 1 or 2)
    pub qos: u8,
}

/// Twin reporting configuration.
#[derive(Debug, Clone)]
pub struct TwinConfig {
    /// Topic prefix
    pub topic_prefix: String,

    /// Twin field carrying readings
    pub field: String,

    /// Pause between edge and cloud publish
    pub cloud_delay: Duration,

    /// Stamp event id and timestamp on updates
    pub stamp_events: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            broker: BrokerConfig {
                mqtt_broker: "tcp://localhost:1883".to_string(),
                username: String::new(),
                password: String::new(),
                qos: 0,
            },
            twin: TwinConfig {
                topic_prefix: DEFAULT_PREFIX.to_string(),
                field: DEFAULT_TWIN_FIELD.to_string(),
                cloud_delay: DEFAULT_CLOUD_DELAY,
                stamp_events: false,
            },
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DEVTWIN_DEVICE_ID`: Device identifier (required)
    /// - `DEVTWIN_MQTT_BROKER`: MQTT broker URL
    /// - `DEVTWIN_USERNAME` / `DEVTWIN_PASSWORD`: Broker credentials
    /// - `DEVTWIN_QOS`: Publish QoS level (0, 1 or 2)
    /// - `DEVTWIN_TOPIC_PREFIX`: Topic prefix
    /// - `DEVTWIN_TWIN_FIELD`: Twin field name
    /// - `DEVTWIN_CLOUD_DELAY_MS`: Pause before the cloud publish
    /// - `DEVTWIN_STAMP_EVENTS`: Stamp event id and timestamp (`true`/`false`)
    ///
    /// # Errors
    ///
    /// Returns error if required environment variables are missing or a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`AgentConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        match lookup("DEVTWIN_DEVICE_ID") {
            Some(id) if !id.is_empty() => config.device_id = id,
            _ => bail!("DEVTWIN_DEVICE_ID must be set"),
        }

        if let Some(broker) = lookup("DEVTWIN_MQTT_BROKER") {
            config.broker.mqtt_broker = broker;
        }

        if let Some(username) = lookup("DEVTWIN_USERNAME") {
            config.broker.username = username;
        }

        if let Some(password) = lookup("DEVTWIN_PASSWORD") {
            config.broker.password = password;
        }

        if let Some(qos) = lookup("DEVTWIN_QOS") {
            config.broker.qos = qos.parse().context("Invalid DEVTWIN_QOS")?;
            qos_from_level(config.broker.qos).context("Invalid DEVTWIN_QOS")?;
        }

        if let Some(prefix) = lookup("DEVTWIN_TOPIC_PREFIX") {
            config.twin.topic_prefix = prefix;
        }

        if let Some(field) = lookup("DEVTWIN_TWIN_FIELD") {
            config.twin.field = field;
        }

        if let Some(delay) = lookup("DEVTWIN_CLOUD_DELAY_MS") {
            let millis: u64 = delay.parse().context("Invalid DEVTWIN_CLOUD_DELAY_MS")?;
            config.twin.cloud_delay = Duration::from_millis(millis);
        }

        if let Some(stamp) = lookup("DEVTWIN_STAMP_EVENTS") {
            config.twin.stamp_events = stamp.parse().context("Invalid DEVTWIN_STAMP_EVENTS")?;
        }

        Ok(config)
    }

    /// Transport settings for this device.
    ///
    /// # Errors
    ///
    /// Returns error if the QoS level is out of range.
    pub fn transport_config(&self) -> Result<MqttTransportConfig> {
        let mut transport = MqttTransportConfig::new(&self.broker.mqtt_broker, &self.device_id)
            .with_credentials(&self.broker.username, &self.broker.password);
        transport.qos = qos_from_level(self.broker.qos)?;
        Ok(transport)
    }

    /// Sync settings for this device.
    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        let mut sync = SyncConfig::new(&self.device_id);
        sync.topics = TopicScheme::new(&self.twin.topic_prefix);
        sync.twin_field.clone_from(&self.twin.field);
        sync.cloud_delay = self.twin.cloud_delay;
        sync.stamp_events = self.twin.stamp_events;
        sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn device_id_is_required() {
        assert!(AgentConfig::from_lookup(lookup(&[])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("DEVTWIN_DEVICE_ID", "")])).is_err());
    }

    #[test]
    fn defaults_match_deployment() {
        let config = AgentConfig::from_lookup(lookup(&[("DEVTWIN_DEVICE_ID", "dev-1")])).unwrap();

        assert_eq!(config.broker.mqtt_broker, "tcp://localhost:1883");
        assert_eq!(config.broker.qos, 0);

        let sync = config.sync_config();
        assert_eq!(sync.device_id, "dev-1");
        assert_eq!(sync.twin_field, "CPU_Temperatur");
        assert_eq!(sync.cloud_delay, Duration::from_secs(2));
        assert_eq!(sync.topics.prefix, "$hw/events/device");
        assert!(!sync.stamp_events);
    }

    #[test]
    fn overrides_are_applied() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("DEVTWIN_DEVICE_ID", "pump-3"),
            ("DEVTWIN_MQTT_BROKER", "ssl://edge:8883"),
            ("DEVTWIN_USERNAME", "pump"),
            ("DEVTWIN_QOS", "1"),
            ("DEVTWIN_TWIN_FIELD", "flow"),
            ("DEVTWIN_CLOUD_DELAY_MS", "250"),
            ("DEVTWIN_STAMP_EVENTS", "true"),
        ]))
        .unwrap();

        let transport = config.transport_config().unwrap();
        assert_eq!(transport.mqtt_broker, "ssl://edge:8883");
        assert_eq!(transport.client_id, "pump-3");
        assert_eq!(transport.username, "pump");
        assert_eq!(transport.password, "");
        assert_eq!(transport.qos, rumqttc::QoS::AtLeastOnce);

        let sync = config.sync_config();
        assert_eq!(sync.twin_field, "flow");
        assert_eq!(sync.cloud_delay, Duration::from_millis(250));
        assert!(sync.stamp_events);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            ("DEVTWIN_QOS", "3"),
            ("DEVTWIN_QOS", "high"),
            ("DEVTWIN_CLOUD_DELAY_MS", "-1"),
            ("DEVTWIN_STAMP_EVENTS", "yes"),
        ] {
            let result =
                AgentConfig::from_lookup(lookup(&[("DEVTWIN_DEVICE_ID", "dev-1"), (key, value)]));
            assert!(result.is_err(), "{key}={value} should be rejected");
        }
    }
}
