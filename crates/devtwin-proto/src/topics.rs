//! MQTT topic scheme for device twin synchronization.
//!
//! Topic structure: `{prefix}{device_id}{suffix}`
//!
//! The device identifier is inserted verbatim; callers validate it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default topic namespace of the edge broker.
pub const DEFAULT_PREFIX: &str = "$hw/events/device";

/// Class of a published message, which selects the topic suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageClass {
    /// Device lifecycle state
    State,
    /// Twin update towards the edge
    Twin,
    /// Twin update towards the cloud
    TwinCloud,
}

impl MessageClass {
    /// All classes, in suffix-matching order.
    pub const ALL: [Self; 3] = [Self::State, Self::Twin, Self::TwinCloud];

    /// Topic suffix for this class.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::State => "/state/update",
            Self::Twin => "/twin/update",
            Self::TwinCloud => "/twin/cloud_update",
        }
    }

    /// Short name (`state`, `twin`, `twin-cloud`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Twin => "twin",
            Self::TwinCloud => "twin-cloud",
        }
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MessageClass {
    type Err = UnknownClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state" => Ok(Self::State),
            "twin" => Ok(Self::Twin),
            "twin-cloud" => Ok(Self::TwinCloud),
            other => Err(UnknownClass(other.to_string())),
        }
    }
}

/// Error for an unrecognised message class name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message class: {0}")]
pub struct UnknownClass(pub String);

/// Topic scheme configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScheme {
    /// Topic prefix (default: `$hw/events/device`)
    pub prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl TopicScheme {
    /// Create a topic scheme with a custom prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Resolve the topic for a device and message class.
    #[must_use]
    pub fn resolve(&self, device_id: &str, class: MessageClass) -> String {
        format!("{}{}{}", self.prefix, device_id, class.suffix())
    }

    /// Topic for device state updates.
    #[must_use]
    pub fn state(&self, device_id: &str) -> String {
        self.resolve(device_id, MessageClass::State)
    }

    /// Topic for twin updates towards the edge.
    #[must_use]
    pub fn twin(&self, device_id: &str) -> String {
        self.resolve(device_id, MessageClass::Twin)
    }

    /// Topic for twin updates towards the cloud.
    #[must_use]
    pub fn twin_cloud(&self, device_id: &str) -> String {
        self.resolve(device_id, MessageClass::TwinCloud)
    }

    /// Parse a topic to extract components.
    ///
    /// Returns `(device_id, class)` if the topic was produced by this scheme
    /// and the device id is non-empty.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<(String, MessageClass)> {
        let remainder = topic.strip_prefix(&self.prefix)?;

        MessageClass::ALL.into_iter().find_map(|class| {
            remainder
                .strip_suffix(class.suffix())
                .filter(|device_id| !device_id.is_empty())
                .map(|device_id| (device_id.to_string(), class))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_generation() {
        let scheme = TopicScheme::default();

        assert_eq!(scheme.state("dev-1"), "$hw/events/devicedev-1/state/update");
        assert_eq!(scheme.twin("dev-1"), "$hw/events/devicedev-1/twin/update");
        assert_eq!(
            scheme.twin_cloud("dev-1"),
            "$hw/events/devicedev-1/twin/cloud_update"
        );
    }

    #[test]
    fn resolve_is_plain_concatenation() {
        let scheme = TopicScheme::new("site/");
        for device_id in ["", "a", "sensor-7", "with/slash"] {
            for class in MessageClass::ALL {
                assert_eq!(
                    scheme.resolve(device_id, class),
                    format!("site/{device_id}{}", class.suffix())
                );
                assert_eq!(
                    scheme.resolve(device_id, class),
                    scheme.resolve(device_id, class)
                );
            }
        }
    }

    #[test]
    fn class_names_roundtrip() {
        for class in MessageClass::ALL {
            assert_eq!(class.as_str().parse::<MessageClass>().unwrap(), class);
        }
        assert_eq!(
            "cloud".parse::<MessageClass>(),
            Err(UnknownClass("cloud".to_string()))
        );
    }

    #[test]
    fn topic_parsing() {
        let scheme = TopicScheme::default();

        let (device_id, class) = scheme
            .parse("$hw/events/devicedev-1/twin/cloud_update")
            .unwrap();
        assert_eq!(device_id, "dev-1");
        assert_eq!(class, MessageClass::TwinCloud);

        let (device_id, class) = scheme.parse(&scheme.state("pump")).unwrap();
        assert_eq!(device_id, "pump");
        assert_eq!(class, MessageClass::State);
    }

    #[test]
    fn topic_parsing_rejects_foreign_topics() {
        let scheme = TopicScheme::default();

        assert!(scheme.parse("other/dev-1/twin/update").is_none());
        assert!(scheme.parse("$hw/events/devicedev-1/twin/get").is_none());
        assert!(scheme.parse("$hw/events/device/twin/update").is_none());
    }
}
