//! Twin document model.
//!
//! Wire names follow the edge broker's device twin protocol. Optional members
//! are skipped when absent; they are never written as `null`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identity of a single update instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseMessage {
    /// Event identifier (empty until stamped)
    #[serde(default)]
    pub event_id: String,
    /// Milliseconds since UNIX epoch (zero until stamped)
    #[serde(default)]
    pub timestamp: i64,
}

impl BaseMessage {
    /// Create a message identity with a fresh event id and the current time.
    #[must_use]
    pub fn stamped() -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Whether this identity has been stamped.
    #[must_use]
    pub fn is_stamped(&self) -> bool {
        !self.event_id.is_empty()
    }
}

/// Timestamp metadata of a twin value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMetadata {
    /// When the value was observed; absent means not yet stamped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// One versioned scalar reading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinValue {
    /// Reading; absent means unknown or unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Timestamp metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ValueMetadata>,
}

impl TwinValue {
    /// A value carrying only the reading.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            metadata: None,
        }
    }

    /// Attach an observation timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.metadata = Some(ValueMetadata {
            timestamp: Some(timestamp),
        });
        self
    }
}

/// Free-form classification tag of a twin field (e.g. `"Updated"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMetadata {
    /// Classification tag
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl TypeMetadata {
    /// Create a tag.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
        }
    }
}

/// Edge and cloud version counters of a twin field.
///
/// The counters are independent. Nothing here reconciles them; callers bump
/// the side they observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinVersion {
    /// Version observed by the cloud
    #[serde(rename = "cloud")]
    pub cloud_version: i64,
    /// Version observed by the edge
    #[serde(rename = "edge")]
    pub edge_version: i64,
}

impl TwinVersion {
    /// Increment the edge counter and return the new value.
    pub fn bump_edge(&mut self) -> i64 {
        self.edge_version += 1;
        self.edge_version
    }

    /// Increment the cloud counter and return the new value.
    pub fn bump_cloud(&mut self) -> i64 {
        self.cloud_version += 1;
        self.cloud_version
    }
}

/// One named field of the twin document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgTwin {
    /// Actual reported reading
    #[serde(
        rename = "temperature",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub actual: Option<TwinValue>,
    /// Whether the field is optional for the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    /// Classification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TypeMetadata>,
    /// Expected (desired) value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<TwinValue>,
    /// Version counters of the actual value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_version: Option<TwinVersion>,
}

/// A twin update document.
///
/// Field names are unique; the map is ordered so a document always encodes to
/// the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTwinUpdate {
    /// Update identity
    #[serde(flatten)]
    pub base: BaseMessage,
    /// Twin fields by name
    #[serde(default)]
    pub twin: BTreeMap<String, MsgTwin>,
}

impl DeviceTwinUpdate {
    /// Replace the identity with a freshly stamped one.
    #[must_use]
    pub fn stamp(mut self) -> Self {
        self.base = BaseMessage::stamped();
        self
    }

    /// Look up a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&MsgTwin> {
        self.twin.get(name)
    }
}

/// Device lifecycle signal, independent of twin content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStateUpdate {
    /// Lifecycle state (e.g. `online`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}
