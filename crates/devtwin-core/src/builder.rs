//! Builders that turn raw readings into twin documents.

use crate::twin::{DeviceStateUpdate, DeviceTwinUpdate, MsgTwin, TwinValue, TypeMetadata};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification tag attached to freshly reported values.
pub const UPDATED: &str = "Updated";

/// Build a twin update carrying one reported reading.
///
/// The document holds exactly one field, `field`, with its actual value set to
/// `raw` and its type tag set to [`UPDATED`]. The update identity is left
/// unstamped; see [`DeviceTwinUpdate::stamp`].
#[must_use]
pub fn build_twin_update(field: &str, raw: &str) -> DeviceTwinUpdate {
    let mut update = DeviceTwinUpdate::default();
    update.twin.insert(
        field.to_string(),
        MsgTwin {
            actual: Some(TwinValue::new(raw)),
            metadata: Some(TypeMetadata::new(UPDATED)),
            ..MsgTwin::default()
        },
    );
    update
}

/// Build a state update. The state string is not validated.
#[must_use]
pub fn build_state_update(state: &str) -> DeviceStateUpdate {
    DeviceStateUpdate {
        state: Some(state.to_string()),
    }
}

/// Lifecycle states a device reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Device is up and reporting
    Online,
    /// Device is going away
    Offline,
}

impl DeviceState {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twin_update_has_single_tagged_field() {
        let update = build_twin_update("CPU_Temperatur", "42.5");

        assert_eq!(update.twin.len(), 1);
        let field = update.field("CPU_Temperatur").unwrap();
        assert_eq!(
            field.actual.as_ref().and_then(|a| a.value.as_deref()),
            Some("42.5")
        );
        assert_eq!(
            field.metadata.as_ref().and_then(|m| m.kind.as_deref()),
            Some(UPDATED)
        );
        assert!(field.optional.is_none());
        assert!(field.expected_version.is_none());
        assert!(field.actual_version.is_none());
    }

    #[test]
    fn twin_update_is_unstamped() {
        let update = build_twin_update("fan", "on");
        assert_eq!(update.base.event_id, "");
        assert_eq!(update.base.timestamp, 0);
    }

    #[test]
    fn twin_update_accepts_arbitrary_text() {
        for (field, raw) in [("", ""), ("näme", "ü\"quoted\""), ("a/b", "  spaced  ")] {
            let update = build_twin_update(field, raw);
            let actual = update.field(field).and_then(|f| f.actual.as_ref()).unwrap();
            assert_eq!(actual.value.as_deref(), Some(raw));
        }
    }

    #[test]
    fn twin_update_wire_shape() {
        let text = serde_json::to_string(&build_twin_update("CPU_Temperatur", "42.5")).unwrap();
        assert!(text.contains(
            r#""twin":{"CPU_Temperatur":{"temperature":{"value":"42.5"},"metadata":{"type":"Updated"}}}"#
        ));
    }

    #[test]
    fn state_update_wraps_literal() {
        assert_eq!(
            build_state_update("maintenance").state.as_deref(),
            Some("maintenance")
        );
        let text = serde_json::to_string(&build_state_update(DeviceState::Online.as_str())).unwrap();
        assert_eq!(text, r#"{"state":"online"}"#);
    }
}
