//! Edge-then-cloud twin synchronization.

use crate::transport::{Transport, TransportError};
use devtwin_core::{build_state_update, build_twin_update, DeviceTwinUpdate};
use devtwin_proto::{encode, MessageClass, MessageError, TopicScheme};
use std::time::Duration;

/// Twin field reported by [`TwinSync::update`] unless configured otherwise.
pub const DEFAULT_TWIN_FIELD: &str = "CPU_Temperatur";

/// Pause between the edge publish and the cloud publish.
pub const DEFAULT_CLOUD_DELAY: Duration = Duration::from_secs(2);

/// Synchronization settings for one device.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device identifier, inserted verbatim into topics
    pub device_id: String,
    /// Topic scheme
    pub topics: TopicScheme,
    /// Twin field that carries reported readings
    pub twin_field: String,
    /// Unconditional pause before the cloud publish
    pub cloud_delay: Duration,
    /// Stamp `event_id` and `timestamp` on twin updates
    pub stamp_events: bool,
}

impl SyncConfig {
    /// Default settings for a device.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            topics: TopicScheme::default(),
            twin_field: DEFAULT_TWIN_FIELD.to_string(),
            cloud_delay: DEFAULT_CLOUD_DELAY,
            stamp_events: false,
        }
    }
}

/// How bad a sync failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The device cannot signal its own state; the caller should stop.
    Fatal,
    /// A missed telemetry point; the next update tries again.
    Recoverable,
}

/// Outcome of one [`TwinSync::update`] call.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Edge publish result
    pub edge: Result<(), SyncError>,
    /// Cloud publish result
    pub cloud: Result<(), SyncError>,
}

impl SyncReport {
    /// Both phases succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.edge.is_ok() && self.cloud.is_ok()
    }

    /// Failures, edge first.
    pub fn errors(&self) -> impl Iterator<Item = &SyncError> {
        [&self.edge, &self.cloud]
            .into_iter()
            .filter_map(|result| result.as_ref().err())
    }
}

/// Device twin synchronizer.
///
/// Owns the transport handle. All operations take `&self`; concurrent
/// `update` calls are not ordered against each other.
pub struct TwinSync<T> {
    transport: T,
    config: SyncConfig,
}

impl<T: Transport> TwinSync<T> {
    /// Create a synchronizer over a connected transport.
    pub fn new(transport: T, config: SyncConfig) -> Self {
        Self { transport, config }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Synchronization settings.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Build the twin update for a raw reading.
    #[must_use]
    pub fn build_update(&self, value: &str) -> DeviceTwinUpdate {
        let update = build_twin_update(&self.config.twin_field, value);
        if self.config.stamp_events {
            update.stamp()
        } else {
            update
        }
    }

    /// Publish a device state and wait for the acknowledgment.
    ///
    /// # Errors
    ///
    /// Every error is [`Severity::Fatal`].
    pub async fn change_sensor_status(&self, state: &str) -> Result<(), SyncError> {
        tracing::info!(device_id = %self.config.device_id, state, "Changing device state");

        let result = match encode(&build_state_update(state)) {
            Ok(payload) => self.publish(MessageClass::State, payload).await,
            // Defensive, as in `publish_twin`.
            Err(source) => Err(SyncError::Encode {
                class: MessageClass::State,
                source,
            }),
        };

        if let Err(err) = &result {
            tracing::error!(error = %err, state, "Device state update failed");
        }
        result
    }

    /// Publish a twin update to the edge and wait for the acknowledgment.
    ///
    /// # Errors
    ///
    /// Every error is [`Severity::Recoverable`] and has already been logged.
    pub async fn change_twin_value(&self, update: &DeviceTwinUpdate) -> Result<(), SyncError> {
        self.publish_twin(MessageClass::Twin, update).await
    }

    /// Publish a twin update to the cloud and wait for the acknowledgment.
    ///
    /// # Errors
    ///
    /// Every error is [`Severity::Recoverable`] and has already been logged.
    pub async fn sync_to_cloud(&self, update: &DeviceTwinUpdate) -> Result<(), SyncError> {
        self.publish_twin(MessageClass::TwinCloud, update).await
    }

    /// Report a reading to the edge, pause, then report it to the cloud.
    ///
    /// Both phases publish the same document. A failed edge publish does not
    /// skip the pause or the cloud publish.
    pub async fn update(&self, value: &str) -> SyncReport {
        let update = self.build_update(value);

        tracing::info!(device_id = %self.config.device_id, "Syncing to edge");
        let edge = self.change_twin_value(&update).await;

        tokio::time::sleep(self.config.cloud_delay).await;

        tracing::info!(device_id = %self.config.device_id, "Syncing to cloud");
        let cloud = self.sync_to_cloud(&update).await;

        SyncReport { edge, cloud }
    }

    async fn publish_twin(
        &self,
        class: MessageClass,
        update: &DeviceTwinUpdate,
    ) -> Result<(), SyncError> {
        let result = match encode(update) {
            Ok(payload) => self.publish(class, payload).await,
            // Defensive: the derived document types always serialize.
            Err(source) => Err(SyncError::Encode { class, source }),
        };

        if let Err(err) = &result {
            tracing::warn!(error = %err, %class, "Twin update not delivered");
        }
        result
    }

    async fn publish(&self, class: MessageClass, payload: Vec<u8>) -> Result<(), SyncError> {
        let topic = self.config.topics.resolve(&self.config.device_id, class);

        tracing::debug!(topic, payload_len = payload.len(), "Publishing twin message");

        match self.transport.publish(&topic, payload).await {
            Ok(()) => Ok(()),
            Err(source) => Err(SyncError::Publish {
                class,
                topic,
                source,
            }),
        }
    }
}

/// Errors raised while synchronizing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Payload could not be encoded
    #[error("failed to encode {class} payload: {source}")]
    Encode {
        /// Message class being published
        class: MessageClass,
        /// Codec error
        source: MessageError,
    },
    /// Transport rejected or failed the publish
    #[error("publish to {topic} failed: {source}")]
    Publish {
        /// Message class being published
        class: MessageClass,
        /// Resolved topic
        topic: String,
        /// Transport error
        source: TransportError,
    },
}

impl SyncError {
    /// Message class the failure belongs to.
    #[must_use]
    pub fn class(&self) -> MessageClass {
        match self {
            Self::Encode { class, .. } | Self::Publish { class, .. } => *class,
        }
    }

    /// State updates are fatal; twin updates are recoverable.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self.class() {
            MessageClass::State => Severity::Fatal,
            MessageClass::Twin | MessageClass::TwinCloud => Severity::Recoverable,
        }
    }

    /// Shorthand for `severity() == Severity::Fatal`.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devtwin_proto::decode;
    use std::sync::Mutex;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Debug, Clone)]
    struct Published {
        topic: String,
        payload: Vec<u8>,
        at: Instant,
    }

    /// Records publishes; fails those whose topic ends with a listed suffix.
    #[derive(Default)]
    struct RecordingTransport {
        published: Mutex<Vec<Published>>,
        failing_suffixes: Vec<&'static str>,
    }

    impl RecordingTransport {
        fn failing(suffixes: &[&'static str]) -> Self {
            Self {
                failing_suffixes: suffixes.to_vec(),
                ..Self::default()
            }
        }

        fn published(&self) -> Vec<Published> {
            self.published.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
            self.published.lock().unwrap().push(Published {
                topic: topic.to_string(),
                payload,
                at: Instant::now(),
            });

            if self
                .failing_suffixes
                .iter()
                .any(|suffix| topic.ends_with(suffix))
            {
                return Err(TransportError::Ack("broker went away".to_string()));
            }
            Ok(())
        }
    }

    fn sync_with(transport: RecordingTransport) -> TwinSync<RecordingTransport> {
        TwinSync::new(transport, SyncConfig::new("dev-1"))
    }

    #[tokio::test(start_paused = true)]
    async fn update_publishes_edge_then_cloud() {
        let sync = sync_with(RecordingTransport::default());

        let report = sync.update("42.5").await;
        assert!(report.is_complete());

        let published = sync.transport().published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "$hw/events/devicedev-1/twin/update");
        assert_eq!(published[1].topic, "$hw/events/devicedev-1/twin/cloud_update");
        assert_eq!(published[0].payload, published[1].payload);
        assert!(published[1].at - published[0].at >= DEFAULT_CLOUD_DELAY);

        let text = std::str::from_utf8(&published[0].payload).unwrap();
        assert!(text.contains(
            r#""twin":{"CPU_Temperatur":{"temperature":{"value":"42.5"},"metadata":{"type":"Updated"}}}"#
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_edge_publish_still_syncs_to_cloud() {
        let sync = sync_with(RecordingTransport::failing(&["/twin/update"]));

        let report = sync.update("17").await;

        let edge_err = assert_err!(&report.edge);
        assert_eq!(edge_err.severity(), Severity::Recoverable);
        assert_ok!(&report.cloud);
        assert_eq!(report.errors().count(), 1);

        let published = sync.transport().published();
        assert_eq!(published.len(), 2);
        assert!(published[1].topic.ends_with("/twin/cloud_update"));
        assert!(published[1].at - published[0].at >= DEFAULT_CLOUD_DELAY);
    }

    #[tokio::test]
    async fn delay_is_injectable() {
        let mut config = SyncConfig::new("dev-1");
        config.cloud_delay = Duration::ZERO;
        let sync = TwinSync::new(RecordingTransport::default(), config);

        let started = Instant::now();
        let report = sync.update("1").await;

        assert!(report.is_complete());
        assert!(started.elapsed() < DEFAULT_CLOUD_DELAY);
    }

    #[tokio::test]
    async fn state_publish_failure_is_fatal() {
        let sync = sync_with(RecordingTransport::failing(&["/state/update"]));

        let err = sync.change_sensor_status("online").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            SyncError::Publish { ref topic, .. } if topic == "$hw/events/devicedev-1/state/update"
        ));
    }

    #[tokio::test]
    async fn state_update_payload() {
        let sync = sync_with(RecordingTransport::default());

        assert_ok!(sync.change_sensor_status("online").await);

        let published = sync.transport().published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, br#"{"state":"online"}"#);
    }

    #[tokio::test]
    async fn twin_publish_failures_are_recoverable() {
        let sync = sync_with(RecordingTransport::failing(&[
            "/twin/update",
            "/twin/cloud_update",
        ]));
        let update = sync.build_update("3");

        let edge = sync.change_twin_value(&update).await.unwrap_err();
        let cloud = sync.sync_to_cloud(&update).await.unwrap_err();

        assert_eq!(edge.class(), MessageClass::Twin);
        assert_eq!(cloud.class(), MessageClass::TwinCloud);
        assert!(!edge.is_fatal());
        assert!(!cloud.is_fatal());
    }

    #[test]
    fn encode_failure_severity_follows_class() {
        let source = MessageError::Serialize("unsupported value".to_string());

        let state = SyncError::Encode {
            class: MessageClass::State,
            source: source.clone(),
        };
        let twin = SyncError::Encode {
            class: MessageClass::Twin,
            source: source.clone(),
        };
        let cloud = SyncError::Encode {
            class: MessageClass::TwinCloud,
            source,
        };

        assert_eq!(state.severity(), Severity::Fatal);
        assert_eq!(twin.severity(), Severity::Recoverable);
        assert_eq!(cloud.severity(), Severity::Recoverable);
        assert_eq!(
            state.to_string(),
            "failed to encode state payload: serialization failed: unsupported value"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stamping_is_opt_in() {
        let sync = sync_with(RecordingTransport::default());
        assert!(!sync.build_update("1").base.is_stamped());

        let mut config = SyncConfig::new("dev-1");
        config.stamp_events = true;
        let sync = TwinSync::new(RecordingTransport::default(), config);

        sync.update("1").await;
        let published = sync.transport().published();
        let edge: DeviceTwinUpdate = decode(&published[0].payload).unwrap();
        let cloud: DeviceTwinUpdate = decode(&published[1].payload).unwrap();
        assert!(edge.base.is_stamped());
        assert_eq!(edge.base, cloud.base);
    }

    #[tokio::test]
    async fn custom_field_and_prefix() {
        let mut config = SyncConfig::new("pump-2");
        config.topics = TopicScheme::new("plant/");
        config.twin_field = "flow".to_string();
        config.cloud_delay = Duration::ZERO;
        let sync = TwinSync::new(RecordingTransport::default(), config);

        sync.update("9.1").await;

        let published = sync.transport().published();
        assert_eq!(published[0].topic, "plant/pump-2/twin/update");
        let update: DeviceTwinUpdate = decode(&published[0].payload).unwrap();
        assert!(update.field("flow").is_some());
    }
}
