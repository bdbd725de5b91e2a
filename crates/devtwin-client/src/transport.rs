//! MQTT transport for publishing twin documents.
//!
//! TLS is always enabled. The broker certificate is not verified and no
//! client certificate is presented.

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use url::Url;

const DEFAULT_PORT: u16 = 1883;
const DELIVERY_BACKLOG: usize = 64;

/// Publishing side of a pub/sub broker connection.
///
/// The returned future resolves once the transport acknowledges the
/// publish. No timeout is applied.
pub trait Transport: Send + Sync {
    /// Publish `payload` on `topic` and wait for the acknowledgment.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Configuration for the MQTT transport.
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    /// MQTT broker URL (e.g., <tcp://localhost:1883>)
    pub mqtt_broker: String,
    /// Client ID for MQTT connection
    pub client_id: String,
    /// Username; empty disables authentication
    pub username: String,
    /// Password; only sent together with a username
    pub password: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Delivery guarantee for publishes
    pub qos: QoS,
    /// Pause after a connection error before the event loop reconnects
    pub reconnect_delay: Duration,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            mqtt_broker: "tcp://localhost:1883".to_string(),
            client_id: "devtwin".to_string(),
            username: String::new(),
            password: String::new(),
            keep_alive: Duration::from_secs(30),
            qos: QoS::AtMostOnce,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl MqttTransportConfig {
    /// Configuration for a device, which connects under its own identifier.
    #[must_use]
    pub fn new(mqtt_broker: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            mqtt_broker: mqtt_broker.into(),
            client_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Set username and password.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Build the client options.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn mqtt_options(&self) -> Result<MqttOptions, TransportError> {
        let (host, port) = parse_mqtt_url(&self.mqtt_broker)?;

        let mut mqtt_options = MqttOptions::new(&self.client_id, host, port);
        mqtt_options.set_keep_alive(self.keep_alive);
        mqtt_options.set_clean_session(true);
        mqtt_options.set_transport(rumqttc::Transport::tls_with_config(insecure_tls()));

        if let Some((username, password)) = credentials(&self.username, &self.password) {
            mqtt_options.set_credentials(username, password);
        }

        Ok(mqtt_options)
    }
}

/// Credentials to send for a username/password pair.
///
/// An empty username sends nothing. An empty password is left out of the
/// CONNECT packet, so only the username is sent.
#[must_use]
pub fn credentials(username: &str, password: &str) -> Option<(String, String)> {
    if username.is_empty() {
        return None;
    }
    Some((username.to_string(), password.to_string()))
}

/// Map a numeric QoS level.
///
/// # Errors
///
/// Returns error for levels other than 0, 1 and 2.
pub fn qos_from_level(level: u8) -> Result<QoS, TransportError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransportError::InvalidQos(other)),
    }
}

/// What the event loop observed about outgoing publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Delivery {
    /// Publish written to the network
    Written(u16),
    /// PUBACK or PUBCOMP received
    Acked(u16),
    /// Connection error while a publish may be in flight
    Failed(String),
}

/// Delivery notices, plus what earlier failed publishes still owe.
///
/// rumqttc replays a publish that was cut off by a connection error once it
/// reconnects. Those replays reach the channel before any later publish is
/// written, so they are counted here and skipped.
#[derive(Debug)]
struct Deliveries {
    rx: mpsc::Receiver<Delivery>,
    /// Failed publishes the event loop has not written yet
    unwritten: usize,
    /// Packet ids of failed publishes that will be resent
    resent: HashSet<u16>,
    /// A publish is waiting; stays set when the waiting future is dropped
    waiting: bool,
    /// Packet id of the waiting publish once written
    waiting_pkid: Option<u16>,
}

impl Deliveries {
    fn new(rx: mpsc::Receiver<Delivery>) -> Self {
        Self {
            rx,
            unwritten: 0,
            resent: HashSet::new(),
            waiting: false,
            waiting_pkid: None,
        }
    }

    /// Whether a write belongs to an earlier, failed publish.
    fn is_replay(&mut self, pkid: u16) -> bool {
        if pkid != 0 && self.resent.contains(&pkid) {
            return true;
        }
        if self.unwritten > 0 {
            self.unwritten -= 1;
            return true;
        }
        false
    }

    /// Record a publish given up on; `pkid` is set once it was written.
    fn abandon(&mut self, pkid: Option<u16>) {
        match pkid {
            Some(id) => {
                self.resent.insert(id);
            }
            None => self.unwritten += 1,
        }
    }

    /// Give up on a publish whose wait was dropped, then fold in notices
    /// that arrived while no publish was waiting.
    fn settle(&mut self) {
        if std::mem::take(&mut self.waiting) {
            let pkid = self.waiting_pkid.take();
            self.abandon(pkid);
        }
        while let Ok(notice) = self.rx.try_recv() {
            match notice {
                Delivery::Written(id) => {
                    if !self.is_replay(id) {
                        tracing::trace!(pkid = id, "Unexpected publish write");
                    }
                }
                Delivery::Acked(id) => {
                    self.resent.remove(&id);
                }
                Delivery::Failed(_) => {}
            }
        }
    }
}

/// MQTT publisher with acknowledgment tracking.
pub struct MqttTransport {
    client: AsyncClient,
    qos: QoS,
    deliveries: Mutex<Deliveries>,
    driver: JoinHandle<()>,
}

impl MqttTransport {
    /// Connect to the broker.
    ///
    /// Waits for the first connection attempt. A failed attempt is logged and
    /// the transport is returned anyway; the event loop keeps reconnecting.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub async fn connect(config: MqttTransportConfig) -> Result<Self, TransportError> {
        let mqtt_options = config.mqtt_options()?;
        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);

        let (tx, rx) = mpsc::channel(DELIVERY_BACKLOG);
        let (connected_tx, connected_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(eventloop, tx, connected_tx, config.reconnect_delay));

        match connected_rx.await {
            Ok(Ok(())) => {
                tracing::info!(
                    broker = %config.mqtt_broker,
                    client_id = %config.client_id,
                    "Connected to MQTT broker"
                );
            }
            Ok(Err(reason)) => {
                tracing::warn!(
                    broker = %config.mqtt_broker,
                    error = %reason,
                    "Initial MQTT connection failed, continuing with disconnected client"
                );
            }
            Err(_) => {
                tracing::warn!(
                    broker = %config.mqtt_broker,
                    "MQTT event loop stopped before connecting"
                );
            }
        }

        Ok(Self::from_parts(client, config.qos, rx, driver))
    }

    fn from_parts(
        client: AsyncClient,
        qos: QoS,
        deliveries: mpsc::Receiver<Delivery>,
        driver: JoinHandle<()>,
    ) -> Self {
        Self {
            client,
            qos,
            deliveries: Mutex::new(Deliveries::new(deliveries)),
            driver,
        }
    }

    /// Delivery guarantee used for publishes.
    #[must_use]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Send DISCONNECT to the broker.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Disconnect(e.to_string()))
    }
}

impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        // One publish in flight at a time so notices match the request.
        let mut deliveries = self.deliveries.lock().await;
        deliveries.settle();

        tracing::debug!(topic, payload_len = payload.len(), qos = ?self.qos, "Publishing");

        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        deliveries.waiting = true;
        deliveries.waiting_pkid = None;
        let mut pkid = None;
        let result = loop {
            let Some(notice) = deliveries.rx.recv().await else {
                break Err(TransportError::Closed);
            };

            match notice {
                Delivery::Written(id) if pkid.is_none() => {
                    if deliveries.is_replay(id) {
                        continue;
                    }
                    if self.qos == QoS::AtMostOnce {
                        break Ok(());
                    }
                    pkid = Some(id);
                    deliveries.waiting_pkid = pkid;
                }
                Delivery::Written(_) => {}
                Delivery::Acked(id) if pkid == Some(id) => break Ok(()),
                Delivery::Acked(id) => {
                    deliveries.resent.remove(&id);
                }
                Delivery::Failed(reason) => {
                    deliveries.abandon(pkid);
                    break Err(TransportError::Ack(reason));
                }
            }
        };

        deliveries.waiting = false;
        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(
    mut eventloop: EventLoop,
    deliveries: mpsc::Sender<Delivery>,
    connected: oneshot::Sender<Result<(), String>>,
    reconnect_delay: Duration,
) {
    let mut connected = Some(connected);

    loop {
        let notice = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("MQTT connection acknowledged");
                if let Some(tx) = connected.take() {
                    let _ = tx.send(Ok(()));
                }
                continue;
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => Delivery::Written(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => Delivery::Acked(ack.pkid),
            Ok(Event::Incoming(Packet::PubComp(comp))) => Delivery::Acked(comp.pkid),
            Ok(_) => continue,
            Err(ConnectionError::RequestsDone) => {
                tracing::debug!("MQTT client dropped, stopping event loop");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "MQTT error");
                let reason = e.to_string();
                if let Some(tx) = connected.take() {
                    let _ = tx.send(Err(reason.clone()));
                }
                notify(&deliveries, Delivery::Failed(reason));
                // Try to reconnect after a delay
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
        };

        notify(&deliveries, notice);
    }
}

fn notify(deliveries: &mpsc::Sender<Delivery>, notice: Delivery) {
    if let Err(mpsc::error::TrySendError::Full(dropped)) = deliveries.try_send(notice) {
        tracing::trace!(?dropped, "No publisher waiting, dropping delivery notice");
    }
}

/// TLS client configuration that skips certificate verification.
fn insecure_tls() -> TlsConfiguration {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification::new()))
        .with_no_client_auth();
    TlsConfiguration::Rustls(Arc::new(config))
}

/// Accepts any server certificate. Handshake signatures are still checked
/// against the presented certificate.
#[derive(Debug)]
struct SkipServerVerification(CryptoProvider);

impl SkipServerVerification {
    fn new() -> Self {
        Self(ring::default_provider())
    }
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Parse MQTT URL into host and port.
fn parse_mqtt_url(input: &str) -> Result<(String, u16), TransportError> {
    if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| TransportError::InvalidUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" | "ssl" | "tls" | "mqtts" => {}
            scheme => {
                return Err(TransportError::InvalidUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TransportError::InvalidUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => DEFAULT_PORT,
        Some(port) => port
            .parse()
            .map_err(|_| TransportError::InvalidUrl(format!("{input}: invalid port '{port}'")))?,
    };
    if parts.next().is_some() {
        return Err(TransportError::InvalidUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

/// Errors that can occur with the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Invalid MQTT URL
    #[error("invalid MQTT URL: {0}")]
    InvalidUrl(String),
    /// Unsupported QoS level
    #[error("invalid QoS level: {0}")]
    InvalidQos(u8),
    /// Publish request could not be queued
    #[error("publish error: {0}")]
    Publish(String),
    /// Connection failed before the publish was acknowledged
    #[error("acknowledgment error: {0}")]
    Ack(String),
    /// Disconnect request could not be queued
    #[error("disconnect error: {0}")]
    Disconnect(String),
    /// Event loop is gone
    #[error("transport closed")]
    Closed,
}
