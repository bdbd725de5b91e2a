//! Agent runtime orchestration.

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use devtwin_client::{MqttTransport, SyncReport, Transport, TwinSync};
use devtwin_core::DeviceState;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Connect, then report every reading read from stdin until EOF or
    /// Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or a state update
    /// fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting agent runtime");

        let transport = MqttTransport::connect(self.config.transport_config()?)
            .await
            .context("Failed to create MQTT transport")?;
        let sync = TwinSync::new(transport, self.config.sync_config());

        let stdin = BufReader::new(tokio::io::stdin());
        let result = report_readings(&sync, stdin, tokio::signal::ctrl_c()).await;

        if let Err(err) = sync.transport().disconnect().await {
            tracing::warn!(error = %err, "Failed to disconnect from MQTT broker");
        }

        tracing::info!("Agent stopped");
        result
    }
}

/// Announce the device, report each non-empty input line as a reading, and
/// announce the device offline once input ends or `shutdown` resolves.
///
/// `shutdown` also interrupts a sync still waiting for an acknowledgment.
/// The online and offline announcements are not interrupted.
///
/// # Errors
///
/// Returns error if a state update fails or the input cannot be read.
pub async fn report_readings<T, R, S>(sync: &TwinSync<T>, input: R, shutdown: S) -> Result<()>
where
    T: Transport,
    R: AsyncBufRead + Unpin,
    S: Future,
{
    sync.change_sensor_status(DeviceState::Online.as_str())
        .await
        .context("Failed to announce device online")?;

    tracing::info!("Agent running, press Ctrl+C to stop");

    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read reading")? else {
                    tracing::info!("Input closed");
                    break;
                };

                let reading = line.trim();
                if reading.is_empty() {
                    continue;
                }

                // A publish waits for its ack without a timeout, so shutdown
                // has to be able to cut it short.
                let report = tokio::select! {
                    report = sync.update(reading) => report,
                    _ = &mut shutdown => {
                        tracing::info!(reading, "Shutdown signal received, abandoning sync");
                        break;
                    }
                };
                log_report(reading, &report);
            }

            // Handle shutdown
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    sync.change_sensor_status(DeviceState::Offline.as_str())
        .await
        .context("Failed to announce device offline")?;

    Ok(())
}

fn log_report(reading: &str, report: &SyncReport) {
    if report.is_complete() {
        tracing::debug!(reading, "Reading synced to edge and cloud");
    } else {
        tracing::warn!(
            reading,
            edge_ok = report.edge.is_ok(),
            cloud_ok = report.cloud.is_ok(),
            "Reading only partially synced"
        );
    }
}
