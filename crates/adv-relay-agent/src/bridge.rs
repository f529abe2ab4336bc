//! Bridge pipeline.
//!
//! Every inbound message runs to completion through
//! `Received -> Routed -> Decoded -> Published(n) -> Done`. Routing failures
//! stop at `Routed`, decode failures and empty envelopes stop at `Decoded`.
//! The terminal state is reported as an [`Outcome`].

use crate::config::RelayConfig;
use crate::directory::DeviceDirectory;
use crate::registry::PublisherRegistry;
use crate::routing::{RouteDecision, Router};
use crate::transport::{ConnectError, Connector, PublishError, PublisherHandle};
use adv_relay_proto::{decode_base64, DecodeError, OutputRecord, TelemetryRecord};
use anyhow::Result;
use rumqttc::QoS;
use serde::Deserialize;
use std::fmt;

/// QoS of every relayed record.
pub const OUTBOUND_QOS: QoS = QoS::AtLeastOnce;

/// Inbound JSON body. Only `data` is read.
#[derive(Debug, Deserialize)]
struct InboundBody {
    #[serde(default)]
    data: Option<String>,
}

/// Terminal state of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Topic does not carry a device identifier
    NotMatched,
    /// Device not whitelisted and unknown devices are skipped
    Skipped,
    /// Body is not a JSON object with a string `data` field
    InvalidBody(String),
    /// `data` field absent or empty
    MissingData,
    /// Envelope could not be decoded
    DecodeFailed(DecodeError),
    /// Envelope decoded to zero records
    Empty,
    /// Publisher for the device could not be created
    ConnectFailed(ConnectError),
    /// Records were handed to the publisher
    Published {
        /// Records decoded
        total: usize,
        /// Records the transport accepted
        accepted: usize,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMatched => write!(f, "topic not matched"),
            Self::Skipped => write!(f, "device skipped"),
            Self::InvalidBody(reason) => write!(f, "invalid JSON body: {reason}"),
            Self::MissingData => write!(f, "no 'data' field"),
            Self::DecodeFailed(err) => write!(f, "decode failed: {err}"),
            Self::Empty => write!(f, "no decoded records"),
            Self::ConnectFailed(err) => write!(f, "publisher unavailable: {err}"),
            Self::Published { total, accepted } => {
                write!(f, "published {accepted}/{total} records")
            }
        }
    }
}

/// Relays inbound envelopes to per-device outbound topics.
pub struct Bridge<C: Connector> {
    router: Router,
    directory: DeviceDirectory,
    registry: PublisherRegistry<C>,
}

impl<C: Connector> Bridge<C> {
    /// Assemble a bridge.
    pub fn new(router: Router, directory: DeviceDirectory, registry: PublisherRegistry<C>) -> Self {
        Self {
            router,
            directory,
            registry,
        }
    }

    /// Build a bridge from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription filter or routing template is invalid.
    pub fn from_config(config: &RelayConfig, connector: C) -> Result<Self> {
        let router = Router::new(
            config.inbound_pattern()?,
            config.outbound_template()?,
            config.skip_unknown,
        );
        let directory = DeviceDirectory::new(config.devices.iter().cloned());
        let registry = PublisherRegistry::new(connector, config.brokers.target.clone());

        if directory.is_empty() && config.skip_unknown {
            tracing::warn!("Device whitelist is empty and skip_unknown is set, nothing will be relayed");
        }

        tracing::info!(
            devices = directory.len(),
            skip_unknown = config.skip_unknown,
            outbound = %config.outbound_template()?,
            "Bridge configured"
        );

        Ok(Self::new(router, directory, registry))
    }

    /// Process one inbound message.
    pub async fn handle(&mut self, topic: &str, payload: &[u8]) -> Outcome {
        tracing::debug!(topic, payload_len = payload.len(), "Received inbound message");

        // Routed
        let Some(device_id) = self.router.device_id(topic) else {
            tracing::warn!(topic, "Topic does not match inbound pattern, skipping");
            return Outcome::NotMatched;
        };

        let credentials = match self.router.decide(device_id, &self.directory) {
            RouteDecision::Known(credentials) => Some(credentials),
            RouteDecision::AllowAnonymous => {
                tracing::warn!(device_id, "Device not in whitelist, publishing anonymously");
                None
            }
            RouteDecision::Skip => {
                tracing::info!(device_id, "Device not in whitelist, skipping");
                return Outcome::Skipped;
            }
        };

        // Decoded
        let records = match decode_body(payload) {
            Ok(records) if records.is_empty() => {
                tracing::warn!(device_id, "Envelope contains no records");
                return Outcome::Empty;
            }
            Ok(records) => records,
            Err(outcome) => {
                tracing::warn!(device_id, %outcome, "Dropping message");
                return outcome;
            }
        };

        // Published(n)
        let outbound = self.router.outbound_topic(device_id);
        let publisher = match self.registry.get_or_create(device_id, credentials) {
            Ok(publisher) => publisher,
            Err(err) => {
                tracing::error!(device_id, error = %err, "Failed to create publisher");
                return Outcome::ConnectFailed(err);
            }
        };

        let total = records.len();
        let mut accepted = 0;
        for (index, record) in records.iter().enumerate() {
            match publish_record(publisher, &outbound, record).await {
                Ok(bytes) => {
                    accepted += 1;
                    tracing::debug!(
                        from = topic,
                        to = %outbound,
                        record = index + 1,
                        total,
                        bytes,
                        "Published record"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        to = %outbound,
                        record = index + 1,
                        total,
                        error = %err,
                        "Failed to publish record"
                    );
                }
            }
        }

        tracing::info!(device_id, to = %outbound, total, accepted, "Relayed envelope");

        Outcome::Published { total, accepted }
    }

    /// Close every publisher.
    pub async fn shutdown(&mut self) {
        self.registry.shutdown().await;
    }
}

fn decode_body(payload: &[u8]) -> Result<Vec<OutputRecord>, Outcome> {
    let body: InboundBody =
        serde_json::from_slice(payload).map_err(|e| Outcome::InvalidBody(e.to_string()))?;

    let data = body
        .data
        .filter(|data| !data.is_empty())
        .ok_or(Outcome::MissingData)?;

    let records = decode_base64(&data).map_err(Outcome::DecodeFailed)?;

    Ok(records.iter().map(TelemetryRecord::to_output).collect())
}

async fn publish_record<H: PublisherHandle>(
    publisher: &H,
    topic: &str,
    record: &OutputRecord,
) -> Result<usize, PublishError> {
    let body = record
        .to_json()
        .map_err(|e| PublishError::Serialize(e.to_string()))?;
    let bytes = body.len();

    publisher
        .publish(topic, OUTBOUND_QOS, body.into_bytes())
        .await?;

    Ok(bytes)
}
