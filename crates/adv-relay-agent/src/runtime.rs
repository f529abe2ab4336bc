//! Relay runtime orchestration.

use crate::bridge::{Bridge, Outcome};
use crate::config::{RelayConfig, DEFAULT_SOURCE_CLIENT_ID};
use crate::transport::{mqtt_options, qos_from_level, ConnectParams, MqttConnector, RETRY_DELAY};
use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, Packet};
use std::future::Future;
use std::time::Duration;

/// Time allowed for the source disconnect to be flushed on shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Counters over the lifetime of the relay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RelayStats {
    /// Inbound messages handled
    messages: usize,
    /// Records accepted by a publisher
    relayed: usize,
    /// Records a publisher refused
    rejected: usize,
    /// Inbound messages that produced no publish attempt
    dropped: usize,
}

impl RelayStats {
    fn record(&mut self, outcome: &Outcome) {
        self.messages += 1;
        match outcome {
            Outcome::Published { total, accepted } => {
                self.relayed += accepted;
                self.rejected += total - accepted;
            }
            _ => self.dropped += 1,
        }
    }
}

/// Resolves on Ctrl-C. A failure to listen for the signal counts as one.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Wait out `delay`, returning `true` if `shutdown` resolved first.
async fn back_off(delay: Duration, shutdown: impl Future<Output = ()>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        () = shutdown => true,
    }
}

/// The relay runtime.
pub struct Relay {
    config: RelayConfig,
}

impl Relay {
    /// Create a relay.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run until Ctrl-C.
    ///
    /// One task owns the source event loop and the bridge, so inbound
    /// messages are processed one at a time, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns error if the source connection cannot be set up.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting relay runtime");

        let subscription = self.config.subscription()?.clone();
        let qos = qos_from_level(subscription.qos)
            .with_context(|| format!("Invalid subscription qos {}", subscription.qos))?;

        let mut bridge = Bridge::from_config(&self.config, MqttConnector)?;

        let source = &self.config.brokers.source;
        let client_id = source
            .client_id
            .clone()
            .unwrap_or_else(|| DEFAULT_SOURCE_CLIENT_ID.to_string());
        let params = ConnectParams::new(source, client_id)
            .with_login(source.username.as_deref(), source.password.as_deref());
        let options = mqtt_options(&params).context("Invalid source broker settings")?;

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        tracing::info!(
            host = %params.host,
            port = params.port,
            client_id = %params.client_id,
            tls = params.tls,
            "Connecting to source broker"
        );

        let mut stats = RelayStats::default();

        loop {
            tokio::select! {
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            tracing::info!(
                                code = ?ack.code,
                                topic = %subscription.topic,
                                qos = subscription.qos,
                                "Connected to source broker, subscribing"
                            );
                            if let Err(e) = client.try_subscribe(&subscription.topic, qos) {
                                tracing::error!(error = %e, "Failed to subscribe");
                            }
                        }
                        Ok(Event::Incoming(Packet::SubAck(_))) => {
                            tracing::info!("Subscription acknowledged");
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let outcome = bridge.handle(&publish.topic, &publish.payload).await;
                            stats.record(&outcome);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Source MQTT error");
                            if back_off(RETRY_DELAY, shutdown_signal()).await {
                                tracing::info!("Shutdown signal received");
                                break;
                            }
                        }
                    }
                }

                // Handle shutdown
                () = shutdown_signal() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        bridge.shutdown().await;

        let _ = client.try_disconnect();
        let _ = tokio::time::timeout(DISCONNECT_GRACE, eventloop.poll()).await;

        tracing::info!(
            messages = stats.messages,
            relayed = stats.relayed,
            rejected = stats.rejected,
            dropped = stats.dropped,
            "Relay stopped"
        );
        Ok(())
    }
}
