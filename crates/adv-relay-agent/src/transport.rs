//! Outbound MQTT transport.
//!
//! The bridge only needs two capabilities from the target broker: open a
//! connection for a device ([`Connector`]) and publish on it
//! ([`PublisherHandle`]). [`MqttConnector`] implements both with `rumqttc`;
//! each handle owns a task driving its event loop, so reconnection and
//! keep-alive stay inside the transport.

use crate::config::BrokerConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Keep-alive interval for every connection.
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Delay before polling again after a transport error.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long a closing publisher may take to flush its disconnect.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a publish may wait for room in the request channel.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Request channel capacity per client. Holds two full envelopes of 255
/// records, so a fresh publisher buffers its first message while connecting.
const CHANNEL_CAPACITY: usize = 512;

/// Everything needed to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Client identifier
    pub client_id: String,
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Username, anonymous if absent
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Connect over TLS
    pub tls: bool,
    /// Keep-alive interval
    pub keep_alive: Duration,
}

impl ConnectParams {
    /// Anonymous connection to `broker` as `client_id`.
    #[must_use]
    pub fn new(broker: &BrokerConfig, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            host: broker.host.clone(),
            port: broker.port,
            username: None,
            password: None,
            tls: broker.tls,
            keep_alive: KEEP_ALIVE,
        }
    }

    /// Authenticate with the given login. An empty username stays anonymous.
    #[must_use]
    pub fn with_login(mut self, username: Option<&str>, password: Option<&str>) -> Self {
        self.username = username.filter(|u| !u.is_empty()).map(ToString::to_string);
        self.password = self
            .username
            .as_ref()
            .map(|_| password.unwrap_or_default().to_string());
        self
    }
}

/// Opens outbound connections.
pub trait Connector {
    /// Handle produced for each connection.
    type Handle: PublisherHandle;

    /// Open a connection.
    ///
    /// Returns once the connection attempt has been issued; delivery of the
    /// broker's acknowledgement is the transport's concern.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be started.
    fn connect(&self, params: &ConnectParams) -> Result<Self::Handle, ConnectError>;
}

/// A live outbound connection.
pub trait PublisherHandle {
    /// Queue a non-retained message, waiting while the local buffer is full.
    ///
    /// Only local acceptance is reported, not delivery.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the message or the buffer
    /// stays full for longer than [`PUBLISH_TIMEOUT`].
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), PublishError>;

    /// Disconnect and release the connection. Errors are ignored.
    async fn close(self);
}

/// `rumqttc`-backed [`Connector`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl Connector for MqttConnector {
    type Handle = MqttPublisher;

    fn connect(&self, params: &ConnectParams) -> Result<MqttPublisher, ConnectError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConnectError::NoRuntime)?;
        let options = mqtt_options(params)?;

        let (client, eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        let driver = runtime.spawn(drive(params.client_id.clone(), eventloop));

        Ok(MqttPublisher { client, driver })
    }
}

/// Publisher connection to the target broker.
pub struct MqttPublisher {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

impl PublisherHandle for MqttPublisher {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), PublishError> {
        tokio::time::timeout(
            PUBLISH_TIMEOUT,
            self.client.publish(topic, qos, false, payload),
        )
        .await
        .map_err(|_| PublishError::TimedOut)?
        .map_err(|e| PublishError::Rejected(e.to_string()))
    }

    async fn close(mut self) {
        let _ = self.client.try_disconnect();
        if tokio::time::timeout(CLOSE_TIMEOUT, &mut self.driver)
            .await
            .is_err()
        {
            self.driver.abort();
        }
    }
}

/// Build `rumqttc` options from connection parameters.
///
/// # Errors
///
/// Returns error if the host or client identifier is unusable.
pub fn mqtt_options(params: &ConnectParams) -> Result<MqttOptions, ConnectError> {
    if params.host.is_empty() {
        return Err(ConnectError::InvalidParams("empty broker host".to_string()));
    }
    // MqttOptions::new panics on these.
    if params.client_id.is_empty() || params.client_id.starts_with(' ') {
        return Err(ConnectError::InvalidParams(format!(
            "invalid client id '{}'",
            params.client_id
        )));
    }

    let mut options = MqttOptions::new(&params.client_id, &params.host, params.port);
    options.set_keep_alive(params.keep_alive);
    options.set_clean_session(true);

    if let Some(username) = &params.username {
        options.set_credentials(username, params.password.as_deref().unwrap_or_default());
    }

    if params.tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    Ok(options)
}

/// Map a numeric QoS level.
#[must_use]
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

async fn drive(client_id: String, mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::info!(client_id, code = ?ack.code, "Publisher connected to target broker");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!(client_id, "Publisher disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(client_id, error = %e, "Publisher connection error");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// Errors opening a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// No tokio runtime to drive the connection
    #[error("no async runtime available to drive the connection")]
    NoRuntime,
    /// Parameters rejected before connecting
    #[error("invalid connection parameters: {0}")]
    InvalidParams(String),
}

/// Errors publishing a single message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Transport refused the message locally
    #[error("publish rejected: {0}")]
    Rejected(String),
    /// Local buffer stayed full
    #[error("publish timed out waiting for the request buffer")]
    TimedOut,
    /// Message body could not be serialized
    #[error("serialize error: {0}")]
    Serialize(String),
}

#[cfg(test)]
pub mod mock {
    //! In-memory transport recording every call.

    use super::{ConnectError, ConnectParams, Connector, PublishError, PublisherHandle};
    use rumqttc::QoS;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Published {
        pub client_id: String,
        pub topic: String,
        pub qos: QoS,
        pub payload: Vec<u8>,
    }

    #[derive(Debug, Default)]
    pub struct MockState {
        pub connects: Vec<ConnectParams>,
        pub published: Vec<Published>,
        pub closed: Vec<String>,
        /// Client IDs whose connect attempt fails
        pub refuse: HashSet<String>,
        /// Zero-based publish attempts to reject
        pub reject: HashSet<usize>,
        attempts: usize,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockConnector {
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockConnector {
        pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }
    }

    pub struct MockPublisher {
        client_id: String,
        state: Arc<Mutex<MockState>>,
    }

    impl Connector for MockConnector {
        type Handle = MockPublisher;

        fn connect(&self, params: &ConnectParams) -> Result<MockPublisher, ConnectError> {
            let mut state = self.state();
            if state.refuse.contains(&params.client_id) {
                return Err(ConnectError::InvalidParams("refused".to_string()));
            }
            state.connects.push(params.clone());
            Ok(MockPublisher {
                client_id: params.client_id.clone(),
                state: Arc::clone(&self.state),
            })
        }
    }

    impl PublisherHandle for MockPublisher {
        async fn publish(
            &self,
            topic: &str,
            qos: QoS,
            payload: Vec<u8>,
        ) -> Result<(), PublishError> {
            let mut state = self.state.lock().unwrap();
            let attempt = state.attempts;
            state.attempts += 1;
            if state.reject.contains(&attempt) {
                return Err(PublishError::Rejected("queue full".to_string()));
            }
            state.published.push(Published {
                client_id: self.client_id.clone(),
                topic: topic.to_string(),
                qos,
                payload,
            });
            Ok(())
        }

        async fn close(self) {
            self.state.lock().unwrap().closed.push(self.client_id);
        }
    }
}
