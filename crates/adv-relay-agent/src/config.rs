//! Relay configuration.

use crate::directory::DeviceCredentials;
use adv_relay_proto::topics::DEFAULT_INBOUND_FILTER;
use adv_relay_proto::{TopicPattern, TopicTemplate};
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

/// Config file used when `ADV_RELAY_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Default MQTT port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Client ID of the source connection when none is configured.
pub const DEFAULT_SOURCE_CLIENT_ID: &str = "bridge-source";

/// Relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Source and target brokers
    pub brokers: BrokersConfig,

    /// Inbound subscriptions (only the first is used)
    #[serde(default = "default_subscriptions")]
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Routing rules (only the first is used)
    pub routing: Vec<RoutingRule>,

    /// Whitelisted devices and their target broker credentials
    #[serde(default)]
    pub devices: Vec<DeviceCredentials>,

    /// Drop messages from devices not in the whitelist
    #[serde(default = "default_skip_unknown")]
    pub skip_unknown: bool,
}

/// Broker pair.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokersConfig {
    /// Broker the devices publish to
    pub source: BrokerConfig,
    /// Broker records are relayed to
    pub target: BrokerConfig,
}

/// Connection settings for one broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// Host name or address
    pub host: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username
    #[serde(default)]
    pub username: Option<String>,

    /// Password
    #[serde(default)]
    pub password: Option<String>,

    /// Client identifier
    #[serde(default)]
    pub client_id: Option<String>,

    /// Connect over TLS with the platform root certificates
    #[serde(default)]
    pub tls: bool,
}

/// Inbound subscription.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionConfig {
    /// Topic filter with one `+` device segment
    pub topic: String,

    /// Subscription QoS level (0, 1 or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,
}

/// Outbound routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoutingRule {
    /// Outbound topic template with one `{device}` placeholder
    pub to: String,
}

fn default_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_qos() -> u8 {
    1
}

fn default_skip_unknown() -> bool {
    true
}

fn default_subscriptions() -> Vec<SubscriptionConfig> {
    vec![SubscriptionConfig {
        topic: DEFAULT_INBOUND_FILTER.to_string(),
        qos: default_qos(),
    }]
}

impl BrokerConfig {
    /// Broker on `host` with every other setting at its default.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MQTT_PORT,
            username: None,
            password: None,
            client_id: None,
            tls: false,
        }
    }

    /// Replace host, port and TLS from a broker URL.
    ///
    /// # Errors
    ///
    /// Returns error if the URL cannot be parsed.
    pub fn apply_url(&mut self, input: &str) -> Result<(), ConfigError> {
        let endpoint = parse_broker_url(input)?;
        self.host = endpoint.host;
        self.port = endpoint.port;
        self.tls = endpoint.tls;
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            brokers: BrokersConfig {
                source: BrokerConfig::new("localhost"),
                target: BrokerConfig::new("localhost"),
            },
            subscriptions: default_subscriptions(),
            routing: vec![RoutingRule {
                to: "devices/{device}/telemetry".to_string(),
            }],
            devices: Vec::new(),
            skip_unknown: default_skip_unknown(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the JSON file and environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ADV_RELAY_CONFIG`: path of the JSON config file (default `config.json`)
    /// - `ADV_RELAY_SOURCE_BROKER`: source broker URL, overrides host/port/tls
    /// - `ADV_RELAY_TARGET_BROKER`: target broker URL, overrides host/port/tls
    /// - `ADV_RELAY_SKIP_UNKNOWN`: `true`/`false`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, an override is malformed,
    /// or the result fails validation.
    pub fn load() -> Result<Self> {
        let path = std::env::var("ADV_RELAY_CONFIG")
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Read configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config JSON in {}", path.display()))
    }

    /// Apply overrides looked up through `var`.
    ///
    /// # Errors
    ///
    /// Returns error if an override value is malformed.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("ADV_RELAY_SOURCE_BROKER") {
            self.brokers
                .source
                .apply_url(&url)
                .context("Invalid ADV_RELAY_SOURCE_BROKER")?;
        }

        if let Some(url) = var("ADV_RELAY_TARGET_BROKER") {
            self.brokers
                .target
                .apply_url(&url)
                .context("Invalid ADV_RELAY_TARGET_BROKER")?;
        }

        if let Some(value) = var("ADV_RELAY_SKIP_UNKNOWN") {
            self.skip_unknown = parse_bool(&value).context("Invalid ADV_RELAY_SKIP_UNKNOWN")?;
        }

        Ok(())
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        for (name, broker) in [
            ("source", &self.brokers.source),
            ("target", &self.brokers.target),
        ] {
            ensure!(!broker.host.is_empty(), "{name} broker host is empty");
            if let Some(client_id) = &broker.client_id {
                ensure!(
                    valid_client_id(client_id),
                    "{name} broker client_id '{client_id}' is empty or starts with a space"
                );
            }
        }

        let subscription = self.subscription()?;
        ensure!(
            subscription.qos <= 2,
            "subscription qos {} is not 0, 1 or 2",
            subscription.qos
        );
        self.inbound_pattern()?;
        self.outbound_template()?;

        if self.subscriptions.len() > 1 {
            tracing::warn!(
                count = self.subscriptions.len(),
                "Only the first subscription is used"
            );
        }
        if self.routing.len() > 1 {
            tracing::warn!(
                count = self.routing.len(),
                "Only the first routing rule is used"
            );
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            ensure!(!device.device_id.is_empty(), "device with empty identifier");
            ensure!(
                seen.insert(device.device_id.as_str()),
                "duplicate device '{}'",
                device.device_id
            );
            if let Some(client_id) = &device.client_id {
                ensure!(
                    valid_client_id(client_id),
                    "device '{}' client_id is empty or starts with a space",
                    device.device_id
                );
            }
        }

        Ok(())
    }

    /// The active inbound subscription.
    ///
    /// # Errors
    ///
    /// Returns error if no subscription is configured.
    pub fn subscription(&self) -> Result<&SubscriptionConfig> {
        self.subscriptions
            .first()
            .context("at least one subscription is required")
    }

    /// Inbound topic pattern derived from the active subscription.
    ///
    /// # Errors
    ///
    /// Returns error if no subscription is configured or its filter cannot
    /// carry a device identifier.
    pub fn inbound_pattern(&self) -> Result<TopicPattern> {
        let subscription = self.subscription()?;
        TopicPattern::from_filter(&subscription.topic).context("Invalid subscription topic")
    }

    /// Outbound topic template from the active routing rule.
    ///
    /// # Errors
    ///
    /// Returns error if no routing rule is configured or its template is invalid.
    pub fn outbound_template(&self) -> Result<TopicTemplate> {
        let rule = self
            .routing
            .first()
            .context("at least one routing rule is required")?;
        TopicTemplate::parse(&rule.to).context("Invalid routing template")
    }
}

/// MQTT client identifiers must be non-empty and must not start with a space.
#[must_use]
pub fn valid_client_id(client_id: &str) -> bool {
    !client_id.is_empty() && !client_id.starts_with(' ')
}

fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool(value.to_string())),
    }
}

/// Host, port and transport security parsed from a broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// TLS requested by the scheme
    pub tls: bool,
}

/// Parse a broker URL: `tcp://`, `mqtt://`, `ssl://`, `mqtts://` or bare `host[:port]`.
///
/// # Errors
///
/// Returns error if the scheme is unsupported or host/port are malformed.
pub fn parse_broker_url(input: &str) -> Result<BrokerEndpoint, ConfigError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| ConfigError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        let tls = match url.scheme() {
            "tcp" | "mqtt" => false,
            "ssl" | "mqtts" => true,
            scheme => {
                return Err(ConfigError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url
            .port()
            .unwrap_or(if tls { 8883 } else { DEFAULT_MQTT_PORT });

        return Ok(BrokerEndpoint {
            host: host.to_string(),
            port,
            tls,
        });
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => DEFAULT_MQTT_PORT,
        Some(port) => port.parse().map_err(|_| {
            ConfigError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'"))
        })?,
    };
    if parts.next().is_some() {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls: false,
    })
}

/// Errors in configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Broker URL cannot be parsed
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// Boolean flag cannot be parsed
    #[error("invalid boolean '{0}'")]
    InvalidBool(String),
}
