//! Device whitelist and credentials.

use serde::Deserialize;
use std::collections::HashMap;

/// Target broker credentials for one device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceCredentials {
    /// Device identifier (the IMEI for cellular trackers)
    #[serde(alias = "imei")]
    pub device_id: String,

    /// Username on the target broker
    #[serde(default)]
    pub username: Option<String>,

    /// Password on the target broker
    #[serde(default)]
    pub password: Option<String>,

    /// Client identifier on the target broker
    #[serde(default)]
    pub client_id: Option<String>,
}

impl DeviceCredentials {
    /// Credentials with only an identifier.
    #[cfg(test)]
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            username: None,
            password: None,
            client_id: None,
        }
    }

    /// Set username and password.
    #[cfg(test)]
    #[must_use]
    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Client identifier to connect with, falling back to [`default_client_id`].
    #[must_use]
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| default_client_id(&self.device_id))
    }
}

/// Publisher client identifier used when a device has none configured.
#[must_use]
pub fn default_client_id(device_id: &str) -> String {
    format!("pub-{device_id}")
}

/// Read-only lookup from device identifier to credentials.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    devices: HashMap<String, DeviceCredentials>,
}

impl DeviceDirectory {
    /// Build the directory. A repeated identifier replaces the earlier entry.
    pub fn new(devices: impl IntoIterator<Item = DeviceCredentials>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|device| (device.device_id.clone(), device))
                .collect(),
        }
    }

    /// Look up a device.
    #[must_use]
    pub fn lookup(&self, device_id: &str) -> Option<&DeviceCredentials> {
        self.devices.get(device_id)
    }

    /// Number of whitelisted devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the whitelist is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
