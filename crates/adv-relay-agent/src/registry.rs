//! Per-device publisher connections.

use crate::config::BrokerConfig;
use crate::directory::{default_client_id, DeviceCredentials};
use crate::transport::{ConnectError, ConnectParams, Connector, PublisherHandle};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Lazily created publisher handles, at most one per device.
///
/// Handles live until [`PublisherRegistry::shutdown`].
pub struct PublisherRegistry<C: Connector> {
    connector: C,
    target: BrokerConfig,
    handles: HashMap<String, C::Handle>,
}

impl<C: Connector> PublisherRegistry<C> {
    /// Create an empty registry connecting to `target`.
    pub fn new(connector: C, target: BrokerConfig) -> Self {
        Self {
            connector,
            target,
            handles: HashMap::new(),
        }
    }

    /// Return the device's publisher, connecting on first use.
    ///
    /// An existing handle is returned as is; `credentials` are only read
    /// when a new connection is made. `None` connects anonymously.
    ///
    /// # Errors
    ///
    /// Returns error if a new connection cannot be started. Nothing is
    /// cached in that case, so the next call tries again.
    pub fn get_or_create(
        &mut self,
        device_id: &str,
        credentials: Option<&DeviceCredentials>,
    ) -> Result<&C::Handle, ConnectError> {
        match self.handles.entry(device_id.to_string()) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let params = connect_params(&self.target, device_id, credentials);
                let handle = self.connector.connect(&params)?;

                tracing::info!(
                    device_id,
                    client_id = %params.client_id,
                    username = ?params.username,
                    host = %params.host,
                    port = params.port,
                    "Publisher ready"
                );

                Ok(&*entry.insert(handle))
            }
        }
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Close every handle.
    pub async fn shutdown(&mut self) {
        tracing::info!(publishers = self.len(), "Closing publishers");

        for (device_id, handle) in self.handles.drain() {
            tracing::debug!(device_id, "Closing publisher");
            handle.close().await;
        }
    }
}

fn connect_params(
    target: &BrokerConfig,
    device_id: &str,
    credentials: Option<&DeviceCredentials>,
) -> ConnectParams {
    match credentials {
        Some(device) => ConnectParams::new(target, device.client_id()).with_login(
            device.username.as_deref(),
            device.password.as_deref(),
        ),
        None => ConnectParams::new(target, default_client_id(device_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnector;

    fn registry() -> (PublisherRegistry<MockConnector>, MockConnector) {
        let connector = MockConnector::default();
        let registry = PublisherRegistry::new(connector.clone(), BrokerConfig::new("target"));
        (registry, connector)
    }

    #[test]
    fn connects_once_per_device() {
        let (mut registry, connector) = registry();
        let device = DeviceCredentials::new("DEV1").with_login("user", "pw");

        registry.get_or_create("DEV1", Some(&device)).unwrap();
        registry.get_or_create("DEV1", Some(&device)).unwrap();
        registry.get_or_create("DEV1", None).unwrap();

        assert_eq!(registry.len(), 1);
        let state = connector.state();
        assert_eq!(state.connects.len(), 1);
        assert_eq!(state.connects[0].client_id, "pub-DEV1");
        assert_eq!(state.connects[0].username.as_deref(), Some("user"));
        assert_eq!(state.connects[0].password.as_deref(), Some("pw"));
        assert_eq!(state.connects[0].host, "target");
    }

    #[test]
    fn separate_connections_per_device() {
        let (mut registry, connector) = registry();
        let mut custom = DeviceCredentials::new("DEV2");
        custom.client_id = Some("tracker-2".to_string());

        registry.get_or_create("DEV1", None).unwrap();
        registry.get_or_create("DEV2", Some(&custom)).unwrap();

        assert_eq!(registry.len(), 2);
        let state = connector.state();
        let ids: Vec<_> = state.connects.iter().map(|p| p.client_id.as_str()).collect();
        assert_eq!(ids, ["pub-DEV1", "tracker-2"]);
        assert!(state.connects[0].username.is_none());
    }

    #[test]
    fn failed_connect_is_not_cached() {
        let (mut registry, connector) = registry();
        connector.state().refuse.insert("pub-DEV1".to_string());

        assert!(registry.get_or_create("DEV1", None).is_err());
        assert_eq!(registry.len(), 0);

        connector.state().refuse.clear();
        assert!(registry.get_or_create("DEV1", None).is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn shutdown_closes_every_handle() {
        let (mut registry, connector) = registry();
        registry.get_or_create("DEV1", None).unwrap();
        registry.get_or_create("DEV2", None).unwrap();

        tokio_test::block_on(registry.shutdown());

        assert_eq!(registry.len(), 0);
        let mut closed = connector.state().closed.clone();
        closed.sort();
        assert_eq!(closed, ["pub-DEV1", "pub-DEV2"]);
    }
}
