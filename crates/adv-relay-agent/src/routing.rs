//! Topic routing and whitelist policy.

use crate::directory::{DeviceCredentials, DeviceDirectory};
use adv_relay_proto::{TopicPattern, TopicTemplate};

/// What to do with a message from a given device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision<'a> {
    /// Whitelisted device, publish with its credentials
    Known(&'a DeviceCredentials),
    /// Unknown device, publish anonymously
    AllowAnonymous,
    /// Unknown device, drop the message
    Skip,
}

/// Maps inbound topics to devices and outbound topics.
#[derive(Debug, Clone)]
pub struct Router {
    pattern: TopicPattern,
    template: TopicTemplate,
    skip_unknown: bool,
}

impl Router {
    /// Create a router.
    #[must_use]
    pub fn new(pattern: TopicPattern, template: TopicTemplate, skip_unknown: bool) -> Self {
        Self {
            pattern,
            template,
            skip_unknown,
        }
    }

    /// Device identifier carried by an inbound topic, `None` if the topic
    /// does not match.
    #[must_use]
    pub fn device_id<'t>(&self, topic: &'t str) -> Option<&'t str> {
        self.pattern.device_id(topic)
    }

    /// Apply the whitelist policy.
    #[must_use]
    pub fn decide<'d>(&self, device_id: &str, directory: &'d DeviceDirectory) -> RouteDecision<'d> {
        match directory.lookup(device_id) {
            Some(credentials) => RouteDecision::Known(credentials),
            None if self.skip_unknown => RouteDecision::Skip,
            None => RouteDecision::AllowAnonymous,
        }
    }

    /// Outbound topic for a device.
    #[must_use]
    pub fn outbound_topic(&self, device_id: &str) -> String {
        self.template.render(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(skip_unknown: bool) -> Router {
        Router::new(
            TopicPattern::default(),
            TopicTemplate::parse("telemetry/{device}/records").unwrap(),
            skip_unknown,
        )
    }

    #[test]
    fn extracts_device_from_topic() {
        let router = router(true);

        assert_eq!(router.device_id("adv/ABC123/data"), Some("ABC123"));
        assert_eq!(router.device_id("other/ABC123/data"), None);
        assert_eq!(router.outbound_topic("ABC123"), "telemetry/ABC123/records");
    }

    #[test]
    fn whitelist_policy() {
        let directory = DeviceDirectory::new([DeviceCredentials::new("KNOWN")]);

        let strict = router(true);
        assert!(matches!(
            strict.decide("KNOWN", &directory),
            RouteDecision::Known(device) if device.device_id == "KNOWN"
        ));
        assert_eq!(strict.decide("STRANGER", &directory), RouteDecision::Skip);

        let lenient = router(false);
        assert!(matches!(
            lenient.decide("KNOWN", &directory),
            RouteDecision::Known(_)
        ));
        assert_eq!(
            lenient.decide("STRANGER", &directory),
            RouteDecision::AllowAnonymous
        );
    }
}
