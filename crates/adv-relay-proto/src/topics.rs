//! MQTT topic scheme for the relay.
//!
//! - Inbound topics match a subscription filter with exactly one `+`
//!   segment, which carries the device identifier (default `adv/+/data`).
//! - Outbound topics are rendered from a template with exactly one
//!   `{device}` placeholder.

use serde::{Deserialize, Serialize};

/// Default inbound subscription filter.
pub const DEFAULT_INBOUND_FILTER: &str = "adv/+/data";

/// Placeholder substituted with the device identifier in outbound templates.
pub const DEVICE_PLACEHOLDER: &str = "{device}";

/// Inbound topic pattern `<prefix>/<device_id>/<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPattern {
    /// Literal segments before the device segment
    pub prefix: Vec<String>,
    /// Literal segments after the device segment
    pub suffix: Vec<String>,
}

impl Default for TopicPattern {
    fn default() -> Self {
        Self {
            prefix: vec!["adv".to_string()],
            suffix: vec!["data".to_string()],
        }
    }
}

impl TopicPattern {
    /// Derive a pattern from an MQTT subscription filter.
    ///
    /// # Errors
    ///
    /// Returns error if the filter does not contain exactly one `+` segment,
    /// contains `#`, or has empty segments.
    pub fn from_filter(filter: &str) -> Result<Self, TopicError> {
        let invalid = |reason: &str| TopicError::InvalidFilter(format!("{filter}: {reason}"));

        let segments: Vec<&str> = filter.split('/').collect();
        if segments.iter().any(|s| s.contains('#')) {
            return Err(invalid("multi-level wildcard not supported"));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("empty segment"));
        }

        let mut wildcards = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.contains('+'));
        let Some((index, segment)) = wildcards.next() else {
            return Err(invalid("missing '+' device segment"));
        };
        if wildcards.next().is_some() {
            return Err(invalid("more than one '+' segment"));
        }
        if *segment != "+" {
            return Err(invalid("'+' must occupy a whole segment"));
        }

        Ok(Self {
            prefix: segments[..index].iter().map(ToString::to_string).collect(),
            suffix: segments[index + 1..]
                .iter()
                .map(ToString::to_string)
                .collect(),
        })
    }

    /// The subscription filter matching this pattern.
    #[must_use]
    pub fn filter(&self) -> String {
        let mut segments: Vec<&str> = self.prefix.iter().map(String::as_str).collect();
        segments.push("+");
        segments.extend(self.suffix.iter().map(String::as_str));
        segments.join("/")
    }

    /// Extract the device identifier from a concrete topic.
    ///
    /// Returns `None` if the topic does not match.
    #[must_use]
    pub fn device_id<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() != self.prefix.len() + 1 + self.suffix.len() {
            return None;
        }

        let (head, rest) = parts.split_at(self.prefix.len());
        let (device, tail) = rest.split_first()?;

        let literals_match = head.iter().zip(&self.prefix).all(|(a, b)| a == b)
            && tail.iter().zip(&self.suffix).all(|(a, b)| a == b);

        (literals_match && !device.is_empty()).then_some(*device)
    }
}

/// Outbound topic template with one `{device}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate {
    head: String,
    tail: String,
}

impl TopicTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Returns error unless the template contains exactly one placeholder.
    pub fn parse(template: &str) -> Result<Self, TopicError> {
        let count = template.matches(DEVICE_PLACEHOLDER).count();
        match template.split_once(DEVICE_PLACEHOLDER) {
            Some((head, tail)) if count == 1 => Ok(Self {
                head: head.to_string(),
                tail: tail.to_string(),
            }),
            _ => Err(TopicError::Placeholder {
                template: template.to_string(),
                count,
            }),
        }
    }

    /// Render the topic for a device.
    #[must_use]
    pub fn render(&self, device_id: &str) -> String {
        format!("{}{device_id}{}", self.head, self.tail)
    }
}

impl std::fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{DEVICE_PLACEHOLDER}{}", self.head, self.tail)
    }
}

/// Errors in topic configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// Subscription filter cannot yield a device identifier
    #[error("invalid inbound filter: {0}")]
    InvalidFilter(String),
    /// Template does not have exactly one placeholder
    #[error("topic template '{template}' must contain exactly one {{device}} placeholder, found {count}")]
    Placeholder {
        /// Offending template
        template: String,
        /// Number of placeholders found
        count: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pattern_extracts_device() {
        let pattern = TopicPattern::default();

        assert_eq!(pattern.device_id("adv/ABC123/data"), Some("ABC123"));
        assert_eq!(pattern.device_id("other/ABC123/data"), None);
        assert_eq!(pattern.device_id("adv/ABC123/status"), None);
        assert_eq!(pattern.device_id("adv//data"), None);
        assert_eq!(pattern.device_id("adv/a/b/data"), None);
        assert_eq!(pattern.filter(), DEFAULT_INBOUND_FILTER);
    }

    #[test]
    fn pattern_from_filter() {
        let pattern = TopicPattern::from_filter("fleet/eu/+/up/data").unwrap();

        assert_eq!(pattern.device_id("fleet/eu/T-9/up/data"), Some("T-9"));
        assert_eq!(pattern.device_id("fleet/us/T-9/up/data"), None);
        assert_eq!(pattern.filter(), "fleet/eu/+/up/data");
        assert_eq!(
            TopicPattern::from_filter(DEFAULT_INBOUND_FILTER).unwrap(),
            TopicPattern::default()
        );
    }

    #[test]
    fn rejects_unusable_filters() {
        for filter in ["adv/#", "adv/data", "+/+/data", "adv/x+/data", "adv//+"] {
            assert!(
                TopicPattern::from_filter(filter).is_err(),
                "filter '{filter}' should be rejected"
            );
        }
    }

    #[test]
    fn template_render() {
        let template = TopicTemplate::parse("telemetry/{device}/records").unwrap();

        assert_eq!(template.render("DEV1"), "telemetry/DEV1/records");
        assert_eq!(template.to_string(), "telemetry/{device}/records");
    }

    #[test]
    fn template_placeholder_count() {
        assert_eq!(
            TopicTemplate::parse("telemetry/records"),
            Err(TopicError::Placeholder {
                template: "telemetry/records".to_string(),
                count: 0
            })
        );
        assert!(TopicTemplate::parse("{device}/{device}").is_err());
        assert_eq!(TopicTemplate::parse("{device}").unwrap().render("x"), "x");
    }
}
