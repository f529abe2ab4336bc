//! Output record published to the target broker.

use crate::envelope::TelemetryRecord;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Status flag carried by every record.
pub const STATUS: u8 = 1;

/// Quality code carried by every record (good).
pub const QUALITY: u8 = 192;

/// Category code carried by every record.
pub const CATEGORY: u8 = 1;

/// Timestamp format: `2025-08-28T07:45:00Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Coordinates are transmitted in microdegrees.
const COORDINATE_DIVISOR: f64 = 1_000_000.0;

/// Temperature is transmitted in hundredths of a degree (x 0.01, two decimals).
const TEMPERATURE_DIVISOR: f64 = 100.0;

/// Voltages are transmitted in tenths of a volt (x 0.1, one decimal).
const VOLTAGE_DIVISOR: f64 = 10.0;

/// One scaled telemetry sample, serialized as the outbound JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Status flag
    #[serde(rename = "s")]
    pub status: u8,
    /// ISO-8601 UTC timestamp
    #[serde(rename = "t")]
    pub timestamp: String,
    /// Quality code
    #[serde(rename = "q")]
    pub quality: u8,
    /// Category code
    #[serde(rename = "c")]
    pub category: u8,
    /// Latitude in degrees
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    /// Longitude in degrees
    #[serde(rename = "Longitude")]
    pub longitude: f64,
    /// Temperature in degrees
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    /// Tilt on the X axis
    #[serde(rename = "Tilt_X")]
    pub tilt_x: i8,
    /// Tilt on the Y axis
    #[serde(rename = "Tilt_Y")]
    pub tilt_y: i8,
    /// Tilt on the Z axis
    #[serde(rename = "Tilt_Z")]
    pub tilt_z: i8,
    /// Core voltage in volts
    #[serde(rename = "Core_V")]
    pub core_voltage: f64,
    /// Li-ion battery voltage in volts
    #[serde(rename = "Liion_V")]
    pub liion_voltage: f64,
}

impl OutputRecord {
    /// Serialize to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&TelemetryRecord> for OutputRecord {
    // Dividing an integer by a power of ten yields the closest f64 to the
    // decimal value, so no separate rounding step is needed.
    fn from(record: &TelemetryRecord) -> Self {
        Self {
            status: STATUS,
            timestamp: format_timestamp(record.timestamp),
            quality: QUALITY,
            category: CATEGORY,
            latitude: f64::from(record.latitude) / COORDINATE_DIVISOR,
            longitude: f64::from(record.longitude) / COORDINATE_DIVISOR,
            temperature: f64::from(record.temperature) / TEMPERATURE_DIVISOR,
            tilt_x: record.tilt_x,
            tilt_y: record.tilt_y,
            tilt_z: record.tilt_z,
            core_voltage: f64::from(record.core_voltage) / VOLTAGE_DIVISOR,
            liion_voltage: f64::from(record.liion_voltage) / VOLTAGE_DIVISOR,
        }
    }
}

/// Format epoch seconds as an ISO-8601 UTC timestamp.
#[must_use]
pub fn format_timestamp(seconds: u32) -> String {
    DateTime::from_timestamp(i64::from(seconds), 0)
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> TelemetryRecord {
        TelemetryRecord {
            timestamp: 1_756_367_100,
            latitude: 25_033_964,
            longitude: -121_564_468,
            temperature: -1_234,
            tilt_x: -3,
            tilt_y: 12,
            tilt_z: 88,
            core_voltage: 33,
            liion_voltage: 255,
        }
    }

    #[test]
    fn scaling() {
        let out = record().to_output();

        assert_eq!(out.timestamp, "2025-08-28T07:45:00Z");
        assert!((out.latitude - 25.033_964).abs() < f64::EPSILON);
        assert!((out.longitude + 121.564_468).abs() < 1e-9);
        assert!((out.temperature + 12.34).abs() < f64::EPSILON);
        assert!((out.core_voltage - 3.3).abs() < f64::EPSILON);
        assert!((out.liion_voltage - 25.5).abs() < f64::EPSILON);
        assert_eq!((out.tilt_x, out.tilt_y, out.tilt_z), (-3, 12, 88));
    }

    #[test]
    fn json_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&record().to_output().to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "s": 1,
                "t": "2025-08-28T07:45:00Z",
                "q": 192,
                "c": 1,
                "Latitude": 25.033964,
                "Longitude": -121.564468,
                "Temperature": -12.34,
                "Tilt_X": -3,
                "Tilt_Y": 12,
                "Tilt_Z": 88,
                "Core_V": 3.3,
                "Liion_V": 25.5
            })
        );
    }

    #[test]
    fn json_is_compact_and_ordered() {
        let text = record().to_output().to_json().unwrap();

        assert!(!text.contains(' '));
        assert!(text.starts_with(r#"{"s":1,"t":"2025-08-28T07:45:00Z","q":192,"c":1,"Latitude""#));
        assert!(text.ends_with(r#""Core_V":3.3,"Liion_V":25.5}"#));
    }

    #[test]
    fn epoch_zero() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
    }
}
