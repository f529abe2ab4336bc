//! Binary telemetry envelope.
//!
//! Layout (little-endian, packed):
//!
//! ```text
//! offset  size  field
//! 0       1     marker        (0xA5)
//! 1       1     record_size   (19)
//! 2       1     record_count
//! 3       1     reserved
//! 4       19*n  records
//! ```
//!
//! Record layout:
//!
//! ```text
//! 0   u32  timestamp (seconds since epoch, UTC)
//! 4   i32  latitude  (microdegrees)
//! 8   i32  longitude (microdegrees)
//! 12  i16  temperature (centidegrees)
//! 14  i8   tilt_x
//! 15  i8   tilt_y
//! 16  i8   tilt_z
//! 17  u8   core voltage (decivolts)
//! 18  u8   li-ion voltage (decivolts)
//! ```

use crate::record::OutputRecord;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// First byte of every valid envelope.
pub const ENVELOPE_MARKER: u8 = 0xA5;

/// Envelope header length in bytes.
pub const HEADER_LEN: usize = 4;

/// Fixed size of one telemetry record in bytes.
pub const RECORD_SIZE: usize = 19;

/// Envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Marker byte, expected to be [`ENVELOPE_MARKER`]
    pub marker: u8,
    /// Declared record size, expected to be [`RECORD_SIZE`]
    pub record_size: u8,
    /// Number of records following the header
    pub record_count: u8,
    /// Reserved, ignored
    pub reserved: u8,
}

impl EnvelopeHeader {
    /// Parse the header from the start of a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] if the buffer is shorter than [`HEADER_LEN`].
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        match bytes {
            [marker, record_size, record_count, reserved, ..] => Ok(Self {
                marker: *marker,
                record_size: *record_size,
                record_count: *record_count,
                reserved: *reserved,
            }),
            _ => Err(DecodeError::Truncated { len: bytes.len() }),
        }
    }

    /// Minimum buffer length needed to hold every declared record.
    ///
    /// Always computed with the fixed [`RECORD_SIZE`] stride, never the
    /// declared `record_size`.
    #[must_use]
    pub fn required_len(&self) -> usize {
        HEADER_LEN + usize::from(self.record_count) * RECORD_SIZE
    }
}

/// One raw telemetry record as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetryRecord {
    /// Seconds since the Unix epoch (UTC)
    pub timestamp: u32,
    /// Latitude in microdegrees
    pub latitude: i32,
    /// Longitude in microdegrees
    pub longitude: i32,
    /// Temperature in hundredths of a degree
    pub temperature: i16,
    /// Tilt on the X axis
    pub tilt_x: i8,
    /// Tilt on the Y axis
    pub tilt_y: i8,
    /// Tilt on the Z axis
    pub tilt_z: i8,
    /// Core voltage in tenths of a volt
    pub core_voltage: u8,
    /// Li-ion battery voltage in tenths of a volt
    pub liion_voltage: u8,
}

impl TelemetryRecord {
    /// Read a record from its fixed-size wire representation.
    #[must_use]
    pub fn from_bytes(b: &[u8; RECORD_SIZE]) -> Self {
        Self {
            timestamp: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            latitude: i32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            longitude: i32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            temperature: i16::from_le_bytes([b[12], b[13]]),
            tilt_x: i8::from_le_bytes([b[14]]),
            tilt_y: i8::from_le_bytes([b[15]]),
            tilt_z: i8::from_le_bytes([b[16]]),
            core_voltage: b[17],
            liion_voltage: b[18],
        }
    }

    /// Write the record in its wire representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[4..8].copy_from_slice(&self.latitude.to_le_bytes());
        buf[8..12].copy_from_slice(&self.longitude.to_le_bytes());
        buf[12..14].copy_from_slice(&self.temperature.to_le_bytes());
        buf[14] = self.tilt_x.to_le_bytes()[0];
        buf[15] = self.tilt_y.to_le_bytes()[0];
        buf[16] = self.tilt_z.to_le_bytes()[0];
        buf[17] = self.core_voltage;
        buf[18] = self.liion_voltage;
        buf
    }

    /// Convert to the scaled output representation.
    #[must_use]
    pub fn to_output(&self) -> OutputRecord {
        OutputRecord::from(self)
    }
}

/// Decode a base64-encoded envelope.
///
/// ASCII whitespace anywhere in `text` is ignored, so line-wrapped payloads
/// decode. Any other character outside the standard alphabet is an error.
///
/// # Errors
///
/// Returns [`DecodeError::Encoding`] if the text is not valid base64, or any
/// error from [`decode_envelope`].
pub fn decode_base64(text: &str) -> Result<Vec<TelemetryRecord>, DecodeError> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| DecodeError::Encoding(e.to_string()))?;
    decode_envelope(&bytes)
}

/// Decode a raw envelope into its records, in wire order.
///
/// Either every declared record is returned or none is.
///
/// # Errors
///
/// Returns error if the header is truncated, the marker is wrong, or the
/// buffer is shorter than the declared record count requires.
pub fn decode_envelope(bytes: &[u8]) -> Result<Vec<TelemetryRecord>, DecodeError> {
    let header = EnvelopeHeader::parse(bytes)?;

    tracing::debug!(
        len = bytes.len(),
        marker = header.marker,
        record_size = header.record_size,
        record_count = header.record_count,
        reserved = header.reserved,
        "Parsed envelope header"
    );

    if header.marker != ENVELOPE_MARKER {
        return Err(DecodeError::BadMarker {
            found: header.marker,
        });
    }

    if usize::from(header.record_size) != RECORD_SIZE {
        tracing::warn!(
            declared = header.record_size,
            expected = RECORD_SIZE,
            "Envelope declares unexpected record size, parsing with fixed stride"
        );
    }

    let required = header.required_len();
    if bytes.len() < required {
        return Err(DecodeError::LengthMismatch {
            len: bytes.len(),
            required,
        });
    }

    Ok(bytes[HEADER_LEN..required]
        .chunks_exact(RECORD_SIZE)
        .filter_map(|chunk| <&[u8; RECORD_SIZE]>::try_from(chunk).ok())
        .map(TelemetryRecord::from_bytes)
        .collect())
}

/// Build a raw envelope from records.
///
/// # Errors
///
/// Returns [`EncodeError::TooManyRecords`] if more than 255 records are given.
pub fn encode_envelope(records: &[TelemetryRecord]) -> Result<Vec<u8>, EncodeError> {
    let count =
        u8::try_from(records.len()).map_err(|_| EncodeError::TooManyRecords(records.len()))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + records.len() * RECORD_SIZE);
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&[ENVELOPE_MARKER, RECORD_SIZE as u8, count, 0]);
    for record in records {
        buf.extend_from_slice(&record.to_bytes());
    }
    Ok(buf)
}

/// Errors that can occur decoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Payload is not valid base64
    #[error("base64 decode error: {0}")]
    Encoding(String),
    /// Buffer too short to hold the header
    #[error("envelope truncated: {len} bytes, header needs 4")]
    Truncated {
        /// Actual buffer length
        len: usize,
    },
    /// Header marker byte is wrong
    #[error("invalid envelope marker {found:#04x}, expected 0xa5")]
    BadMarker {
        /// Marker byte found in the header
        found: u8,
    },
    /// Buffer shorter than the declared record count requires
    #[error("length mismatch: {len} bytes, declared records need {required}")]
    LengthMismatch {
        /// Actual buffer length
        len: usize,
        /// Length required by the header
        required: usize,
    },
}

/// Errors that can occur encoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// Record count does not fit the one-byte header field
    #[error("too many records for one envelope: {0}")]
    TooManyRecords(usize),
}
