//! # adv-relay Protocol
//!
//! Wire formats shared by the relay agent and the CLI.
//!
//! ## Envelope
//!
//! Field devices publish a base64 string in the `data` field of a JSON body.
//! The decoded bytes are a 4-byte header followed by fixed 19-byte
//! telemetry records, all little-endian. See [`envelope`].
//!
//! ## MQTT Topics
//!
//! - Inbound: `adv/{device_id}/data`
//! - Outbound: a configured template such as `telemetry/{device}/records`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod record;
pub mod topics;

pub use envelope::{
    decode_base64, decode_envelope, encode_envelope, DecodeError, EncodeError, EnvelopeHeader,
    TelemetryRecord, ENVELOPE_MARKER, HEADER_LEN, RECORD_SIZE,
};
pub use record::OutputRecord;
pub use topics::{TopicError, TopicPattern, TopicTemplate};
