//! Protocol library for radarlink
//!
//! This crate defines the host side of the sensor server's command/response
//! protocol: the data types exchanged with the server, the session
//! configuration, the header codec, and the chain of version-specific
//! protocol variants.
//!
//! # Example
//!
//! ```
//! use protocol::{Message, ProtocolVariant, decode_header, encode_message, select_protocol_for};
//!
//! let variant = select_protocol_for("a121-v1.5.0").unwrap();
//! assert_eq!(variant, ProtocolVariant::Current);
//!
//! let frame = encode_message(&Message::StartStreaming);
//! let header = decode_header(&frame).unwrap();
//! let message = variant.parse_message(&header, Vec::new()).unwrap();
//! assert_eq!(message, Message::StartStreaming);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod messages;
pub mod types;
pub mod variant;
pub mod version;

pub use codec::{MAX_PAYLOAD_SIZE, decode_header, encode_frame, encode_message, payload_size};
pub use config::{
    IdleState, MAX_FRAME_PERIOD, MIN_RATE, Prf, Profile, SensorConfig, SessionConfig,
    SubsweepConfig,
};
pub use error::{ProtocolError, Result};
pub use messages::{
    Header, Message, MessageKind, PAYLOAD_SIZE_KEY, ResultMessage, SetupResponse, parse_message,
};
pub use types::{
    ExtendedMetadata, ExtendedResult, IqSample, LogLevel, LogMessage, Metadata, ResultInfo,
    SensorCalibration, SensorId, SensorInfo, SensorResult, ServerInfo, SystemInfo,
};
pub use variant::{Calibrations, END_SEQUENCE, ProtocolVariant};
pub use version::{
    OLDEST_UNSUPPORTED, PROTOCOL_TABLE, ServerVersion, select_protocol, select_protocol_for,
};
