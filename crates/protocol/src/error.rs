//! Protocol error types

use crate::version::ServerVersion;
use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Header bytes were not a valid JSON document
    #[error("Malformed header: {0}")]
    MalformedHeader(#[from] serde_json::Error),

    /// Header was valid JSON but not an object
    #[error("Header is not a JSON object")]
    HeaderNotObject,

    /// Header carried no key that maps to a known message
    #[error("Unknown message with keys: {keys}")]
    UnknownMessage { keys: String },

    /// A known message carried an unexpected body
    #[error("Invalid {kind} message: {reason}")]
    InvalidMessage { kind: &'static str, reason: String },

    /// Server version string could not be parsed
    #[error("Could not parse server version '{0}'")]
    InvalidVersion(String),

    /// Server is too old for any protocol variant
    #[error("Server version {version} is not supported (versions up to {newest_unsupported} are rejected)")]
    UnsupportedServer {
        version: ServerVersion,
        newest_unsupported: ServerVersion,
    },

    /// Configuration uses a feature the negotiated server does not support
    #[error("The connected server does not support {feature}, please update the server software")]
    UnsupportedFeature { feature: &'static str },

    /// Session configuration is structurally invalid
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    /// Payload length did not match what the header described
    #[error("Payload size mismatch: expected {expected} bytes, got {actual}")]
    PayloadSize { expected: usize, actual: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_server_display() {
        let err = ProtocolError::UnsupportedServer {
            version: ServerVersion::new(0, 1, 9),
            newest_unsupported: ServerVersion::new(0, 2, 0),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("0.1.9"));
        assert!(msg.contains("0.2.0"));
    }

    #[test]
    fn test_unsupported_feature_display() {
        let err = ProtocolError::UnsupportedFeature {
            feature: "calibration reuse",
        };
        assert!(format!("{}", err).contains("calibration reuse"));
    }
}
