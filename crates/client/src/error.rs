//! Client error types

use link::LinkError;
use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed (timeout, I/O, permissions, auto-detection)
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// No client could be built for the connection descriptor
    #[error("Cannot create client: {0}")]
    ClientCreation(String),

    /// Invalid use of the client, such as starting a started session
    #[error("Client error: {0}")]
    Client(String),

    /// The server reported a failure
    #[error("Server error: {message}{}", log_suffix(.log))]
    Server {
        message: String,
        /// Most recent relevant server ERROR log line
        log: Option<String>,
    },

    #[error("Message stream error: {0}")]
    MessageStream(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server broke the protocol contract
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Recorder error: {0}")]
    Recorder(String),
}

fn log_suffix(log: &Option<String>) -> String {
    match log {
        Some(line) => format!(" (server log: {})", line),
        None => String::new(),
    }
}

impl Error {
    pub fn client(message: impl Into<String>) -> Self {
        Error::Client(message.into())
    }

    /// Whether the transport itself is gone
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Error::Link(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_includes_log() {
        let err = Error::Server {
            message: "setup failed".to_string(),
            log: Some("sensor 1: invalid start point".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Server error: setup failed (server log: sensor 1: invalid start point)"
        );

        let bare = Error::Server {
            message: "setup failed".to_string(),
            log: None,
        };
        assert_eq!(bare.to_string(), "Server error: setup failed");
    }

    #[test]
    fn test_link_errors_convert() {
        let err: Error = LinkError::NotConnected.into();
        assert!(err.is_link_failure());
        assert!(!Error::client("already started").is_link_failure());
    }
}
