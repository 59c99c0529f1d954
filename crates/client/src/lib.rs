//! Sensor client library for radarlink
//!
//! A client owns a link to the sensor server, frames the byte stream into
//! messages and walks the session lifecycle:
//!
//! ```text
//! Unconnected -> Connected -> SessionSetup <-> SessionStarted
//! ```
//!
//! [`LiveClient`] talks to real hardware; [`MockClient`] synthesizes or
//! replays results without any transport. Both implement [`Client`].
//!
//! # Example
//!
//! ```
//! use client::{Client, MockClient};
//! use common::test_utils::create_session_config;
//!
//! let mut client = MockClient::new();
//! client.setup_session(create_session_config(1), None).unwrap();
//! client.start_session().unwrap();
//! let result = client.get_next().unwrap();
//! assert_eq!(result[0].len(), 1);
//! client.close().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod live;
pub mod message_stream;
pub mod mock;
pub mod recorder;
pub mod results;
pub mod session;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use factory::{
    ClientConstructor, Construction, DEFAULT_CONSTRUCTORS, open_client, open_default_client,
};
pub use live::LiveClient;
pub use message_stream::MessageStream;
pub use mock::MockClient;
pub use recorder::{InMemoryRecorder, RecordedSession, Recorder, Recording, SessionStart};
pub use results::extract_results;
pub use session::{Client, SessionData, SessionState, active_timeout};
