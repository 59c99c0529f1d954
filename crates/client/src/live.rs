//! Client driving a real sensor server over a link
//!
//! Construction connects the link, asks the server for its system and
//! sensor information, picks the protocol variant for the reported version
//! and, on raw serial links, negotiates a faster baudrate. After that the
//! client walks the session state machine on the caller's thread.

use crate::error::{Error, Result};
use crate::message_stream::MessageStream;
use crate::recorder::Recorder;
use crate::results::extract_results;
use crate::session::{Client, STOP_TIMEOUT_MARGIN, SessionData, SessionState, active_timeout};
use common::ClientInfo;
use link::{DEFAULT_BAUDRATE, DeviceDiscovery, Link, connect_link};
use protocol::{
    Calibrations, ExtendedMetadata, ExtendedResult, LogLevel, LogMessage, Message, MessageKind,
    ProtocolVariant, ServerInfo, SessionConfig, select_protocol,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Server module whose own log lines are never attached to server errors
pub const FRAMEWORK_MODULE: &str = "exploration_server";

/// Number of server log lines kept for error reports
pub const LOG_BUFFER_CAPACITY: usize = 100;

/// Lower bound for waiting on a command reply
pub const MIN_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a server reachable through a [`Link`]
pub struct LiveClient {
    stream: MessageStream,
    client_info: ClientInfo,
    server_info: ServerInfo,
    state: SessionState,
    session: SessionData,
    /// Recent server log lines, oldest first
    logs: VecDeque<LogMessage>,
    /// Set by the stream when the link fails
    crashing: Arc<AtomicBool>,
    /// Link timeout of the running session
    active_timeout: Duration,
}

impl LiveClient {
    /// Resolve, connect and handshake
    ///
    /// # Arguments
    /// * `info` - Connection descriptor; an empty one triggers auto-detection
    /// * `discovery` - Device enumeration used for auto-detection
    pub fn open(info: &ClientInfo, discovery: &dyn DeviceDiscovery) -> Result<Self> {
        let (link, resolved) = connect_link(info, discovery)?;
        Self::handshake(link, resolved)
    }

    /// Handshake over an already built link, connecting it first if needed
    pub fn with_link(mut link: Box<dyn Link>, info: ClientInfo) -> Result<Self> {
        if !link.is_connected() {
            link.connect()?;
        }
        Self::handshake(link, info)
    }

    fn handshake(link: Box<dyn Link>, client_info: ClientInfo) -> Result<Self> {
        let crashing = Arc::new(AtomicBool::new(false));
        let flag = crashing.clone();
        let mut stream =
            MessageStream::new(link, ProtocolVariant::Current).with_error_callback(move |e| {
                error!("Link failure: {}", e);
                flag.store(true, Ordering::SeqCst);
            });
        let mut logs = VecDeque::new();

        let server_info = match query_server(&mut stream, &mut logs, &client_info) {
            Ok(server_info) => server_info,
            Err(e) => {
                if let Err(close_err) = stream.link_mut().disconnect() {
                    warn!("Failed to disconnect after handshake error: {}", close_err);
                }
                return Err(e);
            }
        };

        let active_timeout = stream.link().default_timeout();
        Ok(Self {
            stream,
            client_info,
            server_info,
            state: SessionState::Connected,
            session: SessionData::default(),
            logs,
            crashing,
            active_timeout,
        })
    }

    pub fn protocol(&self) -> ProtocolVariant {
        self.stream.protocol()
    }

    /// Server log lines received since the last session stop
    pub fn server_logs(&self) -> impl Iterator<Item = &LogMessage> {
        self.logs.iter()
    }

    fn command_timeout(&self) -> Duration {
        self.stream.link().default_timeout().max(MIN_COMMAND_TIMEOUT)
    }

    fn request(
        &mut self,
        command: Vec<u8>,
        expected: MessageKind,
        timeout: Duration,
    ) -> Result<Message> {
        request(&mut self.stream, &mut self.logs, &command, expected, timeout)
    }

    /// Tear down after the link died underneath an operation
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() && self.crashing.load(Ordering::SeqCst) {
            self.teardown_after_crash();
        }
        result
    }

    fn teardown_after_crash(&mut self) {
        if self.state == SessionState::Unconnected {
            return;
        }
        warn!("Tearing down {} after link failure", self.stream.link().describe());
        if self.state == SessionState::SessionStarted {
            self.session.end_quietly();
        }
        if let Err(e) = self.stream.link_mut().disconnect() {
            warn!("Failed to disconnect crashed link: {}", e);
        }
        self.state = SessionState::Unconnected;
        self.session.clear();
        self.logs.clear();
    }

    fn require_connected(&self) -> Result<()> {
        if self.state == SessionState::Unconnected {
            return Err(Error::client("client is not connected"));
        }
        Ok(())
    }

    fn setup(
        &mut self,
        config: SessionConfig,
        calibrations: Option<Calibrations>,
    ) -> Result<ExtendedMetadata> {
        self.require_connected()?;
        if self.state == SessionState::SessionStarted {
            return Err(Error::client(
                "cannot set up a session while one is started",
            ));
        }

        config.validate()?;
        if let Some(missing) = config
            .sensor_ids()
            .into_iter()
            .find(|id| !self.server_info.is_connected(*id))
        {
            return Err(Error::client(format!("sensor {} is not connected", missing)));
        }

        let command = self
            .stream
            .protocol()
            .setup_command(&config, calibrations.as_ref())?;
        let timeout = self.command_timeout();
        let response = match self.request(command, MessageKind::SetupResponse, timeout)? {
            Message::SetupResponse(response) => response,
            other => return Err(unexpected(&other)),
        };

        if response.metadata.len() != config.groups.len() {
            return Err(Error::Runtime(format!(
                "setup response has {} groups, session has {}",
                response.metadata.len(),
                config.groups.len()
            )));
        }

        debug!(
            "Session set up for sensors {:?}",
            config.sensor_ids().iter().map(|id| id.0).collect::<Vec<_>>()
        );
        let metadata = response.metadata.clone();
        self.session
            .setup(config, calibrations, response.metadata, response.calibrations);
        self.state = SessionState::SessionSetup;
        Ok(metadata)
    }

    fn start(&mut self) -> Result<()> {
        self.require_connected()?;
        match self.state {
            SessionState::SessionStarted => {
                return Err(Error::client("session is already started"));
            }
            SessionState::Connected => return Err(Error::client("session is not set up")),
            _ => {}
        }

        let timeout = active_timeout(
            self.stream.link().default_timeout(),
            self.session.frame_period(),
        );
        self.stream.link_mut().set_timeout(timeout)?;
        self.active_timeout = timeout;

        let command = self.stream.protocol().start_streaming_command();
        let reply_timeout = self.command_timeout().max(timeout);
        self.request(command, MessageKind::StartStreaming, reply_timeout)?;
        self.state = SessionState::SessionStarted;
        info!("Session started (read timeout {:?})", timeout);

        self.session.begin()
    }

    fn next(&mut self) -> Result<ExtendedResult> {
        self.require_connected()?;
        if self.state != SessionState::SessionStarted {
            return Err(Error::client("session is not started"));
        }

        let logs = &mut self.logs;
        let message = match self
            .stream
            .wait_for_message(MessageKind::Result, None, |m| route_side_message(logs, m))?
        {
            Message::Result(result) => result,
            other => return Err(unexpected(&other)),
        };

        let tps = self.server_info.ticks_per_second();
        let metadata = self
            .session
            .metadata()
            .ok_or_else(|| Error::client("session has no metadata"))?;
        let mut results = extract_results(&message, metadata, tps)?;
        self.session.deliver(&mut results, tps)?;
        Ok(results)
    }

    fn stop(&mut self) -> Result<()> {
        self.require_connected()?;
        if self.state != SessionState::SessionStarted {
            return Err(Error::client("session is not started"));
        }

        let timeout = self.active_timeout + STOP_TIMEOUT_MARGIN;
        self.stream.link_mut().set_timeout(timeout)?;

        let command = self.stream.protocol().stop_streaming_command();
        self.stream.send(&command)?;
        let logs = &mut self.logs;
        self.stream
            .wait_for_message(MessageKind::StopStreaming, Some(timeout), |m| match m {
                // Frames already in flight when the command went out
                Message::Result(_) => Ok(()),
                other => route_side_message(logs, other),
            })?;

        let default = self.stream.link().default_timeout();
        self.stream.link_mut().set_timeout(default)?;
        self.active_timeout = default;
        self.state = SessionState::SessionSetup;
        self.logs.clear();
        info!("Session stopped");

        self.session.end()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.state == SessionState::Unconnected {
            return Ok(());
        }

        let mut outcome = Ok(());
        if self.state == SessionState::SessionStarted {
            if self.crashing.load(Ordering::SeqCst) {
                self.session.end_quietly();
            } else if let Err(e) = self.stop() {
                warn!("Failed to stop session while closing: {}", e);
                self.session.end_quietly();
                outcome = Err(e);
            }
        }

        if let Err(e) = self.stream.link_mut().disconnect() {
            warn!("Failed to disconnect {}: {}", self.stream.link().describe(), e);
            if outcome.is_ok() {
                outcome = Err(e.into());
            }
        }

        self.state = SessionState::Unconnected;
        self.session.clear();
        self.logs.clear();
        info!("Closed {}", self.stream.link().describe());
        outcome
    }
}

impl Client for LiveClient {
    fn client_info(&self) -> &ClientInfo {
        &self.client_info
    }

    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn setup_session(
        &mut self,
        config: SessionConfig,
        calibrations: Option<Calibrations>,
    ) -> Result<ExtendedMetadata> {
        let result = self.setup(config, calibrations);
        self.guard(result)
    }

    fn start_session(&mut self) -> Result<()> {
        let result = self.start();
        self.guard(result)
    }

    fn get_next(&mut self) -> Result<ExtendedResult> {
        let result = self.next();
        self.guard(result)
    }

    fn stop_session(&mut self) -> Result<()> {
        let result = self.stop();
        self.guard(result)
    }

    fn close(&mut self) -> Result<()> {
        self.shutdown()
    }

    fn session(&self) -> &SessionData {
        &self.session
    }

    fn attach_recorder(&mut self, recorder: Box<dyn Recorder>) -> Result<()> {
        self.session
            .attach(recorder, &self.client_info, &self.server_info, self.state)
    }

    fn detach_recorder(&mut self) -> Result<Option<Box<dyn Recorder>>> {
        self.session.detach(self.state)
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error while dropping client: {}", e);
        }
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("stream", &self.stream)
            .field("state", &self.state)
            .field("rss_version", &self.server_info.system.rss_version)
            .finish()
    }
}

/// Send `command` and wait for the reply of kind `expected`
///
/// The link read timeout is raised to `timeout` while waiting so a slow
/// reply is not mistaken for a dead link, then put back.
fn request(
    stream: &mut MessageStream,
    logs: &mut VecDeque<LogMessage>,
    command: &[u8],
    expected: MessageKind,
    timeout: Duration,
) -> Result<Message> {
    let previous = stream.link().timeout();
    let raised = timeout > previous;
    if raised {
        stream.link_mut().set_timeout(timeout)?;
    }

    let reply = stream.send(command).and_then(|()| {
        stream.wait_for_message(expected, Some(timeout), |m| route_side_message(logs, m))
    });

    if raised && let Err(e) = stream.link_mut().set_timeout(previous) {
        warn!("Failed to restore link timeout {:?}: {}", previous, e);
        reply?;
        return Err(e.into());
    }
    reply
}

fn query_server(
    stream: &mut MessageStream,
    logs: &mut VecDeque<LogMessage>,
    client_info: &ClientInfo,
) -> Result<ServerInfo> {
    let timeout = stream.link().default_timeout().max(MIN_COMMAND_TIMEOUT);

    let command = stream.protocol().system_info_command();
    let system = match request(stream, logs, &command, MessageKind::SystemInfo, timeout)? {
        Message::SystemInfo(system) => system,
        other => return Err(unexpected(&other)),
    };

    let command = stream.protocol().sensor_info_command();
    let sensors = match request(stream, logs, &command, MessageKind::SensorInfo, timeout)? {
        Message::SensorInfo(sensors) => sensors,
        other => return Err(unexpected(&other)),
    };

    let server_info = ServerInfo { system, sensors };
    if server_info.connected_sensors().is_empty() {
        return Err(Error::ClientCreation(format!(
            "server {} reports no connected sensors",
            server_info.system.rss_version
        )));
    }

    let protocol = select_protocol(server_info.version()?)?;
    stream.set_protocol(protocol);
    info!(
        "Connected to {} ({} sensor(s), {:?} protocol)",
        server_info.system.rss_version,
        server_info.connected_sensors().len(),
        protocol
    );

    negotiate_baudrate(stream, logs, client_info, &server_info, timeout)?;
    Ok(server_info)
}

/// Switch a raw serial link to the requested or highest supported baudrate
fn negotiate_baudrate(
    stream: &mut MessageStream,
    logs: &mut VecDeque<LogMessage>,
    client_info: &ClientInfo,
    server_info: &ServerInfo,
    timeout: Duration,
) -> Result<()> {
    let Some(current) = stream.link().baudrate() else {
        return Ok(());
    };

    let max = server_info.system.max_baudrate;
    let requested = client_info
        .serial
        .as_ref()
        .and_then(|s| s.override_baudrate)
        .or(max);
    let Some(mut target) = requested else {
        return Ok(());
    };

    if let Some(max) = max
        && target > max
    {
        warn!(
            "Requested baudrate {} exceeds server maximum {}, using the maximum",
            target, max
        );
        target = max;
    }
    if target < DEFAULT_BAUDRATE {
        warn!(
            "Baudrate {} is below the {} floor, keeping {}",
            target, DEFAULT_BAUDRATE, current
        );
        return Ok(());
    }
    if target == current {
        return Ok(());
    }

    let command = stream.protocol().baudrate_command(target);
    request(stream, logs, &command, MessageKind::BaudrateChanged, timeout)?;
    stream.link_mut().set_baudrate(target)?;
    info!("Baudrate changed from {} to {}", current, target);
    Ok(())
}

/// Handle a message that arrived while waiting for something else
///
/// Log lines are re-emitted and buffered. An erroneous message becomes a
/// server error carrying the last relevant ERROR log line; an empty result
/// is a contract violation.
pub fn route_side_message(logs: &mut VecDeque<LogMessage>, message: Message) -> Result<()> {
    match message {
        Message::Log(log) => {
            emit_server_log(&log);
            if logs.len() >= LOG_BUFFER_CAPACITY {
                logs.pop_front();
            }
            logs.push_back(log);
            Ok(())
        }
        Message::Erroneous { message } => Err(Error::Server {
            message,
            log: last_error_log(logs),
        }),
        Message::EmptyResult => Err(Error::Runtime(
            "server sent a result without any sensor data".to_string(),
        )),
        other => {
            debug!("Ignoring unsolicited {}", other.kind());
            Ok(())
        }
    }
}

fn emit_server_log(log: &LogMessage) {
    let module = log.module.as_str();
    match log.level {
        LogLevel::Error => error!(server_module = module, "{}", log.log),
        LogLevel::Warning => warn!(server_module = module, "{}", log.log),
        LogLevel::Info => info!(server_module = module, "{}", log.log),
        LogLevel::Verbose | LogLevel::Debug => debug!(server_module = module, "{}", log.log),
    }
}

fn last_error_log(logs: &VecDeque<LogMessage>) -> Option<String> {
    logs.iter()
        .rev()
        .find(|l| l.level == LogLevel::Error && l.module != FRAMEWORK_MODULE)
        .map(|l| l.log.clone())
}

fn unexpected(message: &Message) -> Error {
    Error::Runtime(format!("unexpected {}", message.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(level: LogLevel, module: &str, text: &str) -> Message {
        Message::Log(LogMessage {
            level,
            timestamp: 0,
            module: module.to_string(),
            log: text.to_string(),
        })
    }

    #[test]
    fn test_server_error_skips_framework_lines() {
        let mut logs = VecDeque::new();
        route_side_message(&mut logs, log(LogLevel::Error, "sensor", "bad config")).unwrap();
        route_side_message(&mut logs, log(LogLevel::Error, FRAMEWORK_MODULE, "cmd failed"))
            .unwrap();
        route_side_message(&mut logs, log(LogLevel::Info, "sensor", "ok")).unwrap();

        let err = route_side_message(
            &mut logs,
            Message::Erroneous {
                message: "setup failed".to_string(),
            },
        )
        .unwrap_err();

        match err {
            Error::Server { message, log } => {
                assert_eq!(message, "setup failed");
                assert_eq!(log.as_deref(), Some("bad config"));
            }
            other => panic!("Expected Server error, got {:?}", other),
        }
    }

    #[test]
    fn test_log_buffer_is_bounded() {
        let mut logs = VecDeque::new();
        for i in 0..LOG_BUFFER_CAPACITY + 10 {
            route_side_message(&mut logs, log(LogLevel::Debug, "sensor", &i.to_string())).unwrap();
        }
        assert_eq!(logs.len(), LOG_BUFFER_CAPACITY);
        assert_eq!(logs.front().map(|l| l.log.as_str()), Some("10"));
    }

    #[test]
    fn test_empty_result_is_runtime_error() {
        let mut logs = VecDeque::new();
        assert!(matches!(
            route_side_message(&mut logs, Message::EmptyResult),
            Err(Error::Runtime(_))
        ));
        assert!(route_side_message(&mut logs, Message::StopStreaming).is_ok());
    }
}
