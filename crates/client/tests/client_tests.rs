//! Client session tests
//!
//! Drive `LiveClient` against a scripted server behind a `MemoryLink`, and
//! `MockClient` end to end, including recording and replay.
//!
//! Run with: `cargo test -p client --test client_tests`

use client::{Client, Error, InMemoryRecorder, LiveClient, MockClient, SessionState};
use common::ClientInfo;
use common::test_utils::{
    create_mock_result, create_mock_server_info, create_mock_setup_response,
    create_session_config,
};
use bytes::BytesMut;
use link::{BufferedLink, Link, LinkError, MemoryLink, RawTransport};
use protocol::{
    LogLevel, LogMessage, Message, Prf, ProtocolError, ProtocolVariant, SensorId, ServerInfo,
    SessionConfig, encode_message,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

/// Number of results the scripted server emits after starting
const STREAMED_FRAMES: u32 = 5;

/// Canned reply of the scripted server to `command`
fn scripted_reply(command: &[u8], server_info: &ServerInfo, config: &SessionConfig) -> Vec<u8> {
    match command_name(command).as_str() {
        "get_system_info" => encode_message(&Message::SystemInfo(server_info.system.clone())),
        "get_sensor_info" => encode_message(&Message::SensorInfo(server_info.sensors.clone())),
        "setup" => encode_message(&Message::SetupResponse(create_mock_setup_response(config))),
        "start_streaming" => {
            let mut reply = encode_message(&Message::StartStreaming);
            for i in 0..STREAMED_FRAMES {
                reply.extend(encode_message(&create_mock_result(config, 1_000 + i * 10_000)));
            }
            reply
        }
        "stop_streaming" => encode_message(&Message::StopStreaming),
        "set_uart_baudrate" => encode_message(&Message::BaudrateChanged),
        other => panic!("unexpected command {}", other),
    }
}

fn command_name(command: &[u8]) -> String {
    let value: Value = serde_json::from_slice(command.trim_ascii_end()).unwrap();
    value["cmd"].as_str().unwrap_or_default().to_string()
}

/// Scripted server answering each command with canned frames
///
/// `overrides` replaces the reply for a command name.
fn scripted_server(
    server_info: ServerInfo,
    config: SessionConfig,
    overrides: HashMap<&'static str, Vec<u8>>,
) -> MemoryLink {
    MemoryLink::with_responder(move |command| {
        if let Some(reply) = overrides.get(command_name(command).as_str()) {
            return reply.clone();
        }
        scripted_reply(command, &server_info, &config)
    })
}

/// Scripted server whose replies become readable only after `delay`
struct SlowServer {
    open: bool,
    delay: Duration,
    server_info: ServerInfo,
    config: SessionConfig,
    pending: VecDeque<(Instant, Vec<u8>)>,
}

impl SlowServer {
    fn new(delay: Duration, server_info: ServerInfo, config: SessionConfig) -> Self {
        Self {
            open: false,
            delay,
            server_info,
            config,
            pending: VecDeque::new(),
        }
    }
}

impl RawTransport for SlowServer {
    fn open(&mut self, _timeout: Duration) -> link::Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> link::Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write_all(&mut self, data: &[u8]) -> link::Result<()> {
        let reply = scripted_reply(data, &self.server_info, &self.config);
        self.pending.push_back((Instant::now() + self.delay, reply));
        Ok(())
    }

    fn read_into(&mut self, buffer: &mut BytesMut, wait: Duration) -> link::Result<usize> {
        let now = Instant::now();
        match self.pending.front() {
            Some((ready_at, _)) if *ready_at <= now => {
                let (_, reply) = self.pending.pop_front().unwrap();
                buffer.extend_from_slice(&reply);
                Ok(reply.len())
            }
            Some((ready_at, _)) => {
                thread::sleep(wait.min(*ready_at - now));
                Ok(0)
            }
            None => {
                thread::sleep(wait);
                Ok(0)
            }
        }
    }

    fn set_timeout(&mut self, _timeout: Duration) -> link::Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "slow test server".to_string()
    }
}

fn commands_sent(link: &MemoryLink, name: &str) -> usize {
    link.sent()
        .iter()
        .filter(|c| {
            serde_json::from_slice::<Value>(c.trim_ascii_end()).unwrap()["cmd"] == name
        })
        .count()
}

fn live_client(link: &MemoryLink) -> LiveClient {
    LiveClient::with_link(Box::new(link.clone()), ClientInfo::socket("127.0.0.1", None)).unwrap()
}

#[test]
fn test_handshake_selects_protocol() {
    let config = create_session_config(1);
    let link = scripted_server(create_mock_server_info("a121-v1.0.0", 1), config, HashMap::new());
    let client = live_client(&link);

    assert_eq!(client.state(), SessionState::Connected);
    assert_eq!(client.protocol(), ProtocolVariant::No5_2MhzPrf);
    assert_eq!(client.server_info().connected_sensors(), vec![SensorId(1)]);
    assert_eq!(link.connect_calls(), 1);
}

#[test]
fn test_full_session_over_link() {
    let config = create_session_config(1);
    let link = scripted_server(create_mock_server_info("a121-v1.5.0", 1), config.clone(), HashMap::new());
    let mut client = live_client(&link);

    let metadata = client.setup_session(config, None).unwrap();
    assert_eq!(metadata[0][&SensorId(1)].frame_data_length, 16);
    assert_eq!(client.state(), SessionState::SessionSetup);

    client.start_session().unwrap();
    let first = client.get_next().unwrap();
    let second = client.get_next().unwrap();
    let (first, second) = (&first[0][&SensorId(1)], &second[0][&SensorId(1)]);
    assert_eq!(first.tick, 1_000);
    assert_eq!(second.tick, 11_000);
    assert!(second.tick_time > first.tick_time);

    // Frames still queued are skipped while stopping
    client.stop_session().unwrap();
    assert_eq!(client.state(), SessionState::SessionSetup);
    assert_eq!(link.pending(), 0);

    client.close().unwrap();
    assert_eq!(client.state(), SessionState::Unconnected);
    assert_eq!(link.disconnect_calls(), 1);

    // Closing twice is harmless
    client.close().unwrap();
    assert_eq!(link.disconnect_calls(), 1);
}

#[test]
fn test_double_start_sends_one_command() {
    let config = create_session_config(1);
    let link = scripted_server(create_mock_server_info("a121-v1.5.0", 1), config.clone(), HashMap::new());
    let mut client = live_client(&link);

    client.setup_session(config, None).unwrap();
    client.start_session().unwrap();

    let err = client.start_session().unwrap_err();
    assert!(matches!(err, Error::Client(_)));
    assert_eq!(commands_sent(&link, "start_streaming"), 1);
    assert_eq!(client.state(), SessionState::SessionStarted);
}

#[test]
fn test_operations_out_of_order() {
    let config = create_session_config(1);
    let link = scripted_server(create_mock_server_info("a121-v1.5.0", 1), config, HashMap::new());
    let mut client = live_client(&link);

    assert!(matches!(client.start_session(), Err(Error::Client(_))));
    assert!(matches!(client.get_next(), Err(Error::Client(_))));
    assert!(matches!(client.stop_session(), Err(Error::Client(_))));
    assert_eq!(link.sent().len(), 2);
}

#[test]
fn test_slow_replies_within_command_timeout() {
    let config = create_session_config(1);
    let server = SlowServer::new(
        Duration::from_millis(300),
        create_mock_server_info("a121-v1.2.0", 1),
        config.clone(),
    );
    let link = BufferedLink::with_timeout(server, Duration::from_millis(100));

    let mut client =
        LiveClient::with_link(Box::new(link), ClientInfo::socket("127.0.0.1", None)).unwrap();
    assert_eq!(client.state(), SessionState::Connected);

    client.setup_session(config, None).unwrap();
    assert_eq!(client.state(), SessionState::SessionSetup);
    client.close().unwrap();
}

#[test]
fn test_server_error_carries_log_line() {
    let config = create_session_config(1);
    let mut reply = encode_message(&Message::Log(LogMessage {
        level: LogLevel::Error,
        timestamp: 10,
        module: "sensor".to_string(),
        log: "start point out of range".to_string(),
    }));
    reply.extend(encode_message(&Message::Erroneous {
        message: "setup failed".to_string(),
    }));
    let link = scripted_server(
        create_mock_server_info("a121-v1.5.0", 1),
        config.clone(),
        HashMap::from([("setup", reply)]),
    );
    let mut client = live_client(&link);

    match client.setup_session(config, None).unwrap_err() {
        Error::Server { message, log } => {
            assert_eq!(message, "setup failed");
            assert_eq!(log.as_deref(), Some("start point out of range"));
        }
        other => panic!("Expected Server error, got {:?}", other),
    }
    // The link is healthy, so the client stays usable
    assert_eq!(client.state(), SessionState::Connected);
}

#[test]
fn test_empty_result_is_runtime_error() {
    let config = create_session_config(1);
    let mut reply = encode_message(&Message::StartStreaming);
    reply.extend(encode_message(&Message::EmptyResult));
    let link = scripted_server(
        create_mock_server_info("a121-v1.5.0", 1),
        config.clone(),
        HashMap::from([("start_streaming", reply)]),
    );
    let mut client = live_client(&link);

    client.setup_session(config, None).unwrap();
    client.start_session().unwrap();
    assert!(matches!(client.get_next(), Err(Error::Runtime(_))));
}

#[test]
fn test_no_connected_sensors_fails_creation() {
    let link = scripted_server(
        create_mock_server_info("a121-v1.5.0", 0),
        create_session_config(1),
        HashMap::new(),
    );
    let err = LiveClient::with_link(Box::new(link.clone()), ClientInfo::socket("127.0.0.1", None))
        .unwrap_err();

    assert!(matches!(err, Error::ClientCreation(_)));
    assert_eq!(link.disconnect_calls(), 1);
}

#[test]
fn test_unsupported_feature_fails_before_sending() {
    let mut config = create_session_config(1);
    config.groups[0]
        .get_mut(&SensorId(1))
        .unwrap()
        .subsweeps[0]
        .prf = Prf::Prf5_2Mhz;
    let link = scripted_server(create_mock_server_info("a121-v0.5.0", 1), config.clone(), HashMap::new());
    let mut client = live_client(&link);

    let err = client.setup_session(config, None).unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::UnsupportedFeature { .. })
    ));
    assert_eq!(commands_sent(&link, "setup"), 0);
}

#[test]
fn test_baudrate_negotiated_on_serial_links() {
    let config = create_session_config(1);
    let link = scripted_server(create_mock_server_info("a121-v1.5.0", 1), config, HashMap::new())
        .with_baudrate(115_200);

    let mut info = ClientInfo::serial("/dev/ttyUSB0");
    info.serial.as_mut().unwrap().override_baudrate = Some(3_000_000);
    let _client = LiveClient::with_link(Box::new(link.clone()), info).unwrap();

    // Clamped to the advertised maximum
    let sent = link.sent();
    let command: Value = serde_json::from_slice(sent[2].trim_ascii_end()).unwrap();
    assert_eq!(command["cmd"], "set_uart_baudrate");
    assert_eq!(command["baudrate"], 2_000_000);
    assert_eq!(link.baudrate(), Some(2_000_000));
}

#[test]
fn test_no_baudrate_change_on_socket_links() {
    let config = create_session_config(1);
    let link = scripted_server(create_mock_server_info("a121-v1.5.0", 1), config, HashMap::new());
    let _client = live_client(&link);
    assert_eq!(commands_sent(&link, "set_uart_baudrate"), 0);
}

#[test]
fn test_link_failure_tears_down_and_ends_recording() {
    let config = create_session_config(1);
    let link = scripted_server(create_mock_server_info("a121-v1.5.0", 1), config.clone(), HashMap::new());
    let mut client = live_client(&link);
    let recorder = InMemoryRecorder::new();
    client.attach_recorder(Box::new(recorder.clone())).unwrap();

    client.setup_session(config, None).unwrap();
    client.start_session().unwrap();
    client.get_next().unwrap();

    link.set_broken(true);
    let err = client.get_next().unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::Io(_))));
    assert_eq!(client.state(), SessionState::Unconnected);

    let recording = recorder.recording();
    assert_eq!(recording.sessions.len(), 1);
    assert!(recording.sessions[0].complete);
    assert_eq!(recording.result_count(), 1);

    // Nothing left to stop
    assert!(client.close().is_ok());
    assert_eq!(commands_sent(&link, "stop_streaming"), 0);
}

#[test]
fn test_mock_end_to_end() {
    let mut client = MockClient::new();
    client.setup_session(create_session_config(1), None).unwrap();
    client.start_session().unwrap();

    let mut last_tick = None;
    for _ in 0..3 {
        let result = client.get_next().unwrap();
        let ids: Vec<SensorId> = result[0].keys().copied().collect();
        assert_eq!(ids, vec![SensorId(1)]);

        let tick = result[0][&SensorId(1)].tick;
        if let Some(last) = last_tick {
            assert!(tick > last, "tick {} not after {}", tick, last);
        }
        last_tick = Some(tick);
    }

    client.stop_session().unwrap();
    client.close().unwrap();
    assert!(!client.is_connected());
}

#[test]
fn test_record_and_replay() {
    let config = create_session_config(2);
    let recorder = InMemoryRecorder::new();

    let mut client = MockClient::with_seed(11);
    client.attach_recorder(Box::new(recorder.clone())).unwrap();
    client.setup_session(config.clone(), None).unwrap();
    client.start_session().unwrap();
    let live: Vec<_> = (0..3).map(|_| client.get_next().unwrap()).collect();
    client.stop_session().unwrap();

    let recording = recorder.recording();
    assert_eq!(recording.result_count(), 3);
    assert!(!recording.sessions[0].calibrations_provided[&SensorId(2)]);

    let mut replay = MockClient::replay(&recording, 0).unwrap();
    assert!(replay.client_info().is_mock());

    let mut other = config.clone();
    other.update_rate = Some(50.0);
    assert!(matches!(
        replay.setup_session(other, None),
        Err(Error::Client(_))
    ));

    replay.setup_session(config, None).unwrap();
    replay.start_session().unwrap();
    let replayed: Vec<_> = (0..3).map(|_| replay.get_next().unwrap()).collect();
    assert_eq!(replayed, live);
    assert!(matches!(replay.get_next(), Err(Error::MessageStream(_))));
}

#[test]
fn test_replay_of_missing_session() {
    let recording = client::Recording::default();
    assert!(matches!(
        MockClient::replay(&recording, 0),
        Err(Error::ClientCreation(_))
    ));
}
