//! Protocol message definitions
//!
//! Every inbound unit is a JSON header optionally followed by a binary
//! payload. The header's top-level key decides the message kind:
//!
//! | key                | message                         |
//! |--------------------|---------------------------------|
//! | `system_info`      | [`Message::SystemInfo`]         |
//! | `sensor_info`      | [`Message::SensorInfo`]         |
//! | `setup_response`   | [`Message::SetupResponse`]      |
//! | `result_info`      | [`Message::Result`] or [`Message::EmptyResult`] |
//! | `log`              | [`Message::Log`]                |
//! | `start_streaming`  | [`Message::StartStreaming`]     |
//! | `stop_streaming`   | [`Message::StopStreaming`]      |
//! | `set_uart_baudrate`| [`Message::BaudrateChanged`]    |
//! | `"status": "error"`| [`Message::Erroneous`]          |

use crate::error::{ProtocolError, Result};
use crate::types::{
    ExtendedMetadata, LogMessage, Metadata, ResultInfo, SensorCalibration, SensorId, SensorInfo,
    SystemInfo,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;

/// Decoded JSON header
pub type Header = Map<String, Value>;

/// Header field holding the length of the binary payload
pub const PAYLOAD_SIZE_KEY: &str = "payload_size";

/// Server reply to a setup command
#[derive(Debug, Clone, PartialEq)]
pub struct SetupResponse {
    pub metadata: ExtendedMetadata,
    pub calibrations: BTreeMap<SensorId, SensorCalibration>,
}

/// One frame of raw results
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    /// Per group, per sensor result headers
    pub info: Vec<Vec<ResultInfo>>,
    pub payload: Vec<u8>,
}

/// All inbound message kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SystemInfo(SystemInfo),
    SensorInfo(Vec<SensorInfo>),
    SetupResponse(SetupResponse),
    Result(ResultMessage),
    /// A result header listing no sensors; never valid from a healthy server
    EmptyResult,
    Log(LogMessage),
    StartStreaming,
    StopStreaming,
    BaudrateChanged,
    /// Server rejected the last command
    Erroneous { message: String },
}

/// Payload-free discriminant of [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    SystemInfo,
    SensorInfo,
    SetupResponse,
    Result,
    EmptyResult,
    Log,
    StartStreaming,
    StopStreaming,
    BaudrateChanged,
    Erroneous,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::SystemInfo => "system info response",
            MessageKind::SensorInfo => "sensor info response",
            MessageKind::SetupResponse => "setup response",
            MessageKind::Result => "result",
            MessageKind::EmptyResult => "empty result",
            MessageKind::Log => "log",
            MessageKind::StartStreaming => "start streaming response",
            MessageKind::StopStreaming => "stop streaming response",
            MessageKind::BaudrateChanged => "baudrate response",
            MessageKind::Erroneous => "error response",
        };
        f.write_str(name)
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::SystemInfo(_) => MessageKind::SystemInfo,
            Message::SensorInfo(_) => MessageKind::SensorInfo,
            Message::SetupResponse(_) => MessageKind::SetupResponse,
            Message::Result(_) => MessageKind::Result,
            Message::EmptyResult => MessageKind::EmptyResult,
            Message::Log(_) => MessageKind::Log,
            Message::StartStreaming => MessageKind::StartStreaming,
            Message::StopStreaming => MessageKind::StopStreaming,
            Message::BaudrateChanged => MessageKind::BaudrateChanged,
            Message::Erroneous { .. } => MessageKind::Erroneous,
        }
    }

    /// Build the header (and payload) the server would send for this message
    pub fn to_header(&self) -> (Header, Vec<u8>) {
        let (value, payload) = match self {
            Message::SystemInfo(info) => (json!({ "system_info": info }), Vec::new()),
            Message::SensorInfo(infos) => (json!({ "sensor_info": infos }), Vec::new()),
            Message::SetupResponse(response) => (
                json!({ "setup_response": SetupResponseWire::from(response) }),
                Vec::new(),
            ),
            Message::Result(result) => (
                json!({
                    "result_info": result.info,
                    PAYLOAD_SIZE_KEY: result.payload.len(),
                }),
                result.payload.clone(),
            ),
            Message::EmptyResult => (json!({ "result_info": [] }), Vec::new()),
            Message::Log(log) => (json!({ "log": log }), Vec::new()),
            Message::StartStreaming => (json!({ "start_streaming": { "status": "start" } }), Vec::new()),
            Message::StopStreaming => (json!({ "stop_streaming": { "status": "stop" } }), Vec::new()),
            Message::BaudrateChanged => (json!({ "set_uart_baudrate": { "status": "ok" } }), Vec::new()),
            Message::Erroneous { message } => {
                (json!({ "status": "error", "message": message }), Vec::new())
            }
        };

        match value {
            Value::Object(map) => (map, payload),
            _ => unreachable!("json! object literal"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SensorMetadataWire {
    sensor_id: SensorId,
    #[serde(flatten)]
    metadata: Metadata,
}

#[derive(Serialize, Deserialize)]
struct SensorCalibrationWire {
    sensor_id: SensorId,
    #[serde(flatten)]
    calibration: SensorCalibration,
}

#[derive(Serialize, Deserialize)]
struct SetupResponseWire {
    metadata: Vec<Vec<SensorMetadataWire>>,
    #[serde(default)]
    sensor_calibration_info: Vec<SensorCalibrationWire>,
}

impl From<&SetupResponse> for SetupResponseWire {
    fn from(response: &SetupResponse) -> Self {
        Self {
            metadata: response
                .metadata
                .iter()
                .map(|group| {
                    group
                        .iter()
                        .map(|(sensor_id, metadata)| SensorMetadataWire {
                            sensor_id: *sensor_id,
                            metadata: metadata.clone(),
                        })
                        .collect()
                })
                .collect(),
            sensor_calibration_info: response
                .calibrations
                .iter()
                .map(|(sensor_id, calibration)| SensorCalibrationWire {
                    sensor_id: *sensor_id,
                    calibration: calibration.clone(),
                })
                .collect(),
        }
    }
}

impl From<SetupResponseWire> for SetupResponse {
    fn from(wire: SetupResponseWire) -> Self {
        Self {
            metadata: wire
                .metadata
                .into_iter()
                .map(|group| {
                    group
                        .into_iter()
                        .map(|entry| (entry.sensor_id, entry.metadata))
                        .collect()
                })
                .collect(),
            calibrations: wire
                .sensor_calibration_info
                .into_iter()
                .map(|entry| (entry.sensor_id, entry.calibration))
                .collect(),
        }
    }
}

fn body<T: DeserializeOwned>(kind: MessageKind, value: &Value) -> Result<T> {
    T::deserialize(value).map_err(|e| ProtocolError::InvalidMessage {
        kind: kind_name(kind),
        reason: e.to_string(),
    })
}

fn kind_name(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::SystemInfo => "system_info",
        MessageKind::SensorInfo => "sensor_info",
        MessageKind::SetupResponse => "setup_response",
        MessageKind::Result | MessageKind::EmptyResult => "result_info",
        MessageKind::Log => "log",
        MessageKind::StartStreaming => "start_streaming",
        MessageKind::StopStreaming => "stop_streaming",
        MessageKind::BaudrateChanged => "set_uart_baudrate",
        MessageKind::Erroneous => "status",
    }
}

/// Classify a decoded header and its payload into a [`Message`]
pub fn parse_message(header: &Header, payload: Vec<u8>) -> Result<Message> {
    if header.get("status").and_then(Value::as_str) == Some("error") {
        let message = header
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unspecified server error")
            .to_string();
        return Ok(Message::Erroneous { message });
    }

    if let Some(value) = header.get("system_info") {
        return Ok(Message::SystemInfo(body(MessageKind::SystemInfo, value)?));
    }
    if let Some(value) = header.get("sensor_info") {
        return Ok(Message::SensorInfo(body(MessageKind::SensorInfo, value)?));
    }
    if let Some(value) = header.get("setup_response") {
        let wire: SetupResponseWire = body(MessageKind::SetupResponse, value)?;
        return Ok(Message::SetupResponse(wire.into()));
    }
    if let Some(value) = header.get("result_info") {
        let info: Vec<Vec<ResultInfo>> = body(MessageKind::Result, value)?;
        if info.iter().all(Vec::is_empty) {
            return Ok(Message::EmptyResult);
        }
        return Ok(Message::Result(ResultMessage { info, payload }));
    }
    if let Some(value) = header.get("log") {
        return Ok(Message::Log(body(MessageKind::Log, value)?));
    }
    if header.contains_key("start_streaming") {
        return Ok(Message::StartStreaming);
    }
    if header.contains_key("stop_streaming") {
        return Ok(Message::StopStreaming);
    }
    if header.contains_key("set_uart_baudrate") {
        return Ok(Message::BaudrateChanged);
    }

    Err(ProtocolError::UnknownMessage {
        keys: header.keys().cloned().collect::<Vec<_>>().join(", "),
    })
}
