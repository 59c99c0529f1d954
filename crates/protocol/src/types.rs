//! Sensor and session data types
//!
//! Server descriptions, per-sensor metadata and calibration, result headers
//! and the decoded per-sensor results handed to callers.

use crate::error::Result;
use crate::version::ServerVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sensor identifier as used by the server (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub u32);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// System information reported by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Radar system software build string, e.g. "a121-v1.5.0"
    pub rss_version: String,
    /// Sensor generation served, e.g. "a121"
    pub sensor: String,
    /// Hardware tick rate used for result timestamps
    pub ticks_per_second: u64,
    /// Module/board name
    #[serde(default)]
    pub hw: Option<String>,
    /// Highest UART baudrate the server can switch to
    #[serde(default)]
    pub max_baudrate: Option<u32>,
}

/// Per-sensor presence information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub connected: bool,
    #[serde(default)]
    pub serial: Option<String>,
}

/// Everything learned about the server while connecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub system: SystemInfo,
    /// Indexed by sensor id - 1
    pub sensors: Vec<SensorInfo>,
}

impl ServerInfo {
    /// Ids of all sensors the server reports as connected
    pub fn connected_sensors(&self) -> Vec<SensorId> {
        self.sensors
            .iter()
            .enumerate()
            .filter(|(_, info)| info.connected)
            .map(|(i, _)| SensorId(i as u32 + 1))
            .collect()
    }

    pub fn is_connected(&self, sensor_id: SensorId) -> bool {
        sensor_id.0 >= 1
            && self
                .sensors
                .get(sensor_id.0 as usize - 1)
                .is_some_and(|s| s.connected)
    }

    /// Parsed server version
    pub fn version(&self) -> Result<ServerVersion> {
        self.system.rss_version.parse()
    }

    pub fn ticks_per_second(&self) -> u64 {
        self.system.ticks_per_second
    }
}

/// Layout information returned by the server for one configured sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Number of IQ points in one frame
    pub frame_data_length: usize,
    /// Number of IQ points in one sweep
    pub sweep_data_length: usize,
    pub subsweep_data_offset: Vec<usize>,
    pub subsweep_data_length: Vec<usize>,
    pub calibration_temperature: i16,
    /// Distance in meters between two consecutive points at step length 1
    pub base_step_length_m: f64,
    /// Highest sweep rate the configuration allows (Hz)
    pub max_sweep_rate: f64,
}

/// Opaque per-sensor calibration blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorCalibration {
    pub temperature: i16,
    /// Hex-encoded calibration data
    pub data: String,
}

/// Per-sensor header entry of a result message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultInfo {
    pub sensor_id: SensorId,
    /// Raw hardware tick (wraps at 2^32)
    pub tick: u32,
    #[serde(default)]
    pub data_saturated: bool,
    #[serde(default)]
    pub frame_delayed: bool,
    #[serde(default)]
    pub calibration_needed: bool,
    #[serde(default)]
    pub temperature: i16,
}

/// Severity of a server log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
}

/// Log line forwarded by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    #[serde(default)]
    pub timestamp: u64,
    pub module: String,
    pub log: String,
}

/// One complex sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IqSample {
    pub re: i16,
    pub im: i16,
}

impl IqSample {
    pub fn new(re: i16, im: i16) -> Self {
        Self { re, im }
    }

    pub fn amplitude(&self) -> f64 {
        (self.re as f64).hypot(self.im as f64)
    }
}

/// Decoded result for one sensor in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorResult {
    /// Monotonic tick, unwrapped across hardware counter wraps
    pub tick: u64,
    /// `tick` expressed in seconds
    pub tick_time: f64,
    pub data_saturated: bool,
    pub frame_delayed: bool,
    pub calibration_needed: bool,
    pub temperature: i16,
    /// Row-major frame: sweeps x `sweep_data_length` points
    pub frame: Vec<IqSample>,
    pub sweep_data_length: usize,
}

impl SensorResult {
    /// Iterate over the sweeps of the frame
    pub fn sweeps(&self) -> impl Iterator<Item = &[IqSample]> {
        self.frame.chunks(self.sweep_data_length.max(1))
    }
}

/// Results of one frame: one map per configured group
pub type ExtendedResult = Vec<BTreeMap<SensorId, SensorResult>>;

/// Metadata of a session: one map per configured group
pub type ExtendedMetadata = Vec<BTreeMap<SensorId, Metadata>>;
