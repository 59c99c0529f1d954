//! Test utilities for radarlink
//!
//! Builders for canonical server descriptions, metadata and messages shared by
//! the tests of every crate.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{create_mock_server_info, create_session_config};
//!
//! let info = create_mock_server_info("a121-v1.5.0", 2);
//! assert_eq!(info.connected_sensors().len(), 2);
//!
//! let config = create_session_config(1);
//! assert!(config.validate().is_ok());
//! ```

use protocol::{
    Message, Metadata, ResultInfo, ResultMessage, SensorConfig, SensorId, SensorInfo,
    ServerInfo, SessionConfig, SetupResponse, SubsweepConfig, SystemInfo,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Tick rate used by every mock server
pub const MOCK_TICKS_PER_SECOND: u64 = 1_000_000;

/// Create a ServerInfo with `sensors` connected sensors
pub fn create_mock_server_info(rss_version: &str, sensors: usize) -> ServerInfo {
    ServerInfo {
        system: SystemInfo {
            rss_version: rss_version.to_string(),
            sensor: "a121".to_string(),
            ticks_per_second: MOCK_TICKS_PER_SECOND,
            hw: Some("mock".to_string()),
            max_baudrate: Some(2_000_000),
        },
        sensors: (0..sensors)
            .map(|i| SensorInfo {
                connected: true,
                serial: Some(format!("SN{:04}", i + 1)),
            })
            .collect(),
    }
}

/// Small single-sensor session: 2 sweeps of 8 points at 100 Hz
pub fn create_session_config(sensor_id: u32) -> SessionConfig {
    let sensor = SensorConfig {
        sweeps_per_frame: 2,
        subsweeps: vec![SubsweepConfig {
            start_point: 100,
            num_points: 8,
            ..Default::default()
        }],
        ..Default::default()
    };
    SessionConfig::single(SensorId(sensor_id), sensor).with_update_rate(100.0)
}

/// Metadata a server would return for `config`
pub fn create_mock_metadata(config: &SensorConfig) -> Metadata {
    let mut offsets = Vec::with_capacity(config.subsweeps.len());
    let mut offset = 0;
    for subsweep in &config.subsweeps {
        offsets.push(offset);
        offset += subsweep.num_points as usize;
    }

    Metadata {
        frame_data_length: config.frame_data_length(),
        sweep_data_length: config.sweep_data_length(),
        subsweep_data_offset: offsets,
        subsweep_data_length: config
            .subsweeps
            .iter()
            .map(|s| s.num_points as usize)
            .collect(),
        calibration_temperature: 25,
        base_step_length_m: 0.0025,
        max_sweep_rate: 1000.0,
    }
}

/// Setup response matching `config`, without calibrations
pub fn create_mock_setup_response(config: &SessionConfig) -> SetupResponse {
    SetupResponse {
        metadata: config
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|(id, sensor)| (*id, create_mock_metadata(sensor)))
                    .collect::<BTreeMap<_, _>>()
            })
            .collect(),
        calibrations: BTreeMap::new(),
    }
}

/// Result message for `config` with every sample set to (1, -1)
pub fn create_mock_result(config: &SessionConfig, tick: u32) -> Message {
    let mut payload = Vec::new();
    let info = config
        .groups
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|(id, sensor)| {
                    for _ in 0..sensor.frame_data_length() {
                        payload.extend_from_slice(&1i16.to_le_bytes());
                        payload.extend_from_slice(&(-1i16).to_le_bytes());
                    }
                    ResultInfo {
                        sensor_id: *id,
                        tick,
                        data_saturated: false,
                        frame_delayed: false,
                        calibration_needed: false,
                        temperature: 25,
                    }
                })
                .collect()
        })
        .collect();

    Message::Result(ResultMessage { info, payload })
}
