//! Session configuration
//!
//! Only structural checks live here. Whether a configuration is accepted by
//! the sensor itself is decided by the server and reported through the setup
//! exchange.

use crate::error::{ProtocolError, Result};
use crate::types::{ExtendedMetadata, SensorId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Slowest accepted update, frame or sweep rate in Hz
pub const MIN_RATE: f64 = 1e-3;

/// Upper bound for an estimated frame period
pub const MAX_FRAME_PERIOD: Duration = Duration::from_secs(1_000);

/// Pulse shape profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Profile {
    #[serde(rename = "PROFILE_1")]
    Profile1,
    #[serde(rename = "PROFILE_2")]
    Profile2,
    #[default]
    #[serde(rename = "PROFILE_3")]
    Profile3,
    #[serde(rename = "PROFILE_4")]
    Profile4,
    #[serde(rename = "PROFILE_5")]
    Profile5,
}

/// Pulse repetition frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Prf {
    #[serde(rename = "19_5_MHz")]
    Prf19_5Mhz,
    #[default]
    #[serde(rename = "15_6_MHz")]
    Prf15_6Mhz,
    #[serde(rename = "13_0_MHz")]
    Prf13_0Mhz,
    #[serde(rename = "8_7_MHz")]
    Prf8_7Mhz,
    #[serde(rename = "6_5_MHz")]
    Prf6_5Mhz,
    #[serde(rename = "5_2_MHz")]
    Prf5_2Mhz,
}

/// Power state the sensor rests in between sweeps or frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    #[default]
    DeepSleep,
    Sleep,
    Ready,
}

/// One distance range measured within a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsweepConfig {
    pub start_point: i32,
    pub num_points: u32,
    pub step_length: u32,
    pub profile: Profile,
    pub hwaas: u32,
    pub receiver_gain: u32,
    pub prf: Prf,
    pub enable_tx: bool,
}

impl Default for SubsweepConfig {
    fn default() -> Self {
        Self {
            start_point: 80,
            num_points: 160,
            step_length: 1,
            profile: Profile::default(),
            hwaas: 8,
            receiver_gain: 16,
            prf: Prf::default(),
            enable_tx: true,
        }
    }
}

/// Configuration of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub sweeps_per_frame: u32,
    #[serde(default)]
    pub sweep_rate: Option<f64>,
    #[serde(default)]
    pub frame_rate: Option<f64>,
    #[serde(default)]
    pub continuous_sweep_mode: bool,
    #[serde(default)]
    pub inter_frame_idle_state: IdleState,
    #[serde(default = "ready_idle_state")]
    pub inter_sweep_idle_state: IdleState,
    pub subsweeps: Vec<SubsweepConfig>,
}

fn ready_idle_state() -> IdleState {
    IdleState::Ready
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sweeps_per_frame: 1,
            sweep_rate: None,
            frame_rate: None,
            continuous_sweep_mode: false,
            inter_frame_idle_state: IdleState::DeepSleep,
            inter_sweep_idle_state: IdleState::Ready,
            subsweeps: vec![SubsweepConfig::default()],
        }
    }
}

impl SensorConfig {
    /// Total number of points in one sweep
    pub fn sweep_data_length(&self) -> usize {
        self.subsweeps.iter().map(|s| s.num_points as usize).sum()
    }

    /// Total number of points in one frame
    pub fn frame_data_length(&self) -> usize {
        self.sweep_data_length() * self.sweeps_per_frame as usize
    }

    fn validate(&self, sensor_id: SensorId) -> Result<()> {
        let invalid = |reason: String| {
            Err(ProtocolError::InvalidConfig(format!(
                "sensor {}: {}",
                sensor_id, reason
            )))
        };

        if self.sweeps_per_frame == 0 {
            return invalid("sweeps_per_frame must be at least 1".to_string());
        }
        if self.subsweeps.is_empty() {
            return invalid("at least one subsweep is required".to_string());
        }
        for rate in [self.sweep_rate, self.frame_rate].into_iter().flatten() {
            if !valid_rate(rate) {
                return invalid(format!("rate {} must be finite and at least {} Hz", rate, MIN_RATE));
            }
        }
        for (i, subsweep) in self.subsweeps.iter().enumerate() {
            if subsweep.num_points == 0 {
                return invalid(format!("subsweep {} has no points", i));
            }
            if subsweep.step_length == 0 {
                return invalid(format!("subsweep {} has step_length 0", i));
            }
            if subsweep.hwaas == 0 {
                return invalid(format!("subsweep {} has hwaas 0", i));
            }
        }
        Ok(())
    }
}

/// Full session configuration: groups of concurrently measured sensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub groups: Vec<BTreeMap<SensorId, SensorConfig>>,
    #[serde(default)]
    pub update_rate: Option<f64>,
    /// Callers of an extended session receive every group and sensor
    #[serde(default)]
    pub extended: bool,
}

impl SessionConfig {
    /// Session with a single sensor in a single group
    pub fn single(sensor_id: SensorId, config: SensorConfig) -> Self {
        Self {
            groups: vec![BTreeMap::from([(sensor_id, config)])],
            update_rate: None,
            extended: false,
        }
    }

    pub fn with_update_rate(mut self, update_rate: f64) -> Self {
        self.update_rate = Some(update_rate);
        self
    }

    /// All sensor ids used in any group
    pub fn sensor_ids(&self) -> BTreeSet<SensorId> {
        self.groups.iter().flat_map(|g| g.keys().copied()).collect()
    }

    /// Iterate over every (group index, sensor id, config)
    pub fn entries(&self) -> impl Iterator<Item = (usize, SensorId, &SensorConfig)> {
        self.groups
            .iter()
            .enumerate()
            .flat_map(|(i, g)| g.iter().map(move |(id, c)| (i, *id, c)))
    }

    pub fn uses_prf(&self, prf: Prf) -> bool {
        self.entries()
            .any(|(_, _, c)| c.subsweeps.iter().any(|s| s.prf == prf))
    }

    pub fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            return Err(ProtocolError::InvalidConfig(
                "at least one group is required".to_string(),
            ));
        }
        if let Some(rate) = self.update_rate {
            if !valid_rate(rate) {
                return Err(ProtocolError::InvalidConfig(format!(
                    "update_rate {} must be finite and at least {} Hz",
                    rate, MIN_RATE
                )));
            }
        }
        for (i, group) in self.groups.iter().enumerate() {
            if group.is_empty() {
                return Err(ProtocolError::InvalidConfig(format!("group {} is empty", i)));
            }
            for (sensor_id, config) in group {
                if sensor_id.0 == 0 {
                    return Err(ProtocolError::InvalidConfig(
                        "sensor ids start at 1".to_string(),
                    ));
                }
                config.validate(*sensor_id)?;
            }
        }
        Ok(())
    }

    /// Best estimate of the time between two results
    ///
    /// Prefers the session update rate, then the slowest sensor frame rate,
    /// then the slowest sweep-bound frame from server metadata.
    pub fn estimated_frame_period(&self, metadata: Option<&ExtendedMetadata>) -> Option<Duration> {
        if let Some(rate) = self.update_rate {
            return period_from_secs(1.0 / rate);
        }

        let slowest_frame_rate = self
            .entries()
            .filter_map(|(_, _, c)| c.frame_rate)
            .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.min(r))));
        if let Some(rate) = slowest_frame_rate {
            return period_from_secs(1.0 / rate);
        }

        let metadata = metadata?;
        self.entries()
            .filter_map(|(group, sensor_id, c)| {
                let meta = metadata.get(group)?.get(&sensor_id)?;
                (meta.max_sweep_rate > 0.0)
                    .then(|| c.sweeps_per_frame as f64 / meta.max_sweep_rate)
            })
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))))
            .and_then(period_from_secs)
    }
}

fn valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate >= MIN_RATE
}

/// Frame period capped at [`MAX_FRAME_PERIOD`]; `None` for negative input
fn period_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs.min(MAX_FRAME_PERIOD.as_secs_f64())).ok()
}
