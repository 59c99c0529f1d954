//! Client without a transport
//!
//! [`MockClient`] synthesizes results for five virtual sensors: a Gaussian
//! shaped reflection drifting slowly in distance, with phase following the
//! reflector, plus uniform noise. [`MockClient::replay`] instead plays back a
//! session captured by an [`InMemoryRecorder`](crate::recorder::InMemoryRecorder).
//! Either way `get_next` is paced with wall-clock sleeps to the session's
//! update rate.

use crate::error::{Error, Result};
use crate::recorder::{RecordedSession, Recorder, Recording};
use crate::session::{Client, SessionData, SessionState};
use common::{ClientInfo, TICK_MODULUS};
use protocol::{
    Calibrations, ExtendedMetadata, ExtendedResult, IqSample, Metadata, SensorCalibration,
    SensorConfig, SensorId, SensorInfo, SensorResult, ServerInfo, SessionConfig, SystemInfo,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const MOCK_RSS_VERSION: &str = "a121-v1.10.0-mock";
pub const MOCK_SENSOR_COUNT: usize = 5;
pub const MOCK_TICKS_PER_SECOND: u64 = 1_000_000;

/// Pace used when the session gives no hint about its frame rate
const FALLBACK_UPDATE_RATE: f64 = 20.0;
/// Distance between two points at step length 1
const BASE_STEP_LENGTH_M: f64 = 0.0025;
/// Radar wavelength at 60.5 GHz
const WAVELENGTH_M: f64 = 0.004_96;
/// Point measurement rate for a single hardware average
const POINT_RATE_HZ: f64 = 1.0e6;
const CALIBRATION_TEMPERATURE: i16 = 25;
const CALIBRATION_BYTES: usize = 32;
const REFLECTION_AMPLITUDE: f64 = 2000.0;
const REFLECTION_WIDTH_M: f64 = 0.04;
const NOISE_AMPLITUDE: f64 = 20.0;
const DEFAULT_SEED: u64 = 0x5eed;

/// Server description the mock reports
pub fn mock_server_info() -> ServerInfo {
    ServerInfo {
        system: SystemInfo {
            rss_version: MOCK_RSS_VERSION.to_string(),
            sensor: "a121".to_string(),
            ticks_per_second: MOCK_TICKS_PER_SECOND,
            hw: Some("mock".to_string()),
            max_baudrate: None,
        },
        sensors: (0..MOCK_SENSOR_COUNT)
            .map(|i| SensorInfo {
                connected: true,
                serial: Some(format!("MOCK{:04}", i + 1)),
            })
            .collect(),
    }
}

/// Metadata a server would compute for `config`
pub fn synthesize_metadata(config: &SensorConfig) -> Metadata {
    let mut offsets = Vec::with_capacity(config.subsweeps.len());
    let mut offset = 0;
    for subsweep in &config.subsweeps {
        offsets.push(offset);
        offset += subsweep.num_points as usize;
    }

    let sweep_time: f64 = config
        .subsweeps
        .iter()
        .map(|s| f64::from(s.num_points) * f64::from(s.hwaas) / POINT_RATE_HZ)
        .sum();

    Metadata {
        frame_data_length: config.frame_data_length(),
        sweep_data_length: config.sweep_data_length(),
        subsweep_data_offset: offsets,
        subsweep_data_length: config
            .subsweeps
            .iter()
            .map(|s| s.num_points as usize)
            .collect(),
        calibration_temperature: CALIBRATION_TEMPERATURE,
        base_step_length_m: BASE_STEP_LENGTH_M,
        max_sweep_rate: if sweep_time > 0.0 { 1.0 / sweep_time } else { 0.0 },
    }
}

enum Source {
    Synthesized { rng: StdRng },
    Replay { recorded: RecordedSession, position: usize },
}

/// Deterministic client that needs no hardware
pub struct MockClient {
    client_info: ClientInfo,
    server_info: ServerInfo,
    state: SessionState,
    session: SessionData,
    source: Source,
    frame_index: u64,
    next_frame_at: Option<Instant>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Mock whose noise and calibration data come from `seed`
    pub fn with_seed(seed: u64) -> Self {
        Self {
            client_info: ClientInfo::mock(),
            server_info: mock_server_info(),
            state: SessionState::Connected,
            session: SessionData::default(),
            source: Source::Synthesized {
                rng: StdRng::seed_from_u64(seed),
            },
            frame_index: 0,
            next_frame_at: None,
        }
    }

    /// Replay session `index` of `recording`
    ///
    /// The caller must set the session up with the recorded configuration.
    pub fn replay(recording: &Recording, index: usize) -> Result<Self> {
        let recorded = recording.sessions.get(index).cloned().ok_or_else(|| {
            Error::ClientCreation(format!(
                "recording has {} session(s), no session {}",
                recording.sessions.len(),
                index
            ))
        })?;

        info!(
            "Replaying session {} with {} result(s)",
            index,
            recorded.results.len()
        );
        Ok(Self {
            client_info: recording.client_info.clone().unwrap_or_else(ClientInfo::mock),
            server_info: recording.server_info.clone().unwrap_or_else(mock_server_info),
            state: SessionState::Connected,
            session: SessionData::default(),
            source: Source::Replay {
                recorded,
                position: 0,
            },
            frame_index: 0,
            next_frame_at: None,
        })
    }

    pub fn is_replay(&self) -> bool {
        matches!(self.source, Source::Replay { .. })
    }

    fn require_connected(&self) -> Result<()> {
        if self.state == SessionState::Unconnected {
            return Err(Error::client("client is not connected"));
        }
        Ok(())
    }

    fn frame_period(&self) -> Duration {
        self.session
            .frame_period()
            .unwrap_or_else(|| Duration::from_secs_f64(1.0 / FALLBACK_UPDATE_RATE))
    }

    /// Sleep until the next frame is due
    fn pace(&mut self) {
        let period = self.frame_period();
        let now = Instant::now();
        let due = self.next_frame_at.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_frame_at = Some(due.max(now) + period);
    }

    fn synthesize(&mut self) -> Result<ExtendedResult> {
        let period = self.frame_period();
        let (Some(config), Some(metadata)) = (self.session.config(), self.session.metadata())
        else {
            return Err(Error::client("session is not set up"));
        };
        let Source::Synthesized { rng } = &mut self.source else {
            return Err(Error::client("mock is replaying a recording"));
        };

        let elapsed = period.as_secs_f64() * self.frame_index as f64;
        let tick = (elapsed * MOCK_TICKS_PER_SECOND as f64) as u64 % TICK_MODULUS;

        let mut results: ExtendedResult = Vec::with_capacity(config.groups.len());
        for (group, group_meta) in config.groups.iter().zip(metadata) {
            let mut group_results = BTreeMap::new();
            for (id, sensor) in group {
                let Some(meta) = group_meta.get(id) else {
                    continue;
                };
                group_results.insert(
                    *id,
                    SensorResult {
                        tick,
                        tick_time: tick as f64 / MOCK_TICKS_PER_SECOND as f64,
                        data_saturated: false,
                        frame_delayed: false,
                        calibration_needed: false,
                        temperature: CALIBRATION_TEMPERATURE,
                        frame: synthesize_frame(*id, sensor, meta, elapsed, rng),
                        sweep_data_length: meta.sweep_data_length,
                    },
                );
            }
            results.push(group_results);
        }

        self.frame_index += 1;
        Ok(results)
    }

    fn replayed(&mut self) -> Result<ExtendedResult> {
        let Source::Replay { recorded, position } = &mut self.source else {
            return Err(Error::client("mock is not replaying a recording"));
        };
        let result = recorded.results.get(*position).cloned().ok_or_else(|| {
            Error::MessageStream(format!(
                "replay exhausted after {} result(s)",
                recorded.results.len()
            ))
        })?;
        *position += 1;
        Ok(result)
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Distance of sensor `id`'s virtual reflector `elapsed` seconds in
fn reflector_distance(id: SensorId, elapsed: f64) -> f64 {
    let base = 0.3 + 0.2 * f64::from(id.0);
    base + 0.05 * (2.0 * PI * 0.25 * elapsed + f64::from(id.0)).sin()
}

fn synthesize_frame(
    id: SensorId,
    config: &SensorConfig,
    meta: &Metadata,
    elapsed: f64,
    rng: &mut StdRng,
) -> Vec<IqSample> {
    let target = reflector_distance(id, elapsed);
    let phase = 4.0 * PI * target / WAVELENGTH_M;
    let amplitude = REFLECTION_AMPLITUDE / f64::from(id.0.max(1));

    let mut frame = Vec::with_capacity(meta.frame_data_length);
    for _ in 0..config.sweeps_per_frame {
        for subsweep in &config.subsweeps {
            for point in 0..subsweep.num_points {
                let step = i64::from(subsweep.start_point)
                    + i64::from(point) * i64::from(subsweep.step_length);
                let distance = step as f64 * meta.base_step_length_m;
                let envelope =
                    amplitude * (-((distance - target) / REFLECTION_WIDTH_M).powi(2) / 2.0).exp();
                let re = envelope * phase.cos()
                    + rng.random_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
                let im = envelope * phase.sin()
                    + rng.random_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
                frame.push(IqSample::new(saturate(re), saturate(im)));
            }
        }
    }
    frame
}

fn saturate(value: f64) -> i16 {
    value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

fn random_calibration(rng: &mut StdRng) -> SensorCalibration {
    let data = (0..CALIBRATION_BYTES)
        .map(|_| format!("{:02x}", rng.random::<u8>()))
        .collect();
    SensorCalibration {
        temperature: CALIBRATION_TEMPERATURE,
        data,
    }
}

impl Client for MockClient {
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

        let (metadata, returned) = match &mut self.source {
            Source::Synthesized { rng } => {
                let metadata: ExtendedMetadata = config
                    .groups
                    .iter()
                    .map(|group| {
                        group
                            .iter()
                            .map(|(id, sensor)| (*id, synthesize_metadata(sensor)))
                            .collect::<BTreeMap<_, _>>()
                    })
                    .collect();
                let provided = calibrations.as_ref();
                let returned: Calibrations = config
                    .sensor_ids()
                    .into_iter()
                    .filter(|id| !provided.is_some_and(|c| c.contains_key(id)))
                    .map(|id| (id, random_calibration(rng)))
                    .collect();
                (metadata, returned)
            }
            Source::Replay { recorded, position } => {
                if recorded.config != config {
                    return Err(Error::client(
                        "configuration differs from the recorded session",
                    ));
                }
                *position = 0;
                (recorded.metadata.clone(), recorded.calibrations.clone())
            }
        };

        self.session
            .setup(config, calibrations, metadata.clone(), returned);
        self.state = SessionState::SessionSetup;
        debug!("Mock session set up");
        Ok(metadata)
    }

    fn start_session(&mut self) -> Result<()> {
        self.require_connected()?;
        match self.state {
            SessionState::SessionStarted => {
                return Err(Error::client("session is already started"));
            }
            SessionState::Connected => return Err(Error::client("session is not set up")),
            _ => {}
        }

        self.frame_index = 0;
        self.next_frame_at = Some(Instant::now());
        self.state = SessionState::SessionStarted;
        self.session.begin()
    }

    fn get_next(&mut self) -> Result<ExtendedResult> {
        self.require_connected()?;
        if self.state != SessionState::SessionStarted {
            return Err(Error::client("session is not started"));
        }

        let mut results = if self.is_replay() {
            self.replayed()?
        } else {
            self.synthesize()?
        };

        self.pace();
        let tps = self.server_info.ticks_per_second();
        self.session.deliver(&mut results, tps)?;
        Ok(results)
    }

    fn stop_session(&mut self) -> Result<()> {
        self.require_connected()?;
        if self.state != SessionState::SessionStarted {
            return Err(Error::client("session is not started"));
        }
        self.state = SessionState::SessionSetup;
        self.next_frame_at = None;
        self.session.end()
    }

    fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Unconnected {
            return Ok(());
        }
        let outcome = if self.state == SessionState::SessionStarted {
            self.stop_session()
        } else {
            Ok(())
        };
        self.state = SessionState::Unconnected;
        self.session.clear();
        outcome
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
