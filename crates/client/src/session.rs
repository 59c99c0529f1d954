//! Session state shared by every client implementation

use crate::error::{Error, Result};
use crate::recorder::{Recorder, SessionStart};
use common::{ClientInfo, TickUnwrapper};
use protocol::{
    Calibrations, ExtendedMetadata, ExtendedResult, SensorId, ServerInfo, SessionConfig,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Margin added to one and a half frame periods for the streaming timeout
pub const ACTIVE_TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

/// Extra time granted to the stop exchange on top of the streaming timeout
pub const STOP_TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
    SessionSetup,
    SessionStarted,
}

/// Read timeout while streaming: 1.5 frame periods plus a margin, never
/// below the link default
pub fn active_timeout(default: Duration, frame_period: Option<Duration>) -> Duration {
    match frame_period {
        Some(period) => default.max(
            period
                .saturating_add(period / 2)
                .saturating_add(ACTIVE_TIMEOUT_MARGIN),
        ),
        None => default,
    }
}

/// Public contract of a sensor client
///
/// `setup_session`, `start_session`, `get_next` and `stop_session` move
/// through [`SessionState`]; calling them out of order fails with
/// [`Error::Client`] and sends nothing to the server.
pub trait Client: Send {
    fn client_info(&self) -> &ClientInfo;

    fn server_info(&self) -> &ServerInfo;

    fn state(&self) -> SessionState;

    /// Configure a session, optionally reusing calibrations from a previous one
    fn setup_session(
        &mut self,
        config: SessionConfig,
        calibrations: Option<Calibrations>,
    ) -> Result<ExtendedMetadata>;

    fn start_session(&mut self) -> Result<()>;

    /// Block until the next frame of results arrives
    fn get_next(&mut self) -> Result<ExtendedResult>;

    fn stop_session(&mut self) -> Result<()>;

    /// Stop any running session and release the connection; idempotent
    fn close(&mut self) -> Result<()>;

    fn session(&self) -> &SessionData;

    /// Attach a recorder; it is told about the connection right away
    fn attach_recorder(&mut self, recorder: Box<dyn Recorder>) -> Result<()>;

    fn detach_recorder(&mut self) -> Result<Option<Box<dyn Recorder>>>;

    fn is_connected(&self) -> bool {
        self.state() != SessionState::Unconnected
    }

    fn session_is_setup(&self) -> bool {
        matches!(
            self.state(),
            SessionState::SessionSetup | SessionState::SessionStarted
        )
    }

    fn session_is_started(&self) -> bool {
        self.state() == SessionState::SessionStarted
    }
}

/// Configuration, metadata and calibrations of the current session
#[derive(Default)]
pub struct SessionData {
    config: Option<SessionConfig>,
    metadata: Option<ExtendedMetadata>,
    calibrations: Calibrations,
    calibrations_provided: BTreeMap<SensorId, bool>,
    ticks: TickUnwrapper,
    recorder: Option<Box<dyn Recorder>>,
}

impl SessionData {
    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    pub fn metadata(&self) -> Option<&ExtendedMetadata> {
        self.metadata.as_ref()
    }

    /// Calibrations known for the session, caller supplied or server returned
    pub fn calibrations(&self) -> &Calibrations {
        &self.calibrations
    }

    /// Whether each sensor's calibration came from the caller
    pub fn calibrations_provided(&self) -> &BTreeMap<SensorId, bool> {
        &self.calibrations_provided
    }

    pub fn has_recorder(&self) -> bool {
        self.recorder.is_some()
    }

    /// Estimated time between two frames of the configured session
    pub fn frame_period(&self) -> Option<Duration> {
        self.config
            .as_ref()?
            .estimated_frame_period(self.metadata.as_ref())
    }

    /// Store the outcome of a setup exchange
    ///
    /// Server returned calibrations take precedence over caller supplied ones.
    pub(crate) fn setup(
        &mut self,
        config: SessionConfig,
        provided: Option<Calibrations>,
        metadata: ExtendedMetadata,
        returned: Calibrations,
    ) {
        let provided = provided.unwrap_or_default();
        self.calibrations_provided = config
            .sensor_ids()
            .into_iter()
            .map(|id| (id, provided.contains_key(&id)))
            .collect();

        let mut calibrations = provided;
        calibrations.extend(returned);
        self.calibrations = calibrations;
        self.metadata = Some(metadata);
        self.config = Some(config);
    }

    /// Reset tick continuity and tell the recorder a session started
    pub(crate) fn begin(&mut self) -> Result<()> {
        self.ticks.reset();
        let (Some(config), Some(metadata)) = (&self.config, &self.metadata) else {
            return Err(Error::client("no session has been set up"));
        };
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.start_session(&SessionStart {
                config,
                metadata,
                calibrations: &self.calibrations,
                calibrations_provided: &self.calibrations_provided,
            })?;
        }
        Ok(())
    }

    /// Unwrap ticks of a fresh result and hand it to the recorder
    pub(crate) fn deliver(
        &mut self,
        results: &mut ExtendedResult,
        ticks_per_second: u64,
    ) -> Result<()> {
        self.ticks.unwrap_results(results, ticks_per_second);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.sample(results)?;
        }
        Ok(())
    }

    /// Tell the recorder the session ended
    pub(crate) fn end(&mut self) -> Result<()> {
        match self.recorder.as_mut() {
            Some(recorder) => recorder.stop_session(),
            None => Ok(()),
        }
    }

    /// Best-effort end notification while unwinding from a failure
    pub(crate) fn end_quietly(&mut self) {
        if let Err(e) = self.end() {
            warn!("Recorder failed to end session: {}", e);
        }
    }

    pub(crate) fn attach(
        &mut self,
        mut recorder: Box<dyn Recorder>,
        client_info: &ClientInfo,
        server_info: &ServerInfo,
        state: SessionState,
    ) -> Result<()> {
        if self.recorder.is_some() {
            return Err(Error::client("a recorder is already attached"));
        }
        if state == SessionState::SessionStarted {
            return Err(Error::client("cannot attach a recorder to a started session"));
        }
        recorder.start(client_info, server_info)?;
        self.recorder = Some(recorder);
        Ok(())
    }

    pub(crate) fn detach(&mut self, state: SessionState) -> Result<Option<Box<dyn Recorder>>> {
        if state == SessionState::SessionStarted {
            return Err(Error::client("cannot detach the recorder of a started session"));
        }
        Ok(self.recorder.take())
    }

    /// Forget the session, keeping the recorder
    pub(crate) fn clear(&mut self) {
        self.config = None;
        self.metadata = None;
        self.calibrations.clear();
        self.calibrations_provided.clear();
        self.ticks.reset();
    }
}

impl std::fmt::Debug for SessionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionData")
            .field("config", &self.config)
            .field("calibrations", &self.calibrations.len())
            .field("recorder", &self.recorder.is_some())
            .finish()
    }
}
