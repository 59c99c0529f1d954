//! Recorder hook
//!
//! A client notifies its recorder at four points: when the recorder is
//! attached, when a session starts, for every result, and when the session
//! ends. [`InMemoryRecorder`] keeps everything in memory; its [`Recording`]
//! can be replayed by the mock client.

use crate::error::{Error, Result};
use common::ClientInfo;
use protocol::{Calibrations, ExtendedMetadata, ExtendedResult, SensorId, ServerInfo, SessionConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything known about a session when it starts
#[derive(Debug, Clone, Copy)]
pub struct SessionStart<'a> {
    pub config: &'a SessionConfig,
    pub metadata: &'a ExtendedMetadata,
    pub calibrations: &'a Calibrations,
    /// Sensors whose calibration was supplied by the caller
    pub calibrations_provided: &'a BTreeMap<SensorId, bool>,
}

pub trait Recorder: Send {
    /// Called once when attached to a connected client
    fn start(&mut self, client_info: &ClientInfo, server_info: &ServerInfo) -> Result<()>;

    fn start_session(&mut self, session: &SessionStart<'_>) -> Result<()>;

    /// Called with every result, in the order the caller receives them
    fn sample(&mut self, result: &ExtendedResult) -> Result<()>;

    fn stop_session(&mut self) -> Result<()>;
}

/// One recorded session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSession {
    pub config: SessionConfig,
    pub metadata: ExtendedMetadata,
    pub calibrations: Calibrations,
    pub calibrations_provided: BTreeMap<SensorId, bool>,
    pub results: Vec<ExtendedResult>,
    /// False while the session is still running
    pub complete: bool,
}

/// Everything an [`InMemoryRecorder`] captured
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub client_info: Option<ClientInfo>,
    pub server_info: Option<ServerInfo>,
    pub sessions: Vec<RecordedSession>,
}

impl Recording {
    pub fn result_count(&self) -> usize {
        self.sessions.iter().map(|s| s.results.len()).sum()
    }
}

/// Recorder storing sessions in memory
///
/// Clones share the same recording, so the caller can keep a handle while
/// the client owns the recorder.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecorder {
    recording: Arc<Mutex<Recording>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.recording
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of what has been recorded so far
    pub fn recording(&self) -> Recording {
        self.lock().clone()
    }

    fn current_session(recording: &mut Recording) -> Result<&mut RecordedSession> {
        recording
            .sessions
            .last_mut()
            .filter(|s| !s.complete)
            .ok_or_else(|| Error::Recorder("no session in progress".to_string()))
    }
}

impl Recorder for InMemoryRecorder {
    fn start(&mut self, client_info: &ClientInfo, server_info: &ServerInfo) -> Result<()> {
        let mut recording = self.lock();
        recording.client_info = Some(client_info.clone());
        recording.server_info = Some(server_info.clone());
        Ok(())
    }

    fn start_session(&mut self, session: &SessionStart<'_>) -> Result<()> {
        let mut recording = self.lock();
        if recording.sessions.last().is_some_and(|s| !s.complete) {
            return Err(Error::Recorder("previous session not stopped".to_string()));
        }
        recording.sessions.push(RecordedSession {
            config: session.config.clone(),
            metadata: session.metadata.clone(),
            calibrations: session.calibrations.clone(),
            calibrations_provided: session.calibrations_provided.clone(),
            results: Vec::new(),
            complete: false,
        });
        Ok(())
    }

    fn sample(&mut self, result: &ExtendedResult) -> Result<()> {
        let mut recording = self.lock();
        Self::current_session(&mut recording)?
            .results
            .push(result.clone());
        Ok(())
    }

    fn stop_session(&mut self) -> Result<()> {
        let mut recording = self.lock();
        Self::current_session(&mut recording)?.complete = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_server_info, create_mock_setup_response, create_session_config};

    #[test]
    fn test_records_session_lifecycle() {
        let mut recorder = InMemoryRecorder::new();
        let handle = recorder.clone();

        let config = create_session_config(1);
        let metadata = create_mock_setup_response(&config).metadata;
        let calibrations = Calibrations::new();
        let provided = BTreeMap::from([(SensorId(1), false)]);

        recorder
            .start(&ClientInfo::mock(), &create_mock_server_info("a121-v1.5.0", 1))
            .unwrap();
        recorder
            .start_session(&SessionStart {
                config: &config,
                metadata: &metadata,
                calibrations: &calibrations,
                calibrations_provided: &provided,
            })
            .unwrap();
        recorder.sample(&Vec::new()).unwrap();
        recorder.stop_session().unwrap();

        let recording = handle.recording();
        assert_eq!(recording.sessions.len(), 1);
        assert!(recording.sessions[0].complete);
        assert_eq!(recording.result_count(), 1);
        assert_eq!(recording.client_info, Some(ClientInfo::mock()));
    }

    #[test]
    fn test_sample_without_session_fails() {
        let mut recorder = InMemoryRecorder::new();
        assert!(matches!(recorder.sample(&Vec::new()), Err(Error::Recorder(_))));
        assert!(recorder.stop_session().is_err());
    }
}
