//! Versioned command encoders and message parser
//!
//! The variants form a chain ordered from richest to most restrictive. Every
//! step removes exactly one feature from the step before it, and its setup
//! encoder is the richer encoder plus a rejection check and a field strip:
//!
//! ```text
//! Current  ->  No5_2MhzPrf  ->  NoCalibrationReuse
//!              (- 5.2 MHz PRF)  (- calibration_info)
//! ```

use crate::config::{Prf, SessionConfig};
use crate::error::{ProtocolError, Result};
use crate::messages::{Header, Message, parse_message};
use crate::types::{SensorCalibration, SensorId};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Byte sequence terminating every header and command
pub const END_SEQUENCE: &[u8] = b"\n";

/// Per-sensor calibrations supplied by the caller
pub type Calibrations = BTreeMap<SensorId, SensorCalibration>;

/// Protocol dialect spoken with a particular server version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVariant {
    /// Full feature set
    Current,
    /// Server cannot run the 5.2 MHz pulse repetition frequency
    No5_2MhzPrf,
    /// Server additionally cannot take calibrations in the setup command
    NoCalibrationReuse,
}

fn command(value: Value) -> Vec<u8> {
    let mut bytes = value.to_string().into_bytes();
    bytes.extend_from_slice(END_SEQUENCE);
    bytes
}

impl ProtocolVariant {
    /// The variant this one is derived from, if any
    pub const fn richer(self) -> Option<Self> {
        match self {
            ProtocolVariant::Current => None,
            ProtocolVariant::No5_2MhzPrf => Some(ProtocolVariant::Current),
            ProtocolVariant::NoCalibrationReuse => Some(ProtocolVariant::No5_2MhzPrf),
        }
    }

    /// The single feature this variant removes relative to [`Self::richer`]
    pub const fn removed_feature(self) -> Option<&'static str> {
        match self {
            ProtocolVariant::Current => None,
            ProtocolVariant::No5_2MhzPrf => Some("the 5.2 MHz PRF"),
            ProtocolVariant::NoCalibrationReuse => Some("calibration reuse"),
        }
    }

    pub fn system_info_command(self) -> Vec<u8> {
        command(json!({ "cmd": "get_system_info" }))
    }

    pub fn sensor_info_command(self) -> Vec<u8> {
        command(json!({ "cmd": "get_sensor_info" }))
    }

    pub fn start_streaming_command(self) -> Vec<u8> {
        command(json!({ "cmd": "start_streaming" }))
    }

    pub fn stop_streaming_command(self) -> Vec<u8> {
        command(json!({ "cmd": "stop_streaming" }))
    }

    pub fn baudrate_command(self, baudrate: u32) -> Vec<u8> {
        command(json!({ "cmd": "set_uart_baudrate", "baudrate": baudrate }))
    }

    /// Encode a setup command
    ///
    /// Fails with [`ProtocolError::UnsupportedFeature`] if the configuration
    /// needs something this variant's server lacks.
    pub fn setup_command(
        self,
        config: &SessionConfig,
        calibrations: Option<&Calibrations>,
    ) -> Result<Vec<u8>> {
        let map = self.setup_fields(config, calibrations)?;
        Ok(command(Value::Object(map)))
    }

    fn setup_fields(
        self,
        config: &SessionConfig,
        calibrations: Option<&Calibrations>,
    ) -> Result<Map<String, Value>> {
        let Some(richer) = self.richer() else {
            return Ok(full_setup_fields(config, calibrations));
        };

        self.reject_unsupported(config, calibrations)?;
        let mut fields = richer.setup_fields(config, calibrations)?;
        self.strip_unsupported(&mut fields);
        Ok(fields)
    }

    fn reject_unsupported(
        self,
        config: &SessionConfig,
        calibrations: Option<&Calibrations>,
    ) -> Result<()> {
        let unsupported = match self {
            ProtocolVariant::Current => false,
            ProtocolVariant::No5_2MhzPrf => config.uses_prf(Prf::Prf5_2Mhz),
            ProtocolVariant::NoCalibrationReuse => calibrations.is_some_and(|c| !c.is_empty()),
        };

        match (unsupported, self.removed_feature()) {
            (true, Some(feature)) => Err(ProtocolError::UnsupportedFeature { feature }),
            _ => Ok(()),
        }
    }

    fn strip_unsupported(self, fields: &mut Map<String, Value>) {
        if self == ProtocolVariant::NoCalibrationReuse {
            fields.remove("calibration_info");
        }
    }

    /// Classify a decoded header and payload
    pub fn parse_message(self, header: &Header, payload: Vec<u8>) -> Result<Message> {
        parse_message(header, payload)
    }
}

fn full_setup_fields(
    config: &SessionConfig,
    calibrations: Option<&Calibrations>,
) -> Map<String, Value> {
    let groups: Vec<Vec<Value>> = config
        .groups
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|(sensor_id, sensor_config)| {
                    json!({ "sensor_id": sensor_id, "config": sensor_config })
                })
                .collect()
        })
        .collect();

    let calibration_info: Vec<Value> = calibrations
        .into_iter()
        .flatten()
        .map(|(sensor_id, calibration)| {
            json!({
                "sensor_id": sensor_id,
                "temperature": calibration.temperature,
                "data": calibration.data,
            })
        })
        .collect();

    let mut fields = Map::new();
    fields.insert("cmd".to_string(), json!("setup"));
    fields.insert("groups".to_string(), json!(groups));
    if let Some(rate) = config.update_rate {
        fields.insert("update_rate".to_string(), json!(rate));
    }
    fields.insert("calibration_info".to_string(), json!(calibration_info));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SensorConfig, SubsweepConfig};

    fn decode(bytes: &[u8]) -> Value {
        assert!(bytes.ends_with(END_SEQUENCE));
        serde_json::from_slice(&bytes[..bytes.len() - END_SEQUENCE.len()]).unwrap()
    }

    fn calibrations() -> Calibrations {
        BTreeMap::from([(
            SensorId(1),
            SensorCalibration {
                temperature: 25,
                data: "abcd".to_string(),
            },
        )])
    }

    fn prf_5_2_config() -> SessionConfig {
        let sensor = SensorConfig {
            subsweeps: vec![SubsweepConfig {
                prf: Prf::Prf5_2Mhz,
                ..Default::default()
            }],
            ..Default::default()
        };
        SessionConfig::single(SensorId(1), sensor)
    }

    #[test]
    fn test_fixed_commands() {
        let v = ProtocolVariant::Current;
        assert_eq!(decode(&v.system_info_command())["cmd"], "get_system_info");
        assert_eq!(decode(&v.sensor_info_command())["cmd"], "get_sensor_info");
        assert_eq!(decode(&v.start_streaming_command())["cmd"], "start_streaming");
        assert_eq!(decode(&v.stop_streaming_command())["cmd"], "stop_streaming");
        let baud = decode(&v.baudrate_command(2_000_000));
        assert_eq!(baud["cmd"], "set_uart_baudrate");
        assert_eq!(baud["baudrate"], 2_000_000);
    }

    #[test]
    fn test_current_setup_includes_calibration() {
        let config = SessionConfig::single(SensorId(1), SensorConfig::default()).with_update_rate(10.0);
        let bytes = ProtocolVariant::Current
            .setup_command(&config, Some(&calibrations()))
            .unwrap();
        let value = decode(&bytes);
        assert_eq!(value["cmd"], "setup");
        assert_eq!(value["update_rate"], 10.0);
        assert_eq!(value["groups"][0][0]["sensor_id"], 1);
        assert_eq!(value["calibration_info"][0]["data"], "abcd");
    }

    #[test]
    fn test_no_calibration_reuse_strips_field() {
        let config = SessionConfig::single(SensorId(1), SensorConfig::default());
        let bytes = ProtocolVariant::NoCalibrationReuse
            .setup_command(&config, None)
            .unwrap();
        let value = decode(&bytes);
        assert!(value.get("calibration_info").is_none());
        assert_eq!(value["groups"][0][0]["sensor_id"], 1);
    }

    #[test]
    fn test_no_calibration_reuse_rejects_calibrations() {
        let config = SessionConfig::single(SensorId(1), SensorConfig::default());
        let err = ProtocolVariant::NoCalibrationReuse
            .setup_command(&config, Some(&calibrations()))
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnsupportedFeature {
                feature: "calibration reuse"
            }
        ));
    }

    #[test]
    fn test_prf_5_2_rejected_down_the_chain() {
        let config = prf_5_2_config();
        assert!(ProtocolVariant::Current.setup_command(&config, None).is_ok());
        assert!(ProtocolVariant::No5_2MhzPrf.setup_command(&config, None).is_err());
        assert!(
            ProtocolVariant::NoCalibrationReuse
                .setup_command(&config, None)
                .is_err()
        );
    }

    #[test]
    fn test_restricted_variant_matches_richer_output() {
        let config = SessionConfig::single(SensorId(3), SensorConfig::default());
        let current = decode(&ProtocolVariant::Current.setup_command(&config, None).unwrap());
        let restricted = decode(
            &ProtocolVariant::No5_2MhzPrf
                .setup_command(&config, None)
                .unwrap(),
        );
        assert_eq!(current, restricted);
    }

    #[test]
    fn test_chain_removes_one_feature_per_step() {
        let mut variant = ProtocolVariant::NoCalibrationReuse;
        let mut steps = 0;
        while let Some(richer) = variant.richer() {
            assert!(variant.removed_feature().is_some());
            variant = richer;
            steps += 1;
        }
        assert_eq!(variant, ProtocolVariant::Current);
        assert!(variant.removed_feature().is_none());
        assert_eq!(steps, 2);
    }
}
