//! Result extraction
//!
//! A result payload is the concatenation, in header order, of every
//! sensor's frame as little-endian `i16` (re, im) pairs.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use protocol::{ExtendedMetadata, ExtendedResult, IqSample, ResultMessage, SensorResult};
use std::collections::BTreeMap;

/// Bytes of one IQ sample on the wire
pub const SAMPLE_SIZE: usize = 4;

/// Decode little-endian IQ pairs
pub fn decode_iq(bytes: &[u8]) -> Vec<IqSample> {
    bytes
        .chunks_exact(SAMPLE_SIZE)
        .map(|pair| {
            IqSample::new(
                LittleEndian::read_i16(&pair[..2]),
                LittleEndian::read_i16(&pair[2..]),
            )
        })
        .collect()
}

/// Encode IQ samples the way the server sends them
pub fn encode_iq(samples: &[IqSample]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * SAMPLE_SIZE];
    for (sample, out) in samples.iter().zip(bytes.chunks_exact_mut(SAMPLE_SIZE)) {
        LittleEndian::write_i16(&mut out[..2], sample.re);
        LittleEndian::write_i16(&mut out[2..], sample.im);
    }
    bytes
}

/// Split a raw result into per-sensor results
///
/// Ticks are copied raw; unwrapping them is up to the caller.
pub fn extract_results(
    message: &ResultMessage,
    metadata: &ExtendedMetadata,
    ticks_per_second: u64,
) -> Result<ExtendedResult> {
    if message.info.len() != metadata.len() {
        return Err(Error::Runtime(format!(
            "result has {} groups, session has {}",
            message.info.len(),
            metadata.len()
        )));
    }

    let tps = ticks_per_second.max(1) as f64;
    let mut offset = 0;
    let mut results = Vec::with_capacity(metadata.len());

    for (group_info, group_meta) in message.info.iter().zip(metadata) {
        let mut group = BTreeMap::new();
        for info in group_info {
            let meta = group_meta.get(&info.sensor_id).ok_or_else(|| {
                Error::Runtime(format!("result for unconfigured sensor {}", info.sensor_id))
            })?;

            let len = meta.frame_data_length * SAMPLE_SIZE;
            let frame_bytes = message.payload.get(offset..offset + len).ok_or_else(|| {
                Error::Runtime(format!(
                    "result payload of {} bytes too short for sensor {}",
                    message.payload.len(),
                    info.sensor_id
                ))
            })?;
            offset += len;

            group.insert(
                info.sensor_id,
                SensorResult {
                    tick: u64::from(info.tick),
                    tick_time: f64::from(info.tick) / tps,
                    data_saturated: info.data_saturated,
                    frame_delayed: info.frame_delayed,
                    calibration_needed: info.calibration_needed,
                    temperature: info.temperature,
                    frame: decode_iq(frame_bytes),
                    sweep_data_length: meta.sweep_data_length,
                },
            );
        }
        results.push(group);
    }

    if offset != message.payload.len() {
        return Err(Error::Runtime(format!(
            "result payload has {} trailing bytes",
            message.payload.len() - offset
        )));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_result, create_mock_setup_response, create_session_config};
    use protocol::{Message, SensorId};

    fn mock_result(tick: u32) -> (ResultMessage, ExtendedMetadata) {
        let config = create_session_config(2);
        let metadata = create_mock_setup_response(&config).metadata;
        match create_mock_result(&config, tick) {
            Message::Result(result) => (result, metadata),
            other => panic!("Expected Result, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_single_sensor() {
        let (message, metadata) = mock_result(2_000_000);
        let results = extract_results(&message, &metadata, 1_000_000).unwrap();

        let result = &results[0][&SensorId(2)];
        assert_eq!(result.tick, 2_000_000);
        assert!((result.tick_time - 2.0).abs() < 1e-9);
        assert_eq!(result.frame.len(), 16);
        assert!(result.frame.iter().all(|s| *s == IqSample::new(1, -1)));
        assert_eq!(result.sweeps().count(), 2);
    }

    #[test]
    fn test_short_payload_is_rejected() {
        let (mut message, metadata) = mock_result(1);
        message.payload.truncate(10);
        assert!(matches!(
            extract_results(&message, &metadata, 1),
            Err(Error::Runtime(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let (mut message, metadata) = mock_result(1);
        message.payload.extend_from_slice(&[0, 0, 0, 0]);
        assert!(extract_results(&message, &metadata, 1).is_err());
    }

    #[test]
    fn test_iq_encoding_is_little_endian() {
        let bytes = encode_iq(&[IqSample::new(-2, 0x0102)]);
        assert_eq!(bytes, vec![0xfe, 0xff, 0x02, 0x01]);
        assert_eq!(decode_iq(&bytes), vec![IqSample::new(-2, 0x0102)]);
    }
}
