// src/convert/mod.rs
//! Raw frame to calibrated sample-set conversion
//!
//! `convert` is a pure function: the same frame, model and snapshot always
//! produce the same `SampleSet`, bit for bit. All timing-dependent policy
//! (AUTO free-run, discard of untriggered records) lives downstream in the
//! pipeline worker; conversion only computes voltages, collapses the raw
//! stream per the downsampling policy and marks the trigger outcome.

pub mod trigger;

use rayon::prelude::*;
use thiserror::Error;

use crate::config::{CaptureSnapshot, DownsamplingPolicy};
use crate::protocol::RawFrame;
use crate::samples::{ChannelSource, ChannelTrace, SampleSet, TriggerOutcome};
use crate::spec::{ModelSpec, SpecError, TriggerMode};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("frame carries {frame_channels} channels, configuration streams {stream_channels}")]
    FrameGeometryMismatch {
        frame_channels: usize,
        stream_channels: usize,
    },

    #[error("frame is empty")]
    EmptyFrame,

    #[error("calibration has no entry for channel {channel} gain {gain_index}")]
    CalibrationShape { channel: usize, gain_index: usize },

    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// Converts one raw frame captured under `snapshot` into voltages.
///
/// Channels are deinterleaved, mapped through the model's scale table and
/// the per-unit calibration, downsampled when the rate entry demands it,
/// then re-sliced so the trigger event sits at the configured position.
/// ROLL mode bypasses the trigger search entirely; a missing trigger in
/// the other modes yields an unsliced set marked `Untriggered`.
pub fn convert(
    frame: &RawFrame,
    spec: &ModelSpec,
    snapshot: &CaptureSnapshot,
    cycle: u64,
) -> Result<SampleSet, ConvertError> {
    let active = snapshot.scope.active_channel_indices();
    if frame.channel_count != snapshot.scope.stream_channel_count() {
        return Err(ConvertError::FrameGeometryMismatch {
            frame_channels: frame.channel_count,
            stream_channels: snapshot.scope.stream_channel_count(),
        });
    }
    if frame.is_empty() {
        return Err(ConvertError::EmptyFrame);
    }

    let factor = snapshot.rate_entry.downsampling as usize;
    let policy = snapshot.scope.downsampling;

    let mut channels = active
        .par_iter()
        .map(|&channel| -> Result<ChannelTrace, ConvertError> {
            let gain_index = snapshot.scope.channels[channel].gain_index;
            let scale = spec.voltage_scale(channel, gain_index)?;
            let step = spec.gain_step(gain_index)?;
            let zero = snapshot
                .calibration
                .zero_code(channel, gain_index)
                .ok_or(ConvertError::CalibrationShape {
                    channel,
                    gain_index,
                })?;
            let trim = snapshot
                .calibration
                .gain_factor(channel, gain_index)
                .ok_or(ConvertError::CalibrationShape {
                    channel,
                    gain_index,
                })?;

            let raw: Vec<f64> = frame
                .channel_samples(channel)
                .map(|byte| (f64::from(byte) - zero) / scale * trim)
                .collect();
            let voltage = downsample(raw, factor, policy);

            Ok(ChannelTrace::new(
                ChannelSource::Input(channel),
                gain_index,
                step.volts_per_div,
                voltage,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let trigger = resolve_trigger(&snapshot.scope, &active, &mut channels);

    Ok(SampleSet {
        cycle,
        config_version: snapshot.version,
        sample_interval: snapshot.sample_interval(),
        trigger,
        channels,
    })
}

/// Collapses raw samples to the effective rate. Both policies truncate a
/// trailing partial group so every channel ends up the same length.
fn downsample(raw: Vec<f64>, factor: usize, policy: DownsamplingPolicy) -> Vec<f64> {
    if factor <= 1 {
        return raw;
    }
    let whole = raw.len() / factor;
    match policy {
        DownsamplingPolicy::Decimate => (0..whole).map(|i| raw[i * factor]).collect(),
        DownsamplingPolicy::Average => raw[..whole * factor]
            .chunks_exact(factor)
            .map(|group| group.iter().sum::<f64>() / factor as f64)
            .collect(),
    }
}

fn resolve_trigger(
    scope: &crate::config::ScopeConfig,
    active: &[usize],
    channels: &mut [ChannelTrace],
) -> TriggerOutcome {
    if scope.trigger.mode == TriggerMode::Roll {
        return TriggerOutcome::Bypassed;
    }
    let Some(slot) = active.iter().position(|&c| c == scope.trigger.source) else {
        return TriggerOutcome::Untriggered;
    };

    let source = &channels[slot].voltage;
    let Some(edge) = trigger::find_edge(source, scope.trigger.level_volts, scope.trigger.slope)
    else {
        return TriggerOutcome::Untriggered;
    };

    let len = source.len();
    let start = trigger::aligned_start(edge, scope.trigger.position, len);
    if start > 0 {
        for channel in channels.iter_mut() {
            let sliced: Vec<f64> = channel.voltage[start..].to_vec();
            channel.voltage = std::sync::Arc::new(sliced);
        }
    }
    TriggerOutcome::Triggered {
        position: edge - start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CalibrationData, ScopeConfig};
    use crate::spec::models;
    use crate::spec::TriggerSlope;
    use std::sync::Arc;

    fn snapshot_for(scope: ScopeConfig, spec: &ModelSpec) -> CaptureSnapshot {
        CaptureSnapshot::build(1, scope, spec, CalibrationData::shared_default(spec)).unwrap()
    }

    fn single_channel_scope(rate_hz: f64, record_length: usize) -> ScopeConfig {
        let mut scope = ScopeConfig::default();
        scope.channels[1].enabled = false;
        scope.sample_rate_hz = rate_hz;
        scope.record_length = record_length;
        scope.trigger.mode = TriggerMode::Roll;
        scope
    }

    fn frame_of(bytes: Vec<u8>, channels: usize) -> RawFrame {
        let record = bytes.len() / channels;
        RawFrame::decode(bytes, record, channels, 1).unwrap()
    }

    #[test]
    fn test_zero_code_maps_to_zero_volts() {
        let spec = models::demo();
        let scope = single_channel_scope(1e6, 1_024);
        let snapshot = snapshot_for(scope, &spec);
        let frame = frame_of(vec![128u8; 1_024], 1);

        let set = convert(&frame, &spec, &snapshot, 0).unwrap();
        assert_eq!(set.channels.len(), 1);
        assert!(set.channels[0].voltage.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_scale_and_calibration_applied() {
        let spec = models::demo();
        let mut scope = single_channel_scope(1e6, 1_024);
        scope.channels[0].gain_index = 5; // 1 V/div, 25.6 counts/V
        let mut calibration = CalibrationData::for_model(&spec);
        calibration.zero_code[0][5] = 130.0;
        calibration.gain_factor[0][5] = 1.01;
        let snapshot =
            CaptureSnapshot::build(1, scope, &spec, Arc::new(calibration)).unwrap();

        let frame = frame_of(vec![156u8; 1_024], 1);
        let set = convert(&frame, &spec, &snapshot, 0).unwrap();
        let expected = (156.0 - 130.0) / 25.6 * 1.01;
        assert!((set.channels[0].voltage[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_convert_is_deterministic() {
        let spec = models::demo();
        let mut scope = ScopeConfig::default();
        scope.record_length = 2_048;
        scope.trigger.mode = TriggerMode::Auto;
        let snapshot = snapshot_for(scope, &spec);

        let bytes: Vec<u8> = (0..4_096u32).map(|i| (i % 251) as u8).collect();
        let frame = frame_of(bytes, 2);
        let first = convert(&frame, &spec, &snapshot, 7).unwrap();
        let second = convert(&frame, &spec, &snapshot, 7).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decimation_keeps_every_nth_sample() {
        // 24 MS/s raw collapsed by 3 to 8 MS/s: 24000 raw -> 8000 out.
        let spec = models::isds205b();
        let mut scope = single_channel_scope(8e6, 20_000);
        scope.downsampling = DownsamplingPolicy::Decimate;
        let snapshot = snapshot_for(scope, &spec);
        assert_eq!(snapshot.raw_rate_hz, 24e6);

        let bytes: Vec<u8> = (0..24_000u32).map(|i| (i % 256) as u8).collect();
        let frame = RawFrame::decode(bytes.clone(), 24_000, 1, 1).unwrap();
        let set = convert(&frame, &spec, &snapshot, 0).unwrap();

        assert_eq!(set.sample_count(), 8_000);
        let gain_index = snapshot.scope.channels[0].gain_index;
        let scale = spec.voltage_scale(0, gain_index).unwrap();
        for (i, &v) in set.channels[0].voltage.iter().enumerate() {
            let expected = (f64::from(bytes[i * 3]) - 128.0) / scale;
            assert!((v - expected).abs() < 1e-12, "sample {i}");
        }
    }

    #[test]
    fn test_averaging_takes_group_means() {
        let spec = models::demo();
        // 500 kS/s entry captures at 2 MS/s, factor 4.
        let mut scope = single_channel_scope(500e3, 1_024);
        scope.downsampling = DownsamplingPolicy::Average;
        let snapshot = snapshot_for(scope, &spec);
        assert_eq!(snapshot.rate_entry.downsampling, 4);

        let bytes = vec![128u8, 132, 128, 132, 120, 120, 136, 136];
        let frame = RawFrame::decode(bytes, 8, 1, 1).unwrap();
        let set = convert(&frame, &spec, &snapshot, 0).unwrap();
        assert_eq!(set.sample_count(), 2);

        let gain_index = snapshot.scope.channels[0].gain_index;
        let scale = spec.voltage_scale(0, gain_index).unwrap();
        assert!((set.channels[0].voltage[0] - 2.0 / scale).abs() < 1e-12);
        assert!((set.channels[0].voltage[1] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_normal_trigger_reslices_at_event() {
        let spec = models::demo();
        let mut scope = single_channel_scope(1e6, 1_024);
        scope.trigger.mode = TriggerMode::Normal;
        scope.trigger.slope = TriggerSlope::Rising;
        scope.trigger.level_volts = 0.0;
        scope.trigger.position = 0.0;
        scope.trigger.source = 0;
        let snapshot = snapshot_for(scope, &spec);

        let mut bytes = vec![100u8; 1_024];
        for byte in bytes.iter_mut().skip(512) {
            *byte = 156;
        }
        let frame = frame_of(bytes, 1);
        let set = convert(&frame, &spec, &snapshot, 0).unwrap();

        assert_eq!(set.trigger, TriggerOutcome::Triggered { position: 0 });
        assert_eq!(set.sample_count(), 512);
        assert!(set.channels[0].voltage[0] > 0.0);
    }

    #[test]
    fn test_pre_trigger_share_keeps_history() {
        let spec = models::demo();
        let mut scope = single_channel_scope(1e6, 1_024);
        scope.trigger.mode = TriggerMode::Normal;
        scope.trigger.position = 0.25;
        let snapshot = snapshot_for(scope, &spec);

        let mut bytes = vec![100u8; 1_024];
        for byte in bytes.iter_mut().skip(512) {
            *byte = 156;
        }
        let frame = frame_of(bytes, 1);
        let set = convert(&frame, &spec, &snapshot, 0).unwrap();

        assert_eq!(set.trigger, TriggerOutcome::Triggered { position: 256 });
        assert_eq!(set.sample_count(), 1_024 - 256);
        assert!(set.channels[0].voltage[255] < 0.0);
        assert!(set.channels[0].voltage[256] > 0.0);
    }

    #[test]
    fn test_flat_frame_marked_untriggered() {
        let spec = models::demo();
        let mut scope = single_channel_scope(1e6, 1_024);
        scope.trigger.mode = TriggerMode::Normal;
        let snapshot = snapshot_for(scope, &spec);

        let frame = frame_of(vec![128u8; 1_024], 1);
        let set = convert(&frame, &spec, &snapshot, 0).unwrap();
        assert_eq!(set.trigger, TriggerOutcome::Untriggered);
        assert_eq!(set.sample_count(), 1_024);
    }

    #[test]
    fn test_roll_mode_bypasses_trigger() {
        let spec = models::demo();
        let scope = single_channel_scope(1e6, 1_024);
        let snapshot = snapshot_for(scope, &spec);

        let mut bytes = vec![100u8; 1_024];
        bytes[700] = 200;
        let frame = frame_of(bytes, 1);
        let set = convert(&frame, &spec, &snapshot, 0).unwrap();
        assert_eq!(set.trigger, TriggerOutcome::Bypassed);
        assert_eq!(set.sample_count(), 1_024);
    }

    #[test]
    fn test_both_channels_sliced_identically() {
        let spec = models::demo();
        let mut scope = ScopeConfig::default();
        scope.record_length = 1_024;
        scope.trigger.mode = TriggerMode::Normal;
        scope.trigger.position = 0.0;
        scope.trigger.source = 1;
        let snapshot = snapshot_for(scope, &spec);

        let mut bytes = vec![128u8; 2_048];
        // Edge on channel 1 only, halfway in.
        for i in (1..2_048).step_by(2) {
            bytes[i] = if i / 2 < 400 { 100 } else { 156 };
        }
        let frame = frame_of(bytes, 2);
        let set = convert(&frame, &spec, &snapshot, 0).unwrap();

        assert!(set.is_uniform());
        assert_eq!(set.sample_count(), 1_024 - 400);
        assert_eq!(set.channels.len(), 2);
    }

    #[test]
    fn test_second_channel_alone_reads_its_stream_slot() {
        let spec = models::demo();
        let mut scope = ScopeConfig::default();
        scope.channels[0].enabled = false;
        scope.record_length = 4;
        scope.trigger.mode = TriggerMode::Roll;
        assert_eq!(scope.stream_channel_count(), 2);
        let snapshot = snapshot_for(scope, &spec);

        // Slot 0 carries junk, slot 1 the wanted channel.
        let frame = frame_of(vec![0, 138, 0, 138, 0, 138, 0, 138], 2);
        let set = convert(&frame, &spec, &snapshot, 0).unwrap();
        assert_eq!(set.channels.len(), 1);
        assert_eq!(set.channels[0].source, ChannelSource::Input(1));
        let expected = (138.0 - 128.0) / 25.6;
        assert!(set.channels[0]
            .voltage
            .iter()
            .all(|v| (v - expected).abs() < 1e-12));
    }

    #[test]
    fn test_geometry_mismatch_rejected() {
        let spec = models::demo();
        let scope = single_channel_scope(1e6, 1_024);
        let snapshot = snapshot_for(scope, &spec);
        let frame = frame_of(vec![128u8; 2_048], 2);
        assert!(matches!(
            convert(&frame, &spec, &snapshot, 0),
            Err(ConvertError::FrameGeometryMismatch { .. })
        ));
    }
}
