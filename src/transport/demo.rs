// src/transport/demo.rs
//! Synthetic device for running without hardware
//!
//! Behaves like a two-channel scope flashed with the demo tables: it
//! decodes the same control packets real firmware would, mirrors the
//! selected gain, rate, channel count and calibration frequency, and
//! synthesizes a deterministic signal on bulk reads. Channel 1 carries a
//! 1 V square wave at the calibration frequency, channel 2 a 0.5 V sine,
//! both with a little seeded noise so traces do not look painted on.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::protocol::{ControlCommand, COMMAND_PACKET_LEN};
use crate::spec::DeviceIdentity;

use super::{DeviceTransport, TransportError};

const DEMO_SEED: u64 = 0x0d50_cafe;
const ADC_ZERO: f64 = 128.0;
const NOISE_COUNTS: f64 = 1.5;
const SQUARE_AMPLITUDE_V: f64 = 1.0;
const SINE_AMPLITUDE_V: f64 = 0.5;

/// Software stand-in for an attached scope.
pub struct DemoTransport {
    gain_ids: [u8; 2],
    rate_id: u8,
    channel_count: usize,
    calibration_hz: u32,
    sampling: bool,
    closed: bool,
    /// Raw sample ticks since construction, shared by both channels.
    phase: u64,
    rng: StdRng,
    paced: bool,
}

impl DemoTransport {
    /// Paced variant: bulk reads take roughly as long as real capture.
    pub fn new() -> Self {
        Self::seeded(DEMO_SEED, true)
    }

    /// Unpaced variant for tests, returning bulk data immediately.
    pub fn unpaced() -> Self {
        Self::seeded(DEMO_SEED, false)
    }

    pub fn seeded(seed: u64, paced: bool) -> Self {
        Self {
            gain_ids: [1, 1],
            rate_id: 1,
            channel_count: 2,
            calibration_hz: 1_000,
            sampling: false,
            closed: false,
            phase: 0,
            rng: StdRng::seed_from_u64(seed),
            paced,
        }
    }

    /// Raw capture rate the current rate selector stands for.
    fn raw_rate_hz(&self) -> f64 {
        match self.rate_id {
            10 => 100e3,
            id => f64::from(id.max(1)) * 1e6,
        }
    }

    fn counts_per_volt(hw_gain_id: u8) -> f64 {
        match hw_gain_id {
            10 => 1_280.0,
            5 => 160.0,
            2 => 64.0,
            _ => 25.6,
        }
    }

    fn sample_byte(&mut self, channel: usize, t_seconds: f64) -> u8 {
        let f = f64::from(self.calibration_hz);
        let volts = if channel == 0 {
            let cycle = (t_seconds * f).fract();
            if cycle < 0.5 {
                SQUARE_AMPLITUDE_V
            } else {
                0.0
            }
        } else {
            SINE_AMPLITUDE_V * (std::f64::consts::TAU * f * t_seconds).sin()
        };
        let scale = Self::counts_per_volt(self.gain_ids[channel.min(1)]);
        let noise = self.rng.gen_range(-NOISE_COUNTS..NOISE_COUNTS);
        (ADC_ZERO + volts * scale + noise).clamp(0.0, 255.0) as u8
    }
}

impl Default for DemoTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTransport for DemoTransport {
    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: 0x0000,
            product_id: 0x0000,
            firmware_version: 0,
        }
    }

    fn control_write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        if packet.len() != COMMAND_PACKET_LEN {
            return Err(TransportError::Io {
                reason: format!("demo firmware expects {COMMAND_PACKET_LEN}-byte packets"),
            });
        }
        let command =
            ControlCommand::decode([packet[0], packet[1]]).map_err(|e| TransportError::Io {
                reason: format!("demo firmware rejected packet: {e}"),
            })?;
        trace!(?command, "demo control write");
        match command {
            ControlCommand::SetChannelGain {
                channel,
                hw_gain_id,
            } => self.gain_ids[channel.index()] = hw_gain_id,
            ControlCommand::SetSampleRate { device_id } => self.rate_id = device_id,
            ControlCommand::SetChannelCount { count } => {
                self.channel_count = usize::from(count.clamp(1, 2));
            }
            ControlCommand::SetCoupling { .. } => {}
            ControlCommand::SetCalibrationFrequency { hz } => self.calibration_hz = hz,
            ControlCommand::StartSampling => self.sampling = true,
            ControlCommand::StopSampling => self.sampling = false,
        }
        Ok(())
    }

    fn bulk_read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        if !self.sampling {
            // No data while stopped, same as real bulk endpoints.
            if self.paced {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
            }
            return Err(TransportError::Timeout);
        }

        let channels = self.channel_count.max(1);
        let len = max_len - (max_len % channels);
        let mut data = Vec::with_capacity(len);
        let raw_rate = self.raw_rate_hz();
        for _ in 0..len / channels {
            let t = self.phase as f64 / raw_rate;
            for channel in 0..channels {
                let byte = self.sample_byte(channel, t);
                data.push(byte);
            }
            self.phase += 1;
        }

        if self.paced {
            let capture = Duration::from_secs_f64(len as f64 / channels as f64 / raw_rate);
            std::thread::sleep(capture.min(timeout));
        }
        Ok(data)
    }

    fn close(&mut self) {
        self.sampling = false;
        self.closed = true;
    }
}
