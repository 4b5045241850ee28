// src/protocol/commands.rs
//! Control-command packet encoding and decoding
//!
//! The firmware's command parser reads a command code byte and exactly one
//! payload byte. Gain commands carry the channel in the code itself, so the
//! two gain codes are consecutive. The calibration-output frequency is
//! packed into one byte with a split encoding: values below 1 kHz are
//! stored as `100 + hz/10`, values from 1 kHz up as `hz/1000`.

use super::ProtocolError;

/// Every command packet is exactly this long.
pub const COMMAND_PACKET_LEN: usize = 2;

/// Command codes understood by the firmware.
mod codes {
    pub const GAIN_CH1: u8 = 0xe0;
    pub const GAIN_CH2: u8 = 0xe1;
    pub const SAMPLE_RATE: u8 = 0xe2;
    pub const RUN: u8 = 0xe3;
    pub const CHANNEL_COUNT: u8 = 0xe4;
    pub const COUPLING: u8 = 0xe5;
    pub const CALIBRATION_FREQ: u8 = 0xe6;
}

/// Hardware channel selector for commands that address one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeChannel {
    Ch1,
    Ch2,
}

impl ScopeChannel {
    pub const COUNT: usize = 2;

    pub fn index(self) -> usize {
        match self {
            ScopeChannel::Ch1 => 0,
            ScopeChannel::Ch2 => 1,
        }
    }

    pub fn from_index(channel: usize) -> Result<Self, ProtocolError> {
        match channel {
            0 => Ok(ScopeChannel::Ch1),
            1 => Ok(ScopeChannel::Ch2),
            _ => Err(ProtocolError::ChannelOutOfRange {
                channel,
                count: Self::COUNT,
            }),
        }
    }
}

impl std::fmt::Display for ScopeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CH{}", self.index() + 1)
    }
}

/// One configuration or run-control request, ready to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Select a hardware gain step for one channel.
    SetChannelGain {
        channel: ScopeChannel,
        hw_gain_id: u8,
    },
    /// Select a fixed-rate table entry by its device identifier.
    SetSampleRate { device_id: u8 },
    /// Set the number of interleaved channels in the bulk stream.
    SetChannelCount { count: u8 },
    /// Per-channel AC coupling bitmask, bit N = channel N.
    SetCoupling { ac_mask: u8 },
    /// Calibration-output frequency. Representable values are multiples of
    /// 10 Hz below 1 kHz and multiples of 1 kHz up to 100 kHz; model tables
    /// only produce firmware step values.
    SetCalibrationFrequency { hz: u32 },
    StartSampling,
    StopSampling,
}

impl ControlCommand {
    /// Packs the command into its fixed two-byte wire form.
    pub fn encode(&self) -> [u8; COMMAND_PACKET_LEN] {
        match *self {
            ControlCommand::SetChannelGain {
                channel,
                hw_gain_id,
            } => [codes::GAIN_CH1 + channel.index() as u8, hw_gain_id],
            ControlCommand::SetSampleRate { device_id } => [codes::SAMPLE_RATE, device_id],
            ControlCommand::SetChannelCount { count } => [codes::CHANNEL_COUNT, count],
            ControlCommand::SetCoupling { ac_mask } => [codes::COUPLING, ac_mask],
            ControlCommand::SetCalibrationFrequency { hz } => {
                [codes::CALIBRATION_FREQ, encode_calibration_freq(hz)]
            }
            ControlCommand::StartSampling => [codes::RUN, 0x01],
            ControlCommand::StopSampling => [codes::RUN, 0x00],
        }
    }

    /// Recovers a command from its wire form.
    pub fn decode(packet: [u8; COMMAND_PACKET_LEN]) -> Result<Self, ProtocolError> {
        let [code, payload] = packet;
        match code {
            codes::GAIN_CH1 => Ok(ControlCommand::SetChannelGain {
                channel: ScopeChannel::Ch1,
                hw_gain_id: payload,
            }),
            codes::GAIN_CH2 => Ok(ControlCommand::SetChannelGain {
                channel: ScopeChannel::Ch2,
                hw_gain_id: payload,
            }),
            codes::SAMPLE_RATE => Ok(ControlCommand::SetSampleRate { device_id: payload }),
            codes::RUN => match payload {
                0x00 => Ok(ControlCommand::StopSampling),
                0x01 => Ok(ControlCommand::StartSampling),
                _ => Err(ProtocolError::InvalidPayload { code, payload }),
            },
            codes::CHANNEL_COUNT => Ok(ControlCommand::SetChannelCount { count: payload }),
            codes::COUPLING => Ok(ControlCommand::SetCoupling { ac_mask: payload }),
            codes::CALIBRATION_FREQ => {
                let hz = decode_calibration_freq(payload)
                    .ok_or(ProtocolError::InvalidPayload { code, payload })?;
                Ok(ControlCommand::SetCalibrationFrequency { hz })
            }
            _ => Err(ProtocolError::UnknownCommandCode { code }),
        }
    }

    /// True for the run-control pair, false for configuration commands.
    pub fn is_run_control(&self) -> bool {
        matches!(
            self,
            ControlCommand::StartSampling | ControlCommand::StopSampling
        )
    }
}

fn encode_calibration_freq(hz: u32) -> u8 {
    if hz < 1_000 {
        (100 + hz / 10) as u8
    } else {
        (hz / 1_000).min(100) as u8
    }
}

fn decode_calibration_freq(byte: u8) -> Option<u32> {
    match byte {
        0 => None,
        b if b > 100 => Some((b as u32 - 100) * 10),
        b => Some(b as u32 * 1_000),
    }
}
