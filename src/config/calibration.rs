// src/config/calibration.rs
//! Per-unit calibration corrections and their persistence
//!
//! Calibration shifts the ADC zero code and trims the gain factor per
//! channel and gain step. Corrections come from one of three places: the
//! model defaults (no correction), an EEPROM dump on models that have one,
//! or a TOML file written by a previous calibration run. The file carries
//! a CRC32 footer over its body so a truncated or hand-edited file is
//! rejected instead of silently skewing every sample.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::spec::ModelSpec;

const CHECKSUM_PREFIX: &str = "# crc32 ";

/// Gain trim encoding used by EEPROM dumps: 128 means exactly 1.0.
const EEPROM_GAIN_CENTER: f64 = 128.0;
const EEPROM_GAIN_DIVISOR: f64 = 500.0;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("calibration file malformed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("calibration serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("calibration file has no checksum footer")]
    MissingChecksum,

    #[error("calibration checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("calibration file is for model '{file}', device is '{model}'")]
    ModelMismatch { file: String, model: String },

    #[error("calibration tables sized {channels}x{gains}, model needs {want_channels}x{want_gains}")]
    ShapeMismatch {
        channels: usize,
        gains: usize,
        want_channels: usize,
        want_gains: usize,
    },

    #[error("eeprom dump too short: {got} bytes, need at least {needed}")]
    EepromTooShort { needed: usize, got: usize },
}

/// Per-unit correction tables, indexed `[channel][gain_index]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub model: String,
    /// ADC code that reads as zero volts.
    pub zero_code: Vec<Vec<f64>>,
    /// Multiplier applied after scale conversion, 1.0 = no trim.
    pub gain_factor: Vec<Vec<f64>>,
}

impl CalibrationData {
    /// Identity calibration sized for one model.
    pub fn for_model(spec: &ModelSpec) -> Self {
        let gains = spec.gain_steps.len();
        Self {
            model: spec.name.clone(),
            zero_code: vec![vec![f64::from(spec.adc_zero_code); gains]; spec.channel_count],
            gain_factor: vec![vec![1.0; gains]; spec.channel_count],
        }
    }

    /// Parses an EEPROM dump: one zero-offset byte per `[gain][channel]`
    /// cell, optionally followed by one gain-trim byte per cell. Bytes
    /// 0 and 255 mean "unprogrammed" and keep the default.
    pub fn from_eeprom_bytes(spec: &ModelSpec, bytes: &[u8]) -> Result<Self, CalibrationError> {
        let gains = spec.gain_steps.len();
        let cells = gains * spec.channel_count;
        if bytes.len() < cells {
            return Err(CalibrationError::EepromTooShort {
                needed: cells,
                got: bytes.len(),
            });
        }

        let mut data = Self::for_model(spec);
        for gain in 0..gains {
            for channel in 0..spec.channel_count {
                let byte = bytes[gain * spec.channel_count + channel];
                if byte != 0 && byte != 255 {
                    data.zero_code[channel][gain] = f64::from(byte);
                }
            }
        }
        if bytes.len() >= 2 * cells {
            for gain in 0..gains {
                for channel in 0..spec.channel_count {
                    let byte = bytes[cells + gain * spec.channel_count + channel];
                    if byte != 0 && byte != 255 {
                        data.gain_factor[channel][gain] =
                            1.0 + (f64::from(byte) - EEPROM_GAIN_CENTER) / EEPROM_GAIN_DIVISOR;
                    }
                }
            }
        }
        Ok(data)
    }

    /// Loads and verifies a calibration file for the given model.
    pub fn load_file(path: &Path, spec: &ModelSpec) -> Result<Self, CalibrationError> {
        let text = std::fs::read_to_string(path)?;
        let (body, stored) = split_checksum(&text)?;
        let computed = crc32fast::hash(body.as_bytes());
        if stored != computed {
            return Err(CalibrationError::ChecksumMismatch { stored, computed });
        }

        let data: Self = toml::from_str(body)?;
        if data.model != spec.name {
            return Err(CalibrationError::ModelMismatch {
                file: data.model,
                model: spec.name.clone(),
            });
        }
        data.check_shape(spec)?;
        info!(path = %path.display(), model = %data.model, "loaded calibration file");
        Ok(data)
    }

    /// Writes the tables with a CRC32 footer line.
    pub fn save_file(&self, path: &Path) -> Result<(), CalibrationError> {
        let body = toml::to_string_pretty(self)?;
        let checksum = crc32fast::hash(body.as_bytes());
        let text = format!("{body}{CHECKSUM_PREFIX}{checksum:#010x}\n");
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn zero_code(&self, channel: usize, gain_index: usize) -> Option<f64> {
        self.zero_code.get(channel)?.get(gain_index).copied()
    }

    pub fn gain_factor(&self, channel: usize, gain_index: usize) -> Option<f64> {
        self.gain_factor.get(channel)?.get(gain_index).copied()
    }

    /// Wraps identity calibration for sharing across threads.
    pub fn shared_default(spec: &ModelSpec) -> Arc<Self> {
        Arc::new(Self::for_model(spec))
    }

    fn check_shape(&self, spec: &ModelSpec) -> Result<(), CalibrationError> {
        let gains = spec.gain_steps.len();
        let rows_ok = self.zero_code.len() == spec.channel_count
            && self.gain_factor.len() == spec.channel_count;
        let cols_ok = self
            .zero_code
            .iter()
            .chain(self.gain_factor.iter())
            .all(|row| row.len() == gains);
        if rows_ok && cols_ok {
            Ok(())
        } else {
            Err(CalibrationError::ShapeMismatch {
                channels: self.zero_code.len(),
                gains: self.zero_code.first().map_or(0, Vec::len),
                want_channels: spec.channel_count,
                want_gains: gains,
            })
        }
    }
}

fn split_checksum(text: &str) -> Result<(&str, u32), CalibrationError> {
    let trimmed = text.trim_end();
    let footer_start = trimmed
        .rfind(CHECKSUM_PREFIX)
        .ok_or(CalibrationError::MissingChecksum)?;
    let (body, footer) = trimmed.split_at(footer_start);
    let value = footer[CHECKSUM_PREFIX.len()..].trim();
    let value = value.strip_prefix("0x").unwrap_or(value);
    let stored = u32::from_str_radix(value, 16).map_err(|_| CalibrationError::MissingChecksum)?;
    Ok((body, stored))
}
