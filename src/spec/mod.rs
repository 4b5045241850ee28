// src/spec/mod.rs
//! Per-model hardware capability tables
//!
//! A `ModelSpec` is the immutable record of what one scope model can do:
//! gain steps, raw-to-volt scaling, fixed sample rates with their
//! downsampling factors, couplings, trigger modes and calibration output
//! steps. It is built once at registration time, validated, and shared by
//! `Arc` for the life of the session. Command construction and sample
//! conversion are both parametrized by it.

pub mod models;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use models::ModelRegistry;

/// Input coupling selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coupling {
    Dc,
    Ac,
}

/// Trigger operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Trigger normally, free-run after a timeout without trigger events.
    Auto,
    /// Deliver only triggered acquisitions.
    Normal,
    /// Deliver the first triggered acquisition, then stop sampling.
    Single,
    /// Continuous streaming, trigger search bypassed.
    Roll,
}

/// Trigger edge direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSlope {
    Rising,
    Falling,
}

/// USB identity of a connected device, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub firmware_version: u16,
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} fw {:#06x}",
            self.vendor_id, self.product_id, self.firmware_version
        )
    }
}

/// One gain step: the hardware gain selector and the screen scale it maps to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainStep {
    /// Selector byte the firmware understands.
    pub hw_gain_id: u8,
    /// Volts per screen division at this step.
    pub volts_per_div: f64,
}

/// One fixed sample-rate entry of the model's rate table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedRateEntry {
    /// Effective output rate after downsampling.
    pub rate_hz: f64,
    /// Selector byte the firmware understands.
    pub device_id: u8,
    /// Raw samples consumed per output sample (1 = none).
    pub downsampling: u32,
}

impl FixedRateEntry {
    /// Rate the hardware captures at before downsampling.
    pub fn raw_rate_hz(&self) -> f64 {
        self.rate_hz * self.downsampling as f64
    }
}

/// Sample-rate limits for one channel mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimits {
    pub base_rate_hz: f64,
    pub max_rate_hz: f64,
}

/// Errors from specification construction and lookup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpecError {
    #[error("model '{model}': {what} table is empty")]
    EmptyTable { model: String, what: &'static str },

    #[error("model '{model}': gain table has {gain_steps} steps but channel {channel} scale row has {scale_entries}")]
    TableLengthMismatch {
        model: String,
        channel: usize,
        gain_steps: usize,
        scale_entries: usize,
    },

    #[error("model '{model}': voltage scale table has {rows} rows for {channels} channels")]
    ScaleRowCount {
        model: String,
        rows: usize,
        channels: usize,
    },

    #[error("model '{model}': gain steps not ordered ascending at step {index}")]
    UnsortedGainSteps { model: String, index: usize },

    #[error("model '{model}': fixed-rate list not sorted strictly ascending at entry {index}")]
    UnsortedRates { model: String, index: usize },

    #[error("model '{model}': entry {index} implies fractional raw rate {raw_hz} S/s")]
    FractionalRawRate {
        model: String,
        index: usize,
        raw_hz: f64,
    },

    #[error("model '{model}': entry {index} raw rate {raw_hz} S/s is outside the raw-rate domain")]
    RawRateNotInDomain {
        model: String,
        index: usize,
        raw_hz: f64,
    },

    #[error("no fixed rate within tolerance of {requested_hz} S/s (nearest is {nearest_hz} S/s)")]
    UnsupportedRate { requested_hz: f64, nearest_hz: f64 },

    #[error("gain index {index} out of range ({count} steps)")]
    GainIndexOutOfRange { index: usize, count: usize },

    #[error("channel {channel} out of range ({count} channels)")]
    ChannelOutOfRange { channel: usize, count: usize },

    #[error("no model matches device {identity}")]
    NoMatchingModel { identity: DeviceIdentity },

    #[error("device {identity} is a '{model}' without firmware loaded")]
    NeedsFirmware {
        identity: DeviceIdentity,
        model: String,
    },

    #[error("device {identity} matches '{model}' but needs firmware {required:#06x} or newer")]
    FirmwareTooOld {
        identity: DeviceIdentity,
        model: String,
        required: u16,
    },
}

/// Requested rates further than this factor from the nearest table entry are
/// rejected instead of snapped.
pub const MAX_RATE_MISMATCH_RATIO: f64 = 4.0;

const RATE_EPSILON_HZ: f64 = 1e-3;

/// Immutable per-model capability table.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    /// USB identity of the flashed device.
    pub vendor_id: u16,
    pub product_id: u16,
    /// Oldest firmware this table is valid for.
    pub min_firmware_version: u16,
    /// Identity the device enumerates with before firmware upload, if any.
    pub unflashed_identity: Option<(u16, u16)>,
    pub channel_count: usize,
    /// ADC code that maps to zero volts.
    pub adc_zero_code: u8,
    pub bytes_per_sample: usize,
    /// Ordered ascending by volts per division.
    pub gain_steps: Vec<GainStep>,
    /// Raw ADC counts per volt, indexed `[channel][gain_index]`.
    pub voltage_scale: Vec<Vec<f64>>,
    pub single_channel: RateLimits,
    pub dual_channel: RateLimits,
    /// Samples per channel the device delivers per acquisition.
    pub record_lengths: Vec<usize>,
    /// Sorted strictly ascending by effective rate.
    pub fixed_rates: Vec<FixedRateEntry>,
    /// Rates the hardware can capture at before downsampling.
    pub raw_rates_hz: Vec<f64>,
    pub couplings: Vec<Coupling>,
    pub trigger_modes: Vec<TriggerMode>,
    /// Calibration output frequencies the firmware accepts.
    pub calibration_freq_steps_hz: Vec<u32>,
    pub has_ac_coupling: bool,
    pub has_calibration_eeprom: bool,
    /// Stream bytes discarded at capture start (hardware startup transient).
    pub unreliable_leading_samples: usize,
}

impl ModelSpec {
    /// Checks every structural invariant of the table. Called at
    /// registration time; a failure here is a defect in the table itself.
    pub fn validate(&self) -> Result<(), SpecError> {
        let model = self.name.clone();

        if self.gain_steps.is_empty() {
            return Err(SpecError::EmptyTable {
                model,
                what: "gain",
            });
        }
        if self.fixed_rates.is_empty() {
            return Err(SpecError::EmptyTable {
                model,
                what: "fixed-rate",
            });
        }
        if self.record_lengths.is_empty() {
            return Err(SpecError::EmptyTable {
                model,
                what: "record-length",
            });
        }
        if self.couplings.is_empty() {
            return Err(SpecError::EmptyTable {
                model,
                what: "coupling",
            });
        }
        if self.trigger_modes.is_empty() {
            return Err(SpecError::EmptyTable {
                model,
                what: "trigger-mode",
            });
        }
        if self.calibration_freq_steps_hz.is_empty() {
            return Err(SpecError::EmptyTable {
                model,
                what: "calibration-step",
            });
        }

        if self.voltage_scale.len() != self.channel_count {
            return Err(SpecError::ScaleRowCount {
                model,
                rows: self.voltage_scale.len(),
                channels: self.channel_count,
            });
        }
        for (channel, row) in self.voltage_scale.iter().enumerate() {
            if row.len() != self.gain_steps.len() {
                return Err(SpecError::TableLengthMismatch {
                    model,
                    channel,
                    gain_steps: self.gain_steps.len(),
                    scale_entries: row.len(),
                });
            }
        }

        for (index, pair) in self.gain_steps.windows(2).enumerate() {
            if pair[1].volts_per_div <= pair[0].volts_per_div {
                return Err(SpecError::UnsortedGainSteps {
                    model,
                    index: index + 1,
                });
            }
        }

        for (index, pair) in self.fixed_rates.windows(2).enumerate() {
            if pair[1].rate_hz <= pair[0].rate_hz {
                return Err(SpecError::UnsortedRates {
                    model,
                    index: index + 1,
                });
            }
        }

        for (index, entry) in self.fixed_rates.iter().enumerate() {
            let raw = entry.raw_rate_hz();
            if raw.fract().abs() > RATE_EPSILON_HZ {
                return Err(SpecError::FractionalRawRate {
                    model,
                    index,
                    raw_hz: raw,
                });
            }
            let in_domain = self
                .raw_rates_hz
                .iter()
                .any(|&r| (r - raw).abs() < RATE_EPSILON_HZ);
            if !in_domain {
                return Err(SpecError::RawRateNotInDomain {
                    model,
                    index,
                    raw_hz: raw,
                });
            }
        }

        Ok(())
    }

    pub fn gain_step(&self, index: usize) -> Result<GainStep, SpecError> {
        self.gain_steps
            .get(index)
            .copied()
            .ok_or(SpecError::GainIndexOutOfRange {
                index,
                count: self.gain_steps.len(),
            })
    }

    /// Raw ADC counts per volt for one channel at one gain step.
    pub fn voltage_scale(&self, channel: usize, gain_index: usize) -> Result<f64, SpecError> {
        let row = self
            .voltage_scale
            .get(channel)
            .ok_or(SpecError::ChannelOutOfRange {
                channel,
                count: self.channel_count,
            })?;
        row.get(gain_index)
            .copied()
            .ok_or(SpecError::GainIndexOutOfRange {
                index: gain_index,
                count: row.len(),
            })
    }

    /// Nearest fixed-rate entry for a requested rate, or `UnsupportedRate`
    /// when the nearest entry is further than the mismatch tolerance.
    pub fn lookup_rate(&self, requested_hz: f64) -> Result<FixedRateEntry, SpecError> {
        let nearest = self
            .fixed_rates
            .iter()
            .min_by(|a, b| {
                let da = rate_distance(a.rate_hz, requested_hz);
                let db = rate_distance(b.rate_hz, requested_hz);
                da.total_cmp(&db)
            })
            .copied()
            .ok_or(SpecError::UnsupportedRate {
                requested_hz,
                nearest_hz: 0.0,
            })?;

        if !requested_hz.is_finite() || requested_hz <= 0.0 {
            return Err(SpecError::UnsupportedRate {
                requested_hz,
                nearest_hz: nearest.rate_hz,
            });
        }

        let ratio = if nearest.rate_hz > requested_hz {
            nearest.rate_hz / requested_hz
        } else {
            requested_hz / nearest.rate_hz
        };
        if ratio > MAX_RATE_MISMATCH_RATIO {
            return Err(SpecError::UnsupportedRate {
                requested_hz,
                nearest_hz: nearest.rate_hz,
            });
        }
        Ok(nearest)
    }

    /// Highest supported effective rate for the given active channel count.
    pub fn max_rate_hz(&self, active_channels: usize) -> f64 {
        if active_channels <= 1 {
            self.single_channel.max_rate_hz
        } else {
            self.dual_channel.max_rate_hz
        }
    }

    /// Snaps an arbitrary calibration frequency to the nearest firmware step.
    pub fn snap_calibration_freq(&self, hz: u32) -> u32 {
        self.calibration_freq_steps_hz
            .iter()
            .copied()
            .min_by_key(|&step| step.abs_diff(hz))
            .unwrap_or(hz)
    }

    /// True when the identity is this model with usable firmware.
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        identity.vendor_id == self.vendor_id
            && identity.product_id == self.product_id
            && identity.firmware_version >= self.min_firmware_version
    }

    /// True when the identity is this model's pre-firmware enumeration.
    pub fn matches_unflashed(&self, identity: &DeviceIdentity) -> bool {
        self.unflashed_identity
            .map(|(vid, pid)| identity.vendor_id == vid && identity.product_id == pid)
            .unwrap_or(false)
    }
}

fn rate_distance(entry_hz: f64, requested_hz: f64) -> f64 {
    (entry_hz - requested_hz).abs()
}
