// src/config/mod.rs
//! User-facing configuration tree and the per-cycle capture snapshot
//!
//! `ScopeConfig` and `PostProcessingConfig` are the serde-backed structures
//! callers edit. Validation happens against a `ModelSpec` before anything
//! reaches hardware; the engine itself only ever sees a `CaptureSnapshot`,
//! a validated, versioned, immutable copy built at the safe point.

pub mod calibration;
pub mod constants;
pub mod loader;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::{Coupling, FixedRateEntry, ModelSpec, SpecError, TriggerMode, TriggerSlope};

pub use calibration::{CalibrationData, CalibrationError};
pub use loader::ConfigLoader;

/// Rejections raised before any hardware command is issued.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no channel is enabled")]
    NoChannelsEnabled,

    #[error("configuration describes {configured} channels, model has {supported}")]
    ChannelCountMismatch { configured: usize, supported: usize },

    #[error("channel {channel}: gain index {index} out of range ({count} steps)")]
    GainIndexOutOfRange {
        channel: usize,
        index: usize,
        count: usize,
    },

    #[error("channel {channel}: model has no AC coupling")]
    AcCouplingUnsupported { channel: usize },

    #[error("rate {rate_hz} S/s exceeds the {active_channels}-channel limit of {limit_hz} S/s")]
    RateAboveChannelLimit {
        rate_hz: f64,
        limit_hz: f64,
        active_channels: usize,
    },

    #[error("record length {requested} unsupported (model offers {supported:?})")]
    UnsupportedRecordLength {
        requested: usize,
        supported: Vec<usize>,
    },

    #[error("trigger source {channel} out of range ({count} channels)")]
    TriggerSourceOutOfRange { channel: usize, count: usize },

    #[error("trigger source {channel} is disabled")]
    TriggerSourceDisabled { channel: usize },

    #[error("trigger position {position} outside [0, 1]")]
    TriggerPositionOutOfRange { position: f64 },

    #[error("trigger mode {mode:?} unsupported by this model")]
    TriggerModeUnsupported { mode: TriggerMode },

    #[error("calibration output frequency must be non-zero")]
    ZeroCalibrationFrequency,

    #[error("spectrum size {size} is not a power of two")]
    SpectrumSizeNotPowerOfTwo { size: usize },

    #[error("math source {channel} out of range ({count} channels)")]
    MathSourceOutOfRange { channel: usize, count: usize },

    #[error("time per division must be positive, got {value}")]
    NonPositiveTimePerDiv { value: f64 },

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("configuration load failed: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// How raw samples collapse to the effective rate when the fixed-rate
/// entry carries a downsampling factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownsamplingPolicy {
    /// Mean of each factor-sized group, trading bandwidth for noise.
    Average,
    /// Every Nth raw sample kept as-is.
    Decimate,
}

/// Per-channel acquisition settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "defaults::channel_enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::gain_index")]
    pub gain_index: usize,

    #[serde(default = "defaults::coupling")]
    pub coupling: Coupling,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::channel_enabled(),
            gain_index: defaults::gain_index(),
            coupling: defaults::coupling(),
        }
    }
}

/// Trigger condition and delivery policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "defaults::trigger_mode")]
    pub mode: TriggerMode,

    #[serde(default = "defaults::trigger_slope")]
    pub slope: TriggerSlope,

    #[serde(default = "defaults::trigger_level")]
    pub level_volts: f64,

    /// Channel index the trigger condition is evaluated on.
    #[serde(default = "defaults::trigger_source")]
    pub source: usize,

    /// Pre-trigger share of the output record, 0 = trigger at start.
    #[serde(default = "defaults::trigger_position")]
    pub position: f64,

    /// AUTO mode free-runs after this long without a trigger.
    #[serde(default = "defaults::auto_timeout_ms")]
    pub auto_timeout_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            mode: defaults::trigger_mode(),
            slope: defaults::trigger_slope(),
            level_volts: defaults::trigger_level(),
            source: defaults::trigger_source(),
            position: defaults::trigger_position(),
            auto_timeout_ms: defaults::auto_timeout_ms(),
        }
    }
}

/// Complete acquisition-side configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default = "defaults::channels")]
    pub channels: Vec<ChannelConfig>,

    #[serde(default = "defaults::sample_rate_hz")]
    pub sample_rate_hz: f64,

    /// Samples per channel per acquisition.
    #[serde(default = "defaults::record_length")]
    pub record_length: usize,

    #[serde(default = "defaults::downsampling")]
    pub downsampling: DownsamplingPolicy,

    #[serde(default)]
    pub trigger: TriggerConfig,

    #[serde(default = "defaults::calibration_frequency_hz")]
    pub calibration_frequency_hz: u32,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            channels: defaults::channels(),
            sample_rate_hz: defaults::sample_rate_hz(),
            record_length: defaults::record_length(),
            downsampling: defaults::downsampling(),
            trigger: TriggerConfig::default(),
            calibration_frequency_hz: defaults::calibration_frequency_hz(),
        }
    }
}

impl ScopeConfig {
    pub fn active_channels(&self) -> usize {
        self.channels.iter().filter(|c| c.enabled).count()
    }

    /// Indices of enabled channels in ascending order.
    pub fn active_channel_indices(&self) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.enabled)
            .map(|(i, _)| i)
            .collect()
    }

    /// Channels the bulk stream interleaves. The hardware can only stream
    /// a prefix of its channels, so enabling channel 2 alone still streams
    /// both and conversion skips the unused slot.
    pub fn stream_channel_count(&self) -> usize {
        self.channels
            .iter()
            .rposition(|c| c.enabled)
            .map_or(0, |i| i + 1)
    }

    /// Checks the whole configuration against a model. Runs before any
    /// command is queued, so an accepted configuration always applies.
    pub fn validate(&self, spec: &ModelSpec) -> Result<(), ConfigError> {
        if self.channels.len() != spec.channel_count {
            return Err(ConfigError::ChannelCountMismatch {
                configured: self.channels.len(),
                supported: spec.channel_count,
            });
        }
        let active = self.active_channels();
        if active == 0 {
            return Err(ConfigError::NoChannelsEnabled);
        }

        for (channel, config) in self.channels.iter().enumerate() {
            if config.gain_index >= spec.gain_steps.len() {
                return Err(ConfigError::GainIndexOutOfRange {
                    channel,
                    index: config.gain_index,
                    count: spec.gain_steps.len(),
                });
            }
            if config.coupling == Coupling::Ac && !spec.has_ac_coupling {
                return Err(ConfigError::AcCouplingUnsupported { channel });
            }
        }

        let entry = spec.lookup_rate(self.sample_rate_hz)?;
        let limit = spec.max_rate_hz(active);
        if entry.rate_hz > limit {
            return Err(ConfigError::RateAboveChannelLimit {
                rate_hz: entry.rate_hz,
                limit_hz: limit,
                active_channels: active,
            });
        }

        if !spec.record_lengths.contains(&self.record_length) {
            return Err(ConfigError::UnsupportedRecordLength {
                requested: self.record_length,
                supported: spec.record_lengths.clone(),
            });
        }

        if !spec.trigger_modes.contains(&self.trigger.mode) {
            return Err(ConfigError::TriggerModeUnsupported {
                mode: self.trigger.mode,
            });
        }
        if self.trigger.source >= spec.channel_count {
            return Err(ConfigError::TriggerSourceOutOfRange {
                channel: self.trigger.source,
                count: spec.channel_count,
            });
        }
        if self.trigger.mode != TriggerMode::Roll && !self.channels[self.trigger.source].enabled {
            return Err(ConfigError::TriggerSourceDisabled {
                channel: self.trigger.source,
            });
        }
        if !(0.0..=1.0).contains(&self.trigger.position) {
            return Err(ConfigError::TriggerPositionOutOfRange {
                position: self.trigger.position,
            });
        }

        if self.calibration_frequency_hz == 0 {
            return Err(ConfigError::ZeroCalibrationFrequency);
        }

        Ok(())
    }
}

/// Derived math-channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MathConfig {
    #[serde(default = "defaults::disabled")]
    pub enabled: bool,

    #[serde(default = "defaults::math_mode")]
    pub mode: MathMode,

    #[serde(default = "defaults::math_source_a")]
    pub source_a: usize,

    #[serde(default = "defaults::math_source_b")]
    pub source_b: usize,

    #[serde(default = "defaults::unit_scale")]
    pub scale_a: f64,

    #[serde(default = "defaults::unit_scale")]
    pub scale_b: f64,
}

impl Default for MathConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::disabled(),
            mode: defaults::math_mode(),
            source_a: defaults::math_source_a(),
            source_b: defaults::math_source_b(),
            scale_a: defaults::unit_scale(),
            scale_b: defaults::unit_scale(),
        }
    }
}

/// Sample-by-sample combination applied by the math stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathMode {
    Add,
    Subtract,
    Multiply,
}

/// Window applied before the frequency transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Rectangular,
    Hamming,
    Hann,
    Blackman,
    Kaiser,
}

/// Spectrum-stage settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumConfig {
    #[serde(default = "defaults::disabled")]
    pub enabled: bool,

    #[serde(default = "defaults::window")]
    pub window: WindowKind,

    /// Transform length; input is truncated or zero-padded to this.
    #[serde(default = "defaults::spectrum_size")]
    pub size: usize,

    #[serde(default = "defaults::disabled")]
    pub include_phase: bool,

    /// Shape parameter when `window` is Kaiser.
    #[serde(default = "defaults::kaiser_beta")]
    pub kaiser_beta: f64,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::disabled(),
            window: defaults::window(),
            size: defaults::spectrum_size(),
            include_phase: defaults::disabled(),
            kaiser_beta: defaults::kaiser_beta(),
        }
    }
}

/// Display-graph stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::time_per_div_s")]
    pub time_per_div_s: f64,

    /// Vertical offset per channel in divisions; missing entries are zero.
    #[serde(default)]
    pub offset_divs: Vec<f64>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            time_per_div_s: defaults::time_per_div_s(),
            offset_divs: Vec::new(),
        }
    }
}

/// Raw-export tap settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "defaults::disabled")]
    pub enabled: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::disabled(),
        }
    }
}

/// Settings for the whole post-processing chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessingConfig {
    pub export: ExportConfig,
    pub math: MathConfig,
    pub spectrum: SpectrumConfig,
    pub graph: GraphConfig,
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            export: ExportConfig::default(),
            math: MathConfig::default(),
            spectrum: SpectrumConfig::default(),
            graph: GraphConfig::default(),
        }
    }
}

impl PostProcessingConfig {
    pub fn validate(&self, scope: &ScopeConfig) -> Result<(), ConfigError> {
        if self.spectrum.enabled && !self.spectrum.size.is_power_of_two() {
            return Err(ConfigError::SpectrumSizeNotPowerOfTwo {
                size: self.spectrum.size,
            });
        }
        if self.math.enabled {
            let count = scope.channels.len();
            for channel in [self.math.source_a, self.math.source_b] {
                if channel >= count {
                    return Err(ConfigError::MathSourceOutOfRange { channel, count });
                }
            }
        }
        if self.graph.enabled && self.graph.time_per_div_s <= 0.0 {
            return Err(ConfigError::NonPositiveTimePerDiv {
                value: self.graph.time_per_div_s,
            });
        }
        Ok(())
    }
}

/// Top-level file layout the loader reads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DsoConfig {
    pub scope: ScopeConfig,
    pub post: PostProcessingConfig,
    /// Optional calibration file, resolved relative to the config file.
    pub calibration_file: Option<PathBuf>,
}

/// Validated, versioned configuration the engine captures with. Built at
/// the safe point and passed by `Arc` alongside every frame, so every
/// downstream consumer sees exactly the settings the frame was captured
/// under.
#[derive(Debug, Clone)]
pub struct CaptureSnapshot {
    /// Monotonic configuration version, bumped per accepted change.
    pub version: u64,
    pub scope: ScopeConfig,
    pub rate_entry: FixedRateEntry,
    /// Rate of the delivered samples after downsampling.
    pub effective_rate_hz: f64,
    /// Rate the hardware captures at.
    pub raw_rate_hz: f64,
    pub calibration: Arc<CalibrationData>,
}

impl CaptureSnapshot {
    /// Resolves the configured rate against the model and freezes the
    /// result. The config must already have passed `validate`.
    pub fn build(
        version: u64,
        scope: ScopeConfig,
        spec: &ModelSpec,
        calibration: Arc<CalibrationData>,
    ) -> Result<Self, ConfigError> {
        let rate_entry = spec.lookup_rate(scope.sample_rate_hz)?;
        Ok(Self {
            version,
            scope,
            rate_entry,
            effective_rate_hz: rate_entry.rate_hz,
            raw_rate_hz: rate_entry.raw_rate_hz(),
            calibration,
        })
    }

    /// Seconds between delivered samples.
    pub fn sample_interval(&self) -> f64 {
        1.0 / self.effective_rate_hz
    }

    /// Wall-clock duration of one record at the effective rate.
    pub fn record_duration(&self) -> Duration {
        Duration::from_secs_f64(self.scope.record_length as f64 * self.sample_interval())
    }
}

/// Default value providers backed by the constants module.
mod defaults {
    use super::constants::timing;
    use super::{ChannelConfig, DownsamplingPolicy, MathMode, WindowKind};
    use crate::spec::{Coupling, TriggerMode, TriggerSlope};

    pub fn channels() -> Vec<ChannelConfig> {
        vec![ChannelConfig::default(), ChannelConfig::default()]
    }
    pub fn channel_enabled() -> bool {
        true
    }
    pub fn gain_index() -> usize {
        5
    }
    pub fn coupling() -> Coupling {
        Coupling::Dc
    }
    pub fn sample_rate_hz() -> f64 {
        1e6
    }
    pub fn record_length() -> usize {
        20_000
    }
    pub fn downsampling() -> DownsamplingPolicy {
        DownsamplingPolicy::Average
    }
    pub fn calibration_frequency_hz() -> u32 {
        1_000
    }

    pub fn trigger_mode() -> TriggerMode {
        TriggerMode::Auto
    }
    pub fn trigger_slope() -> TriggerSlope {
        TriggerSlope::Rising
    }
    pub fn trigger_level() -> f64 {
        0.0
    }
    pub fn trigger_source() -> usize {
        0
    }
    pub fn trigger_position() -> f64 {
        0.5
    }
    pub fn auto_timeout_ms() -> u64 {
        timing::AUTO_TRIGGER_TIMEOUT_MS
    }

    pub fn enabled() -> bool {
        true
    }
    pub fn disabled() -> bool {
        false
    }
    pub fn math_mode() -> MathMode {
        MathMode::Subtract
    }
    pub fn math_source_a() -> usize {
        0
    }
    pub fn math_source_b() -> usize {
        1
    }
    pub fn unit_scale() -> f64 {
        1.0
    }
    pub fn window() -> WindowKind {
        WindowKind::Hann
    }
    pub fn spectrum_size() -> usize {
        1_024
    }
    pub fn kaiser_beta() -> f64 {
        8.6
    }
    pub fn time_per_div_s() -> f64 {
        2e-3
    }
}
