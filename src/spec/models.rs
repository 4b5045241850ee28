// src/spec/models.rs
//! Built-in model tables and the registry that resolves identities
//!
//! Tables carry hardware truth and nothing derives them at runtime. The
//! voltage-scale rows are per-channel because units of the same model can
//! be trimmed differently in production; the built-in rows start identical
//! and calibration moves individual entries later.

use tracing::debug;

use super::{
    Coupling, DeviceIdentity, FixedRateEntry, GainStep, ModelSpec, RateLimits, SpecError,
    TriggerMode,
};

const ISDS205B_VENDOR_ID: u16 = 0x1d50;
const ISDS205B_PRODUCT_ID: u16 = 0x608e;
const ISDS205B_UNFLASHED: (u16, u16) = (0xd4a2, 0x5661);
const ISDS205B_MIN_FIRMWARE: u16 = 0x0005;

/// Instrustar ISDS205B: 2 channels, 48 MS/s, 8-bit, no calibration EEPROM.
pub fn isds205b() -> ModelSpec {
    ModelSpec {
        name: "ISDS205B".to_string(),
        vendor_id: ISDS205B_VENDOR_ID,
        product_id: ISDS205B_PRODUCT_ID,
        min_firmware_version: ISDS205B_MIN_FIRMWARE,
        unflashed_identity: Some(ISDS205B_UNFLASHED),
        channel_count: 2,
        adc_zero_code: 0x80,
        bytes_per_sample: 1,
        gain_steps: vec![
            GainStep { hw_gain_id: 10, volts_per_div: 0.02 },
            GainStep { hw_gain_id: 10, volts_per_div: 0.05 },
            GainStep { hw_gain_id: 10, volts_per_div: 0.10 },
            GainStep { hw_gain_id: 5, volts_per_div: 0.20 },
            GainStep { hw_gain_id: 2, volts_per_div: 0.50 },
            GainStep { hw_gain_id: 1, volts_per_div: 1.00 },
            GainStep { hw_gain_id: 1, volts_per_div: 2.00 },
            GainStep { hw_gain_id: 1, volts_per_div: 5.00 },
        ],
        voltage_scale: vec![
            vec![1276.0, 1276.0, 1276.0, 90.0, 37.0, 21.5, 21.5, 21.5],
            vec![1276.0, 1276.0, 1276.0, 90.0, 37.0, 21.5, 21.5, 21.5],
        ],
        single_channel: RateLimits {
            base_rate_hz: 1e6,
            max_rate_hz: 30e6,
        },
        dual_channel: RateLimits {
            base_rate_hz: 1e6,
            max_rate_hz: 15e6,
        },
        record_lengths: vec![20_000],
        // Effective rates; the 8 MS/s step is captured at 24 MS/s and
        // downsampled by 3 because the ADC has no native 8 MS/s clock.
        fixed_rates: vec![
            FixedRateEntry { rate_hz: 100e3, device_id: 10, downsampling: 1 },
            FixedRateEntry { rate_hz: 200e3, device_id: 20, downsampling: 1 },
            FixedRateEntry { rate_hz: 500e3, device_id: 50, downsampling: 1 },
            FixedRateEntry { rate_hz: 1e6, device_id: 1, downsampling: 1 },
            FixedRateEntry { rate_hz: 2e6, device_id: 8, downsampling: 4 },
            FixedRateEntry { rate_hz: 4e6, device_id: 4, downsampling: 1 },
            FixedRateEntry { rate_hz: 8e6, device_id: 24, downsampling: 3 },
            FixedRateEntry { rate_hz: 16e6, device_id: 16, downsampling: 1 },
            FixedRateEntry { rate_hz: 24e6, device_id: 24, downsampling: 1 },
            FixedRateEntry { rate_hz: 30e6, device_id: 30, downsampling: 1 },
            FixedRateEntry { rate_hz: 48e6, device_id: 48, downsampling: 1 },
        ],
        raw_rates_hz: vec![
            20e3, 40e3, 50e3, 64e3, 100e3, 200e3, 400e3, 500e3, 1e6, 2e6, 3e6, 4e6, 5e6, 6e6,
            8e6, 10e6, 12e6, 15e6, 16e6, 24e6, 30e6, 48e6,
        ],
        couplings: vec![Coupling::Dc, Coupling::Ac],
        trigger_modes: vec![
            TriggerMode::Auto,
            TriggerMode::Normal,
            TriggerMode::Single,
            TriggerMode::Roll,
        ],
        calibration_freq_steps_hz: vec![100, 1_000, 10_000, 25_000],
        has_ac_coupling: true,
        has_calibration_eeprom: false,
        unreliable_leading_samples: 2_048 + 480,
    }
}

/// Synthetic model backing the demo transport. Small tables, identity 0:0.
pub fn demo() -> ModelSpec {
    ModelSpec {
        name: "demo".to_string(),
        vendor_id: 0x0000,
        product_id: 0x0000,
        min_firmware_version: 0,
        unflashed_identity: None,
        channel_count: 2,
        adc_zero_code: 0x80,
        bytes_per_sample: 1,
        gain_steps: vec![
            GainStep { hw_gain_id: 10, volts_per_div: 0.02 },
            GainStep { hw_gain_id: 10, volts_per_div: 0.05 },
            GainStep { hw_gain_id: 10, volts_per_div: 0.10 },
            GainStep { hw_gain_id: 5, volts_per_div: 0.20 },
            GainStep { hw_gain_id: 2, volts_per_div: 0.50 },
            GainStep { hw_gain_id: 1, volts_per_div: 1.00 },
            GainStep { hw_gain_id: 1, volts_per_div: 2.00 },
            GainStep { hw_gain_id: 1, volts_per_div: 5.00 },
        ],
        voltage_scale: vec![
            vec![1280.0, 1280.0, 1280.0, 160.0, 64.0, 25.6, 25.6, 25.6],
            vec![1280.0, 1280.0, 1280.0, 160.0, 64.0, 25.6, 25.6, 25.6],
        ],
        single_channel: RateLimits {
            base_rate_hz: 1e6,
            max_rate_hz: 8e6,
        },
        dual_channel: RateLimits {
            base_rate_hz: 1e6,
            max_rate_hz: 8e6,
        },
        record_lengths: vec![1_024, 2_048, 10_240, 20_000],
        fixed_rates: vec![
            FixedRateEntry { rate_hz: 100e3, device_id: 10, downsampling: 1 },
            FixedRateEntry { rate_hz: 500e3, device_id: 2, downsampling: 4 },
            FixedRateEntry { rate_hz: 1e6, device_id: 1, downsampling: 1 },
            FixedRateEntry { rate_hz: 2e6, device_id: 2, downsampling: 1 },
            FixedRateEntry { rate_hz: 4e6, device_id: 4, downsampling: 1 },
            FixedRateEntry { rate_hz: 8e6, device_id: 8, downsampling: 1 },
        ],
        raw_rates_hz: vec![100e3, 1e6, 2e6, 4e6, 8e6],
        couplings: vec![Coupling::Dc, Coupling::Ac],
        trigger_modes: vec![
            TriggerMode::Auto,
            TriggerMode::Normal,
            TriggerMode::Single,
            TriggerMode::Roll,
        ],
        calibration_freq_steps_hz: vec![100, 1_000, 10_000, 25_000],
        has_ac_coupling: true,
        has_calibration_eeprom: false,
        unreliable_leading_samples: 0,
    }
}

/// All models this build knows about, with identity resolution.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
    fallback: usize,
}

impl ModelRegistry {
    /// Builds the registry from the built-in tables, validating each.
    pub fn new() -> Result<Self, SpecError> {
        let models = vec![isds205b(), demo()];
        for model in &models {
            model.validate()?;
            debug!(
                model = %model.name,
                gain_steps = model.gain_steps.len(),
                fixed_rates = model.fixed_rates.len(),
                "registered model"
            );
        }
        let fallback = models
            .iter()
            .position(|m| m.name == "demo")
            .unwrap_or(models.len() - 1);
        Ok(Self { models, fallback })
    }

    /// The built-in registry. The tables are compile-time constants checked
    /// by tests, so construction cannot fail in a shipped build.
    pub fn builtin() -> Self {
        Self::new().expect("builtin model tables are valid")
    }

    /// Resolves a device identity to its model table.
    pub fn lookup(&self, identity: &DeviceIdentity) -> Result<&ModelSpec, SpecError> {
        if let Some(model) = self.models.iter().find(|m| m.matches(identity)) {
            return Ok(model);
        }
        if let Some(model) = self.models.iter().find(|m| m.matches_unflashed(identity)) {
            return Err(SpecError::NeedsFirmware {
                identity: *identity,
                model: model.name.clone(),
            });
        }
        if let Some(model) = self.models.iter().find(|m| {
            m.vendor_id == identity.vendor_id && m.product_id == identity.product_id
        }) {
            return Err(SpecError::FirmwareTooOld {
                identity: *identity,
                model: model.name.clone(),
                required: model.min_firmware_version,
            });
        }
        Err(SpecError::NoMatchingModel {
            identity: *identity,
        })
    }

    /// Model used when no physical device is present.
    pub fn fallback(&self) -> &ModelSpec {
        &self.models[self.fallback]
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }
}
