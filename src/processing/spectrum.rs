// src/processing/spectrum.rs
//! Frequency-domain attachment
//!
//! Windows each channel, runs a forward FFT at the configured power-of-two
//! size (input truncated or zero-padded as needed) and attaches a one-sided
//! amplitude spectrum in dBV. Amplitudes are normalized by the window's
//! coherent gain so a full-scale sine reads its true peak voltage
//! regardless of the window chosen.

use std::f64::consts::TAU;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::config::{PostProcessingConfig, SpectrumConfig, WindowKind};
use crate::samples::{SampleSet, SpectrumTrace};

use super::{PipelineStage, StageError};

/// Readings below this are clamped; keeps log scaling away from -inf.
const DBV_FLOOR: f64 = -120.0;

struct WindowData {
    coefficients: Vec<f64>,
    sum: f64,
}

struct CachedWindow {
    kind: WindowKind,
    size: usize,
    beta: f64,
    data: Arc<WindowData>,
}

pub struct SpectrumStage {
    planner: FftPlanner<f64>,
    cached: Option<CachedWindow>,
}

impl SpectrumStage {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            cached: None,
        }
    }

    /// Window coefficients for the current settings, rebuilt only when the
    /// kind, size or shape parameter changes.
    fn window(&mut self, config: &SpectrumConfig) -> Arc<WindowData> {
        if let Some(cached) = &self.cached {
            if cached.kind == config.window
                && cached.size == config.size
                && (cached.beta - config.kaiser_beta).abs() < f64::EPSILON
            {
                return cached.data.clone();
            }
        }
        let coefficients = window_coefficients(config.window, config.size, config.kaiser_beta);
        let sum: f64 = coefficients.iter().sum();
        let data = Arc::new(WindowData { coefficients, sum });
        self.cached = Some(CachedWindow {
            kind: config.window,
            size: config.size,
            beta: config.kaiser_beta,
            data: data.clone(),
        });
        data
    }
}

impl Default for SpectrumStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for SpectrumStage {
    fn name(&self) -> &'static str {
        "spectrum"
    }

    fn is_enabled(&self, config: &PostProcessingConfig) -> bool {
        config.spectrum.enabled
    }

    fn process(
        &mut self,
        input: &SampleSet,
        config: &PostProcessingConfig,
    ) -> Result<SampleSet, StageError> {
        let settings = &config.spectrum;
        let size = settings.size;
        if !size.is_power_of_two() {
            return Err(StageError::NotPowerOfTwo { size });
        }
        if input.sample_count() == 0 {
            return Err(StageError::EmptySet);
        }

        let window = self.window(settings);
        let fft = self.planner.plan_fft_forward(size);
        let bins = size / 2 + 1;
        let resolution_hz = 1.0 / (input.sample_interval * size as f64);

        let mut output = input.clone();
        for trace in &mut output.channels {
            let mut buffer: Vec<Complex<f64>> = (0..size)
                .map(|i| {
                    let sample = trace.voltage.get(i).copied().unwrap_or(0.0);
                    Complex::new(sample * window.coefficients[i], 0.0)
                })
                .collect();
            fft.process(&mut buffer);

            let mut magnitude_dbv = Vec::with_capacity(bins);
            let mut phase_rad = settings.include_phase.then(|| Vec::with_capacity(bins));
            for (bin, value) in buffer.iter().take(bins).enumerate() {
                // One-sided scaling: interior bins carry both halves.
                let one_sided = if bin == 0 || bin == size / 2 { 1.0 } else { 2.0 };
                let amplitude = one_sided * value.norm() / window.sum;
                let dbv = if amplitude > 0.0 {
                    (20.0 * amplitude.log10()).max(DBV_FLOOR)
                } else {
                    DBV_FLOOR
                };
                magnitude_dbv.push(dbv);
                if let Some(phase) = phase_rad.as_mut() {
                    phase.push(value.arg());
                }
            }

            trace.spectrum = Some(SpectrumTrace {
                magnitude_dbv: Arc::new(magnitude_dbv),
                phase_rad: phase_rad.map(Arc::new),
                resolution_hz,
            });
        }
        Ok(output)
    }
}

fn window_coefficients(kind: WindowKind, size: usize, beta: f64) -> Vec<f64> {
    let denom = size.saturating_sub(1).max(1) as f64;
    match kind {
        WindowKind::Rectangular => vec![1.0; size],
        WindowKind::Hamming => (0..size)
            .map(|i| 0.54 - 0.46 * (TAU * i as f64 / denom).cos())
            .collect(),
        WindowKind::Hann => (0..size)
            .map(|i| 0.5 * (1.0 - (TAU * i as f64 / denom).cos()))
            .collect(),
        WindowKind::Blackman => (0..size)
            .map(|i| {
                let n = i as f64 / denom;
                0.42 - 0.5 * (TAU * n).cos() + 0.08 * (2.0 * TAU * n).cos()
            })
            .collect(),
        WindowKind::Kaiser => {
            let i0_beta = bessel_i0(beta);
            (0..size)
                .map(|i| {
                    let n = 2.0 * i as f64 / denom - 1.0;
                    bessel_i0(beta * (1.0 - n * n).max(0.0).sqrt()) / i0_beta
                })
                .collect()
        }
    }
}

/// Polynomial approximation of the modified Bessel function I0
/// (Abramowitz & Stegun 9.8.1, 9.8.2).
fn bessel_i0(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 3.75 {
        let y = (x / 3.75).powi(2);
        1.0 + y
            * (3.5156229
                + y * (3.0899424
                    + y * (1.2067492 + y * (0.2659732 + y * (0.0360768 + y * 0.0045813)))))
    } else {
        let y = 3.75 / ax;
        (ax.exp() / ax.sqrt())
            * (0.39894228
                + y * (0.01328592
                    + y * (0.00225319
                        + y * (-0.00157565
                            + y * (0.00916281
                                + y * (-0.02057706
                                    + y * (0.02635537
                                        + y * (-0.01647633 + y * 0.00392377))))))))
    }
}
