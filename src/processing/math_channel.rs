// src/processing/math_channel.rs
//! Derived math channel
//!
//! Combines two source channels sample-by-sample and appends the result as
//! a `ChannelSource::Math` trace. Subtraction in the other order is the
//! same stage with the sources swapped in configuration.

use crate::config::{MathMode, PostProcessingConfig};
use crate::samples::{ChannelSource, ChannelTrace, SampleSet};

use super::{PipelineStage, StageError};

pub struct MathStage;

impl MathStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MathStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for MathStage {
    fn name(&self) -> &'static str {
        "math"
    }

    fn is_enabled(&self, config: &PostProcessingConfig) -> bool {
        config.math.enabled
    }

    fn process(
        &mut self,
        input: &SampleSet,
        config: &PostProcessingConfig,
    ) -> Result<SampleSet, StageError> {
        let math = &config.math;
        let a = input
            .channel(ChannelSource::Input(math.source_a))
            .ok_or(StageError::MissingSource {
                channel: math.source_a,
            })?;
        let b = input
            .channel(ChannelSource::Input(math.source_b))
            .ok_or(StageError::MissingSource {
                channel: math.source_b,
            })?;

        let len = a.len().min(b.len());
        let voltage: Vec<f64> = (0..len)
            .map(|i| {
                let x = math.scale_a * a.voltage[i];
                let y = math.scale_b * b.voltage[i];
                match math.mode {
                    MathMode::Add => x + y,
                    MathMode::Subtract => x - y,
                    MathMode::Multiply => x * y,
                }
            })
            .collect();

        // The derived trace displays on the first source's vertical scale.
        let gain_index = a.gain_index;
        let volts_per_div = a.volts_per_div;

        let mut output = input.clone();
        output.channels.push(ChannelTrace::new(
            ChannelSource::Math,
            gain_index,
            volts_per_div,
            voltage,
        ));
        Ok(output)
    }
}
