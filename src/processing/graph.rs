// src/processing/graph.rs
//! Display-space vertex generation
//!
//! Maps calibrated voltages onto a 10x8 division screen. X places the
//! trigger point at zero and counts divisions of the configured time base;
//! Y is volts over volts/div plus the per-channel offset, clamped to the
//! visible four divisions either side of center.

use std::sync::Arc;

use crate::config::constants::display;
use crate::config::PostProcessingConfig;
use crate::samples::{ChannelSource, SampleSet, TriggerOutcome};

use super::{PipelineStage, StageError};

pub struct GraphStage;

impl GraphStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GraphStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for GraphStage {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn is_enabled(&self, config: &PostProcessingConfig) -> bool {
        config.graph.enabled
    }

    fn process(
        &mut self,
        input: &SampleSet,
        config: &PostProcessingConfig,
    ) -> Result<SampleSet, StageError> {
        if input.sample_count() == 0 {
            return Err(StageError::EmptySet);
        }
        let settings = &config.graph;
        let origin = match input.trigger {
            TriggerOutcome::Triggered { position } => position as f64,
            TriggerOutcome::Untriggered | TriggerOutcome::Bypassed => 0.0,
        };
        let interval = input.sample_interval;
        let half_screen = display::DIVS_VOLTAGE / 2.0;

        let mut output = input.clone();
        for trace in &mut output.channels {
            let offset = match trace.source {
                ChannelSource::Input(channel) => {
                    settings.offset_divs.get(channel).copied().unwrap_or(0.0)
                }
                ChannelSource::Math => 0.0,
            };
            let vertices: Vec<[f32; 2]> = trace
                .voltage
                .iter()
                .enumerate()
                .map(|(i, &volts)| {
                    let x = (i as f64 - origin) * interval / settings.time_per_div_s;
                    let y = (volts / trace.volts_per_div + offset)
                        .clamp(-half_screen, half_screen);
                    [x as f32, y as f32]
                })
                .collect();
            trace.graph = Some(Arc::new(vertices));
        }
        Ok(output)
    }
}
