// src/processing/mod.rs
//! Post-processing stages between conversion and publication
//!
//! Stages run in registration order inside the pipeline worker; each one
//! receives the previous stage's output and builds a new set, so no stage
//! ever observes a later stage's contribution. A failing stage is skipped
//! for the cycle, its warning is published, and the chain continues with
//! the set unchanged.

pub mod export_tap;
pub mod graph;
pub mod math_channel;
pub mod pipeline;
pub mod spectrum;

pub use export_tap::ExportTap;
pub use graph::GraphStage;
pub use math_channel::MathStage;
pub use pipeline::{PipelineCommand, PipelineWorker};
pub use spectrum::SpectrumStage;

use thiserror::Error;

use crate::config::PostProcessingConfig;
use crate::samples::SampleSet;

/// Per-cycle failures a stage can raise. None of them stop the pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("source channel CH{0} missing from this cycle", .channel + 1)]
    MissingSource { channel: usize },

    #[error("set carries no samples")]
    EmptySet,

    #[error("transform size {size} is not a power of two")]
    NotPowerOfTwo { size: usize },
}

/// One step of the post-processing chain.
pub trait PipelineStage: Send {
    /// Stable name used in logs and stage warnings.
    fn name(&self) -> &'static str;

    /// Whether the stage runs under `config`. Disabled stages are skipped
    /// without being treated as failed.
    fn is_enabled(&self, config: &PostProcessingConfig) -> bool;

    /// Builds this cycle's output from the previous stage's output.
    fn process(
        &mut self,
        input: &SampleSet,
        config: &PostProcessingConfig,
    ) -> Result<SampleSet, StageError>;
}
