// src/processing/export_tap.rs
//! Raw-data tap feeding external exporters
//!
//! Runs first in the chain so exporters see the calibrated set exactly as
//! conversion produced it, before math/spectrum/graph attach anything.

use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::config::PostProcessingConfig;
use crate::samples::SampleSet;

use super::{PipelineStage, StageError};

/// Forwards each cycle's untouched set to a bounded sink channel.
pub struct ExportTap {
    tx: Sender<Arc<SampleSet>>,
    /// Receiver clone used to evict the oldest set when the sink lags.
    mirror: Receiver<Arc<SampleSet>>,
    sink_open: bool,
}

impl ExportTap {
    /// Creates the tap and the consumer end of its sink.
    pub fn new(capacity: usize) -> (Self, Receiver<Arc<SampleSet>>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                mirror: rx.clone(),
                sink_open: true,
            },
            rx,
        )
    }
}

impl PipelineStage for ExportTap {
    fn name(&self) -> &'static str {
        "export"
    }

    fn is_enabled(&self, config: &PostProcessingConfig) -> bool {
        config.export.enabled && self.sink_open
    }

    fn process(
        &mut self,
        input: &SampleSet,
        _config: &PostProcessingConfig,
    ) -> Result<SampleSet, StageError> {
        // The mirror keeps the channel connected, so a dropped sink shows
        // up as a receiver count of one.
        if self.tx.receiver_count() <= 1 {
            debug!("export sink dropped, tap disabled");
            self.sink_open = false;
            return Ok(input.clone());
        }
        if self.tx.is_full() {
            let _ = self.mirror.try_recv();
        }
        let _ = self.tx.try_send(Arc::new(input.clone()));
        Ok(input.clone())
    }
}
