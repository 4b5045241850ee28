// src/processing/pipeline.rs
//! Pipeline worker thread
//!
//! Receives captured frames and engine events, converts frames to sample
//! sets, arbitrates trigger outcomes per the configured mode, folds the
//! result through the stage chain and publishes to the subscriber hub.
//! Post-processing settings changes apply between cycles, never within one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{never, select, Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::acquisition::{CapturedFrame, ControlRequest, EngineEvent};
use crate::config::{PostProcessingConfig, TriggerConfig};
use crate::convert::convert;
use crate::error::DsoError;
use crate::notify::{StatusEvent, SubscriberHub};
use crate::samples::SampleSet;
use crate::spec::{ModelSpec, TriggerMode};

use super::PipelineStage;

/// Requests accepted by the worker between cycles.
#[derive(Debug)]
pub enum PipelineCommand {
    /// Replace the post-processing settings. Already validated.
    UpdateConfig(Arc<PostProcessingConfig>),
    Stop,
}

/// Decides whether a converted set reaches the subscribers.
///
/// NORMAL and SINGLE deliver only triggered records. AUTO free-runs: after
/// `auto_timeout_ms` without a delivery, untriggered records pass through
/// so the display keeps moving.
struct TriggerArbiter {
    last_delivery: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Deliver,
    Discard,
}

impl TriggerArbiter {
    fn new() -> Self {
        Self {
            last_delivery: Instant::now(),
        }
    }

    fn admit(&mut self, set: &SampleSet, trigger: &TriggerConfig) -> Admission {
        let admitted = match (set.is_triggered(), trigger.mode) {
            (true, _) => true,
            (false, TriggerMode::Roll) => true,
            (false, TriggerMode::Auto) => {
                self.last_delivery.elapsed() >= Duration::from_millis(trigger.auto_timeout_ms)
            }
            (false, TriggerMode::Normal | TriggerMode::Single) => false,
        };
        if admitted {
            self.last_delivery = Instant::now();
            Admission::Deliver
        } else {
            Admission::Discard
        }
    }
}

pub struct PipelineWorker {
    spec: Arc<ModelSpec>,
    frame_rx: Receiver<CapturedFrame>,
    event_rx: Receiver<EngineEvent>,
    command_rx: Receiver<PipelineCommand>,
    /// Routed back to the engine for SINGLE-shot auto-stop.
    control_tx: Sender<ControlRequest>,
    hub: Arc<SubscriberHub>,
    stages: Vec<Box<dyn PipelineStage>>,
    post: Arc<PostProcessingConfig>,
    arbiter: TriggerArbiter,
    cycles_published: u64,
    stage_warnings: u64,
}

impl PipelineWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: Arc<ModelSpec>,
        frame_rx: Receiver<CapturedFrame>,
        event_rx: Receiver<EngineEvent>,
        command_rx: Receiver<PipelineCommand>,
        control_tx: Sender<ControlRequest>,
        hub: Arc<SubscriberHub>,
        stages: Vec<Box<dyn PipelineStage>>,
        post: Arc<PostProcessingConfig>,
    ) -> Self {
        Self {
            spec,
            frame_rx,
            event_rx,
            command_rx,
            control_tx,
            hub,
            stages,
            post,
            arbiter: TriggerArbiter::new(),
            cycles_published: 0,
            stage_warnings: 0,
        }
    }

    /// Runs until told to stop or until the acquisition side disappears.
    pub fn run(mut self) {
        info!(stages = self.stages.len(), "pipeline worker running");
        loop {
            select! {
                recv(self.command_rx) -> msg => match msg {
                    Ok(PipelineCommand::UpdateConfig(post)) => {
                        debug!("post-processing settings replaced");
                        self.post = post;
                    }
                    Ok(PipelineCommand::Stop) | Err(_) => break,
                },
                recv(self.event_rx) -> msg => match msg {
                    Ok(event) => self.forward_event(event),
                    Err(_) => {
                        // Engine gone; frames may still be queued.
                        self.event_rx = never();
                    }
                },
                recv(self.frame_rx) -> msg => match msg {
                    Ok(captured) => self.handle_frame(captured),
                    Err(_) => break,
                },
            }
        }
        info!(
            cycles = self.cycles_published,
            warnings = self.stage_warnings,
            "pipeline worker stopping"
        );
    }

    fn handle_frame(&mut self, captured: CapturedFrame) {
        let set = match convert(&captured.frame, &self.spec, &captured.snapshot, captured.cycle) {
            Ok(set) => set,
            Err(error) => {
                warn!(cycle = captured.cycle, %error, "conversion failed, frame discarded");
                self.hub.publish_status(StatusEvent::StageWarning {
                    stage: "convert",
                    message: error.to_string(),
                });
                return;
            }
        };

        let trigger = &captured.snapshot.scope.trigger;
        if self.arbiter.admit(&set, trigger) == Admission::Discard {
            trace!(cycle = set.cycle, "untriggered record discarded");
            return;
        }

        if trigger.mode == TriggerMode::Single && set.is_triggered() {
            debug!(cycle = set.cycle, "single shot complete, stopping capture");
            let _ = self.control_tx.send(ControlRequest::EnableSampling(false));
            self.hub.publish_status(StatusEvent::SingleShotComplete);
        }

        let final_set = self.run_stages(set);
        self.hub.publish_samples(Arc::new(final_set));
        self.cycles_published += 1;
    }

    /// Folds the set through every enabled stage. A failed stage contributes
    /// nothing; the chain continues from the previous output.
    fn run_stages(&mut self, set: SampleSet) -> SampleSet {
        let post = self.post.clone();
        let mut current = set;
        for stage in &mut self.stages {
            if !stage.is_enabled(&post) {
                continue;
            }
            match stage.process(&current, &post) {
                Ok(next) => current = next,
                Err(error) => {
                    self.stage_warnings += 1;
                    warn!(stage = stage.name(), %error, "stage failed, skipped this cycle");
                    self.hub.publish_status(StatusEvent::StageWarning {
                        stage: stage.name(),
                        message: error.to_string(),
                    });
                }
            }
        }
        current
    }

    fn forward_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::StateChanged(state) => {
                self.hub.publish_status(StatusEvent::State(state));
            }
            EngineEvent::FrameDropped { cycle } => {
                self.hub.publish_status(StatusEvent::FrameDropped { cycle });
            }
            EngineEvent::MalformedChunk { consecutive } => {
                self.hub
                    .publish_status(StatusEvent::CaptureRestarted { consecutive });
            }
            EngineEvent::Fatal(fault) => {
                self.hub.publish_fatal(DsoError::Acquisition(fault));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::AcquisitionError;
    use crate::config::calibration::CalibrationData;
    use crate::config::{CaptureSnapshot, DsoConfig};
    use crate::notify::Subscriber;
    use crate::processing::{ExportTap, GraphStage, MathStage, SpectrumStage};
    use crate::protocol::RawFrame;
    use crate::samples::TriggerOutcome;
    use crate::spec::{ModelRegistry, TriggerSlope};
    use crossbeam::channel::unbounded;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn demo_spec() -> Arc<ModelSpec> {
        Arc::new(ModelRegistry::builtin().fallback().clone())
    }

    fn snapshot_with(mode: TriggerMode) -> Arc<CaptureSnapshot> {
        let registry = ModelRegistry::builtin();
        let spec = registry.fallback();
        let mut config = DsoConfig::default();
        config.scope.record_length = 1024;
        config.scope.channels[1].enabled = false;
        config.scope.trigger.mode = mode;
        config.scope.trigger.slope = TriggerSlope::Rising;
        config.scope.trigger.level_volts = 0.0;
        config.scope.validate(spec).expect("valid test config");
        let calibration = CalibrationData::shared_default(spec);
        Arc::new(CaptureSnapshot::build(1, config.scope, spec, calibration).expect("snapshot"))
    }

    /// 1024 single-channel samples with one rising edge at index 512.
    fn edged_frame() -> RawFrame {
        let mut data = vec![100u8; 512];
        data.extend(vec![200u8; 512]);
        RawFrame::decode(data, 1024, 1, 1).expect("frame geometry")
    }

    fn flat_frame() -> RawFrame {
        RawFrame::decode(vec![128u8; 1024], 1024, 1, 1).expect("frame geometry")
    }

    fn worker_under_test(
        stages: Vec<Box<dyn PipelineStage>>,
        post: PostProcessingConfig,
    ) -> (
        PipelineWorker,
        Arc<SubscriberHub>,
        Receiver<ControlRequest>,
    ) {
        let (_frame_tx, frame_rx) = unbounded();
        let (_event_tx, event_rx) = unbounded();
        let (_command_tx, command_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let hub = Arc::new(SubscriberHub::new());
        let worker = PipelineWorker::new(
            demo_spec(),
            frame_rx,
            event_rx,
            command_rx,
            control_tx,
            hub.clone(),
            stages,
            Arc::new(post),
        );
        (worker, hub, control_rx)
    }

    #[test]
    fn test_triggered_frame_published() {
        let (mut worker, hub, _control) =
            worker_under_test(Vec::new(), PostProcessingConfig::default());
        let rx = hub.subscribe_channel();

        worker.handle_frame(CapturedFrame {
            frame: edged_frame(),
            snapshot: snapshot_with(TriggerMode::Normal),
            cycle: 0,
        });

        let set = rx.try_recv().expect("published");
        assert!(set.is_triggered());
        assert_eq!(set.cycle, 0);
    }

    #[test]
    fn test_normal_discards_untriggered() {
        let (mut worker, hub, _control) =
            worker_under_test(Vec::new(), PostProcessingConfig::default());
        let rx = hub.subscribe_channel();

        worker.handle_frame(CapturedFrame {
            frame: flat_frame(),
            snapshot: snapshot_with(TriggerMode::Normal),
            cycle: 0,
        });

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_auto_free_runs_after_timeout() {
        let (mut worker, hub, _control) =
            worker_under_test(Vec::new(), PostProcessingConfig::default());
        let rx = hub.subscribe_channel();
        let snapshot = snapshot_with(TriggerMode::Auto);
        let timeout = snapshot.scope.trigger.auto_timeout_ms;

        // Fresh delivery clock: untriggered data is withheld.
        worker.handle_frame(CapturedFrame {
            frame: flat_frame(),
            snapshot: snapshot.clone(),
            cycle: 0,
        });
        assert!(rx.try_recv().is_err());

        // Past the timeout the same data free-runs through.
        worker.arbiter.last_delivery = Instant::now() - Duration::from_millis(timeout + 50);
        worker.handle_frame(CapturedFrame {
            frame: flat_frame(),
            snapshot,
            cycle: 1,
        });
        let set = rx.try_recv().expect("free-run delivery");
        assert_eq!(set.trigger, TriggerOutcome::Untriggered);
    }

    #[test]
    fn test_single_shot_stops_capture() {
        let (mut worker, hub, control) =
            worker_under_test(Vec::new(), PostProcessingConfig::default());
        let statuses = Arc::new(AtomicUsize::new(0));
        let seen = statuses.clone();
        hub.register(Subscriber::new().status(move |event| {
            if *event == StatusEvent::SingleShotComplete {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));

        worker.handle_frame(CapturedFrame {
            frame: edged_frame(),
            snapshot: snapshot_with(TriggerMode::Single),
            cycle: 0,
        });

        match control.try_recv() {
            Ok(ControlRequest::EnableSampling(false)) => {}
            other => panic!("expected stop request, got {other:?}"),
        }
        assert_eq!(statuses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_roll_bypasses_arbitration() {
        let (mut worker, hub, _control) =
            worker_under_test(Vec::new(), PostProcessingConfig::default());
        let rx = hub.subscribe_channel();

        worker.handle_frame(CapturedFrame {
            frame: flat_frame(),
            snapshot: snapshot_with(TriggerMode::Roll),
            cycle: 0,
        });

        let set = rx.try_recv().expect("roll always delivers");
        assert_eq!(set.trigger, TriggerOutcome::Bypassed);
    }

    #[test]
    fn test_failed_stage_keeps_cycle_alive() {
        // Math wants CH2, which the single-channel capture cannot provide.
        let mut post = PostProcessingConfig::default();
        post.math.enabled = true;
        post.math.source_a = 0;
        post.math.source_b = 1;

        let stages: Vec<Box<dyn PipelineStage>> = vec![Box::new(MathStage::new())];
        let (mut worker, hub, _control) = worker_under_test(stages, post);
        let rx = hub.subscribe_channel();
        let warnings = Arc::new(AtomicUsize::new(0));
        let seen = warnings.clone();
        hub.register(Subscriber::new().status(move |event| {
            if matches!(event, StatusEvent::StageWarning { stage: "math", .. }) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));

        worker.handle_frame(CapturedFrame {
            frame: edged_frame(),
            snapshot: snapshot_with(TriggerMode::Normal),
            cycle: 0,
        });

        let set = rx.try_recv().expect("published without math");
        assert_eq!(set.channels.len(), 1);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(worker.stage_warnings, 1);
    }

    #[test]
    fn test_full_chain_attaches_everything() {
        let mut post = PostProcessingConfig::default();
        post.export.enabled = true;
        post.math.enabled = false;
        post.spectrum.enabled = true;
        post.spectrum.size = 256;
        post.graph.enabled = true;

        let (tap, export_rx) = ExportTap::new(2);
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(tap),
            Box::new(MathStage::new()),
            Box::new(SpectrumStage::new()),
            Box::new(GraphStage::new()),
        ];
        let (mut worker, hub, _control) = worker_under_test(stages, post);
        let rx = hub.subscribe_channel();

        worker.handle_frame(CapturedFrame {
            frame: edged_frame(),
            snapshot: snapshot_with(TriggerMode::Normal),
            cycle: 0,
        });

        let set = rx.try_recv().expect("published");
        let trace = &set.channels[0];
        assert!(trace.spectrum.is_some());
        assert!(trace.graph.is_some());

        // The tap saw the set before any attachments.
        let exported = export_rx.try_recv().expect("tap forwarded");
        assert!(exported.channels[0].spectrum.is_none());
        assert!(exported.channels[0].graph.is_none());
    }

    #[test]
    fn test_fatal_event_routed_once() {
        let (mut worker, hub, _control) =
            worker_under_test(Vec::new(), PostProcessingConfig::default());
        let fatals = Arc::new(AtomicUsize::new(0));
        let seen = fatals.clone();
        hub.register(Subscriber::new().fatal(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        worker.forward_event(EngineEvent::Fatal(AcquisitionError::Disconnected));
        worker.forward_event(EngineEvent::Fatal(AcquisitionError::Disconnected));

        assert_eq!(fatals.load(Ordering::SeqCst), 1);
    }
}
