// src/session.rs
//! Session lifecycle
//!
//! `Session::open` resolves the device model, validates the startup
//! configuration, wires the channels and spawns the acquisition and
//! pipeline threads. The returned `ControlHandle` is the only way to change
//! settings afterwards: every request is validated synchronously against
//! the model tables and applied by the engine at its next safe point.
//! Shutdown is cooperative with a bounded drain wait; dropping the session
//! shuts down best-effort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::acquisition::{AcqState, AcquisitionEngine, CapturedFrame, ControlRequest};
use crate::config::constants::{queues, timing};
use crate::config::{
    CalibrationData, CaptureSnapshot, DsoConfig, PostProcessingConfig, ScopeConfig,
};
use crate::error::{DsoError, Result};
use crate::notify::{StatusEvent, Subscriber, SubscriberHub};
use crate::processing::{
    ExportTap, GraphStage, MathStage, PipelineCommand, PipelineWorker, SpectrumStage,
};
use crate::samples::SampleSet;
use crate::spec::{DeviceIdentity, ModelRegistry, ModelSpec};
use crate::transport::DeviceTransport;

struct ControlState {
    scope: ScopeConfig,
    post: PostProcessingConfig,
    version: u64,
}

struct ControlShared {
    spec: Arc<ModelSpec>,
    calibration: Arc<CalibrationData>,
    control_tx: Sender<ControlRequest>,
    command_tx: Sender<PipelineCommand>,
    state: Mutex<ControlState>,
    stopped: AtomicBool,
}

/// Consumer-side settings interface. Cheap to clone, valid until shutdown.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<ControlShared>,
}

impl ControlHandle {
    /// Replaces the whole acquisition configuration. Validated against the
    /// model before anything is queued; returns the new version on success.
    pub fn apply_scope(&self, scope: ScopeConfig) -> Result<u64> {
        self.ensure_running()?;
        scope.validate(&self.shared.spec)?;
        let mut state = self.shared.state.lock();
        state.version += 1;
        state.scope = scope.clone();
        let snapshot = CaptureSnapshot::build(
            state.version,
            scope,
            &self.shared.spec,
            self.shared.calibration.clone(),
        )?;
        self.shared
            .control_tx
            .send(ControlRequest::ApplyConfig(Arc::new(snapshot)))
            .map_err(|_| DsoError::SessionStopped)?;
        debug!(version = state.version, "configuration queued");
        Ok(state.version)
    }

    /// Edits a copy of the current configuration and applies it if it
    /// validates. The running configuration is untouched on rejection.
    pub fn update_scope(&self, edit: impl FnOnce(&mut ScopeConfig)) -> Result<u64> {
        let mut scope = self.scope();
        edit(&mut scope);
        self.apply_scope(scope)
    }

    /// Replaces the post-processing settings, applied between cycles.
    pub fn apply_post(&self, post: PostProcessingConfig) -> Result<()> {
        self.ensure_running()?;
        let mut state = self.shared.state.lock();
        post.validate(&state.scope)?;
        state.post = post.clone();
        self.shared
            .command_tx
            .send(PipelineCommand::UpdateConfig(Arc::new(post)))
            .map_err(|_| DsoError::SessionStopped)
    }

    pub fn update_post(&self, edit: impl FnOnce(&mut PostProcessingConfig)) -> Result<()> {
        let mut post = self.post();
        edit(&mut post);
        self.apply_post(post)
    }

    /// Starts or stops continuous capture.
    pub fn enable_sampling(&self, enabled: bool) -> Result<()> {
        self.ensure_running()?;
        self.shared
            .control_tx
            .send(ControlRequest::EnableSampling(enabled))
            .map_err(|_| DsoError::SessionStopped)
    }

    /// Copy of the last accepted acquisition configuration.
    pub fn scope(&self) -> ScopeConfig {
        self.shared.state.lock().scope.clone()
    }

    /// Copy of the last accepted post-processing configuration.
    pub fn post(&self) -> PostProcessingConfig {
        self.shared.state.lock().post.clone()
    }

    pub fn version(&self) -> u64 {
        self.shared.state.lock().version
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(DsoError::SessionStopped);
        }
        Ok(())
    }
}

/// One open device with its acquisition and pipeline threads.
pub struct Session {
    spec: Arc<ModelSpec>,
    identity: DeviceIdentity,
    hub: Arc<SubscriberHub>,
    shared: Arc<ControlShared>,
    export_rx: Receiver<Arc<SampleSet>>,
    done_rx: Receiver<()>,
    acquisition: Option<JoinHandle<()>>,
    pipeline: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Session {
    /// Opens a session over an already-connected transport.
    ///
    /// Fails without spawning anything if the device has no usable model
    /// table or the startup configuration does not validate.
    pub fn open(
        transport: Box<dyn DeviceTransport>,
        registry: &ModelRegistry,
        config: DsoConfig,
        calibration: Option<CalibrationData>,
    ) -> Result<Session> {
        let identity = transport.identity();
        let spec = Arc::new(registry.lookup(&identity)?.clone());
        info!(model = %spec.name, %identity, "device resolved");

        config.scope.validate(&spec)?;
        config.post.validate(&config.scope)?;
        let calibration = match calibration {
            Some(data) => Arc::new(data),
            None => CalibrationData::shared_default(&spec),
        };

        let (control_tx, control_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();
        let (frame_tx, frame_rx) = bounded::<CapturedFrame>(queues::FRAME_QUEUE_CAP);
        let (event_tx, event_rx) = bounded(queues::CONTROL_QUEUE_CAP);
        let (done_tx, done_rx) = bounded(1);

        let hub = Arc::new(SubscriberHub::new());
        let (tap, export_rx) = ExportTap::new(queues::SAMPLE_QUEUE_CAP);
        let stages: Vec<Box<dyn crate::processing::PipelineStage>> = vec![
            Box::new(tap),
            Box::new(MathStage::new()),
            Box::new(SpectrumStage::new()),
            Box::new(GraphStage::new()),
        ];

        let engine = AcquisitionEngine::new(
            transport,
            spec.clone(),
            control_rx,
            frame_tx,
            frame_rx.clone(),
            event_tx,
        );
        let acquisition = thread::Builder::new()
            .name("dso-acquisition".into())
            .spawn(move || {
                engine.run();
                let _ = done_tx.send(());
            })
            .map_err(|source| DsoError::Spawn {
                name: "dso-acquisition",
                source,
            })?;

        let worker = PipelineWorker::new(
            spec.clone(),
            frame_rx,
            event_rx,
            command_rx,
            control_tx.clone(),
            hub.clone(),
            stages,
            Arc::new(config.post.clone()),
        );
        let pipeline = thread::Builder::new()
            .name("dso-pipeline".into())
            .spawn(move || worker.run())
            .map_err(|source| DsoError::Spawn {
                name: "dso-pipeline",
                source,
            })?;

        let shared = Arc::new(ControlShared {
            spec: spec.clone(),
            calibration: calibration.clone(),
            control_tx,
            command_tx,
            state: Mutex::new(ControlState {
                scope: config.scope.clone(),
                post: config.post,
                version: 1,
            }),
            stopped: AtomicBool::new(false),
        });

        let session = Session {
            spec,
            identity,
            hub,
            shared,
            export_rx,
            done_rx,
            acquisition: Some(acquisition),
            pipeline: Some(pipeline),
            stopped: false,
        };

        // Put the device into the startup configuration. The engine applies
        // it at the top of its first loop; sampling stays off until asked.
        let snapshot = CaptureSnapshot::build(1, config.scope, &session.spec, calibration)?;
        session
            .shared
            .control_tx
            .send(ControlRequest::ApplyConfig(Arc::new(snapshot)))
            .map_err(|_| DsoError::SessionStopped)?;

        Ok(session)
    }

    /// Model table the device resolved to.
    pub fn model(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn subscribe(&self, subscriber: Subscriber) {
        self.hub.register(subscriber);
    }

    /// Polled channel of published sample sets, newest kept under pressure.
    pub fn subscribe_channel(&self) -> Receiver<Arc<SampleSet>> {
        self.hub.subscribe_channel()
    }

    /// Sink of untouched calibrated sets from the export tap.
    pub fn export_samples(&self) -> Receiver<Arc<SampleSet>> {
        self.export_rx.clone()
    }

    /// Stops acquisition, releases the transport and joins both threads.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.shared.stopped.store(true, Ordering::SeqCst);

        let wait = self.drain_wait();
        debug!(wait_ms = wait.as_millis() as u64, "shutdown requested");
        let _ = self.shared.control_tx.send(ControlRequest::Shutdown);

        match self.done_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.acquisition.take() {
                    let _ = handle.join();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    waited_ms = wait.as_millis() as u64,
                    "acquisition thread did not drain, abandoning it"
                );
                let _ = self.shared.command_tx.send(PipelineCommand::Stop);
                if let Some(handle) = self.pipeline.take() {
                    let _ = handle.join();
                }
                return Err(DsoError::ShutdownTimeout {
                    waited_ms: wait.as_millis() as u64,
                });
            }
        }

        let _ = self.shared.command_tx.send(PipelineCommand::Stop);
        if let Some(handle) = self.pipeline.take() {
            let _ = handle.join();
        }
        self.hub.publish_status(StatusEvent::State(AcqState::Stopped));
        info!("session stopped");
        Ok(())
    }

    /// Time the engine gets to finish or abandon the in-flight record:
    /// twice the record duration, floored for fast captures.
    fn drain_wait(&self) -> Duration {
        let scope = self.shared.state.lock().scope.clone();
        let record_s = scope.record_length as f64 / scope.sample_rate_hz.max(1.0);
        let scaled = Duration::from_secs_f64(record_s * f64::from(timing::DRAIN_WAIT_RECORD_FACTOR));
        scaled.max(Duration::from_millis(timing::DRAIN_WAIT_FLOOR_MS))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            warn!(%error, "shutdown on drop failed");
        }
    }
}
