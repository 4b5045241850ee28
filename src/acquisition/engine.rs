// src/acquisition/engine.rs
//! Acquisition state machine owning the device transport.
//!
//! The engine runs on its own thread. It drains control requests at the top
//! of every loop iteration, applies staged configuration between captures,
//! and pumps bulk transfers into the frame assembler while sampling. Fatal
//! transport failures park the machine in `Error` until shutdown.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error, info, trace, warn};

use crate::config::constants::{retry, transfer};
use crate::config::CaptureSnapshot;
use crate::protocol::{ControlCommand, ScopeChannel};
use crate::spec::{Coupling, ModelSpec, SpecError};
use crate::transport::{DeviceTransport, TransportError};

use super::assembler::FrameAssembler;
use super::backoff::RetryBackoff;
use super::{AcqState, AcquisitionError, CapturedFrame, ControlRequest, EngineEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// Builds the ordered command sequence that brings the device to `snapshot`.
///
/// Gain is written for every protocol channel first, then the sample rate,
/// the streamed channel count, coupling relays, and the calibration output.
/// Run control is never part of this sequence.
pub fn configuration_commands(
    spec: &ModelSpec,
    snapshot: &CaptureSnapshot,
) -> Result<Vec<ControlCommand>, SpecError> {
    let scope = &snapshot.scope;
    let mut commands = Vec::with_capacity(scope.channels.len() + 4);

    for (index, channel) in scope.channels.iter().take(ScopeChannel::COUNT).enumerate() {
        let target = match index {
            0 => ScopeChannel::Ch1,
            _ => ScopeChannel::Ch2,
        };
        commands.push(ControlCommand::SetChannelGain {
            channel: target,
            hw_gain_id: spec.gain_step(channel.gain_index)?.hw_gain_id,
        });
    }

    commands.push(ControlCommand::SetSampleRate {
        device_id: snapshot.rate_entry.device_id,
    });
    commands.push(ControlCommand::SetChannelCount {
        count: scope.stream_channel_count() as u8,
    });

    let ac_mask = scope
        .channels
        .iter()
        .take(8)
        .enumerate()
        .filter(|(_, channel)| channel.coupling == Coupling::Ac)
        .fold(0u8, |mask, (index, _)| mask | (1 << index));
    commands.push(ControlCommand::SetCoupling { ac_mask });

    commands.push(ControlCommand::SetCalibrationFrequency {
        hz: spec.snap_calibration_freq(scope.calibration_frequency_hz),
    });

    Ok(commands)
}

/// Owns the transport and drives capture cycles until shutdown.
pub struct AcquisitionEngine {
    transport: Box<dyn DeviceTransport>,
    spec: Arc<ModelSpec>,
    control_rx: Receiver<ControlRequest>,
    frame_tx: Sender<CapturedFrame>,
    /// Receiver clone of `frame_tx`'s channel, used to evict the oldest
    /// frame when the queue is full.
    frame_mirror: Receiver<CapturedFrame>,
    event_tx: Sender<EngineEvent>,
    state: AcqState,
    snapshot: Option<Arc<CaptureSnapshot>>,
    pending: Option<Arc<CaptureSnapshot>>,
    assembler: Option<FrameAssembler>,
    sampling_enabled: bool,
    start_sent: bool,
    cycle: u64,
    malformed_streak: u32,
    frames_emitted: u64,
    frames_dropped: u64,
}

impl AcquisitionEngine {
    pub fn new(
        transport: Box<dyn DeviceTransport>,
        spec: Arc<ModelSpec>,
        control_rx: Receiver<ControlRequest>,
        frame_tx: Sender<CapturedFrame>,
        frame_mirror: Receiver<CapturedFrame>,
        event_tx: Sender<EngineEvent>,
    ) -> Self {
        Self {
            transport,
            spec,
            control_rx,
            frame_tx,
            frame_mirror,
            event_tx,
            state: AcqState::Idle,
            snapshot: None,
            pending: None,
            assembler: None,
            sampling_enabled: false,
            start_sent: false,
            cycle: 0,
            malformed_streak: 0,
            frames_emitted: 0,
            frames_dropped: 0,
        }
    }

    /// Runs until a `Shutdown` request arrives or every control handle is gone.
    pub fn run(mut self) {
        info!(model = %self.spec.name, "acquisition engine running");
        loop {
            if self.next_requests() == Flow::Shutdown {
                break;
            }
            if let Err(fault) = self.step() {
                self.enter_error(fault);
            }
        }
        self.shutdown();
    }

    /// Drains queued control requests. Blocks briefly when there is no
    /// capture to pump so an idle engine does not spin.
    fn next_requests(&mut self) -> Flow {
        let busy = self.sampling_enabled && self.start_sent && self.state == AcqState::Sampling;
        if !busy {
            match self
                .control_rx
                .recv_timeout(Duration::from_millis(transfer::IDLE_POLL_MS))
            {
                Ok(request) => {
                    if self.handle_request(request) == Flow::Shutdown {
                        return Flow::Shutdown;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Flow::Shutdown,
            }
        }
        loop {
            match self.control_rx.try_recv() {
                Ok(request) => {
                    if self.handle_request(request) == Flow::Shutdown {
                        return Flow::Shutdown;
                    }
                }
                Err(TryRecvError::Empty) => return Flow::Continue,
                Err(TryRecvError::Disconnected) => return Flow::Shutdown,
            }
        }
    }

    fn handle_request(&mut self, request: ControlRequest) -> Flow {
        match request {
            ControlRequest::Shutdown => return Flow::Shutdown,
            ControlRequest::ApplyConfig(snapshot) => {
                if self.state == AcqState::Error {
                    warn!("ignoring configuration request, engine is in error state");
                } else {
                    debug!(version = snapshot.version, "configuration staged");
                    self.pending = Some(snapshot);
                }
            }
            ControlRequest::EnableSampling(enabled) => {
                if self.state == AcqState::Error {
                    warn!(enabled, "ignoring run request, engine is in error state");
                } else {
                    self.sampling_enabled = enabled;
                }
            }
        }
        Flow::Continue
    }

    /// One unit of engine work. Errors returned here are fatal.
    fn step(&mut self) -> Result<(), AcquisitionError> {
        if self.state == AcqState::Error {
            return Ok(());
        }
        if let Some(snapshot) = self.pending.take() {
            self.apply_config(snapshot)?;
        }
        if self.sampling_enabled {
            if !self.start_sent {
                self.begin_capture()?;
            }
            if self.start_sent {
                self.pump_bulk()?;
            }
        } else if self.start_sent {
            self.stop_capture()?;
        }
        Ok(())
    }

    /// Stops any running capture, writes the full command sequence, and
    /// rebuilds the frame assembler for the new geometry.
    fn apply_config(&mut self, snapshot: Arc<CaptureSnapshot>) -> Result<(), AcquisitionError> {
        if self.start_sent {
            self.stop_capture()?;
        }
        self.set_state(AcqState::Configuring);
        let commands = configuration_commands(&self.spec, &snapshot)?;
        for command in commands {
            self.send_with_retry(command)?;
        }
        let scope = &snapshot.scope;
        self.assembler = Some(FrameAssembler::new(
            scope.record_length,
            scope.stream_channel_count(),
            self.spec.bytes_per_sample,
            self.spec.unreliable_leading_samples * self.spec.bytes_per_sample,
        ));
        info!(
            version = snapshot.version,
            rate_hz = snapshot.rate_entry.rate_hz,
            record = scope.record_length,
            channels = scope.stream_channel_count(),
            "device configured"
        );
        self.snapshot = Some(snapshot);
        self.set_state(AcqState::Idle);
        Ok(())
    }

    fn begin_capture(&mut self) -> Result<(), AcquisitionError> {
        if self.snapshot.is_none() {
            trace!("sampling enabled before any configuration, waiting");
            return Ok(());
        }
        self.set_state(AcqState::Armed);
        self.send_with_retry(ControlCommand::StartSampling)?;
        self.start_sent = true;
        self.malformed_streak = 0;
        if let Some(assembler) = self.assembler.as_mut() {
            assembler.reset();
        }
        self.set_state(AcqState::Sampling);
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), AcquisitionError> {
        if self.start_sent {
            self.send_with_retry(ControlCommand::StopSampling)?;
            self.start_sent = false;
        }
        if let Some(assembler) = self.assembler.as_mut() {
            assembler.reset();
        }
        self.set_state(AcqState::Idle);
        Ok(())
    }

    /// Reads one bulk chunk and feeds it to the assembler. Timeouts mean no
    /// data is ready yet and are not failures; I/O errors are retried with
    /// backoff before giving up.
    fn pump_bulk(&mut self) -> Result<(), AcquisitionError> {
        let timeout = Duration::from_millis(transfer::BULK_TIMEOUT_MS);
        let attempts = 1 + retry::MAX_TRANSPORT_RETRIES;
        let mut backoff = RetryBackoff::new();
        let mut last = TransportError::Timeout;
        for attempt in 1..=attempts {
            if attempt > 1 {
                thread::sleep(backoff.next_delay());
            }
            match self.transport.bulk_read(transfer::BULK_CHUNK_BYTES, timeout) {
                Ok(chunk) => {
                    if attempt > 1 {
                        debug!(attempt, "bulk read recovered");
                    }
                    return self.ingest_chunk(&chunk);
                }
                Err(TransportError::Timeout) => {
                    trace!("bulk read timed out, no data ready");
                    return Ok(());
                }
                Err(TransportError::Disconnected) => {
                    return Err(AcquisitionError::Disconnected);
                }
                Err(other) => {
                    warn!(attempt, error = %other, "bulk read failed");
                    last = other;
                }
            }
        }
        Err(AcquisitionError::CommunicationFailure { attempts, last })
    }

    fn ingest_chunk(&mut self, chunk: &[u8]) -> Result<(), AcquisitionError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let pushed = match self.assembler.as_mut() {
            Some(assembler) => assembler.push(chunk),
            None => return Ok(()),
        };
        match pushed {
            Ok(frames) => {
                if !frames.is_empty() {
                    self.malformed_streak = 0;
                }
                for frame in frames {
                    self.emit_frame(frame);
                }
                Ok(())
            }
            Err(error) => self.recover_malformed(error),
        }
    }

    /// Hands a completed frame to the conversion stage, evicting the oldest
    /// queued frame when the consumer has fallen behind.
    fn emit_frame(&mut self, frame: crate::protocol::RawFrame) {
        let Some(snapshot) = self.snapshot.clone() else {
            return;
        };
        self.set_state(AcqState::Draining);
        let captured = CapturedFrame {
            frame,
            snapshot,
            cycle: self.cycle,
        };
        self.cycle += 1;
        if self.frame_tx.is_full() {
            if let Ok(evicted) = self.frame_mirror.try_recv() {
                self.frames_dropped += 1;
                debug!(cycle = evicted.cycle, "frame queue full, dropped oldest");
                self.emit_event(EngineEvent::FrameDropped {
                    cycle: evicted.cycle,
                });
            }
        }
        if self.frame_tx.try_send(captured).is_ok() {
            self.frames_emitted += 1;
        }
        self.set_state(AcqState::Sampling);
    }

    /// A misaligned chunk poisons the rest of the transfer. Discard what is
    /// buffered and restart the capture; repeated failures become fatal.
    fn recover_malformed(
        &mut self,
        error: crate::protocol::ProtocolError,
    ) -> Result<(), AcquisitionError> {
        self.malformed_streak += 1;
        warn!(
            error = %error,
            consecutive = self.malformed_streak,
            "malformed bulk data, restarting capture"
        );
        self.emit_event(EngineEvent::MalformedChunk {
            consecutive: self.malformed_streak,
        });
        if self.malformed_streak >= retry::MALFORMED_FRAME_THRESHOLD {
            return Err(AcquisitionError::MalformedStream {
                consecutive: self.malformed_streak,
            });
        }
        if let Some(assembler) = self.assembler.as_mut() {
            assembler.reset();
        }
        self.send_with_retry(ControlCommand::StopSampling)?;
        self.send_with_retry(ControlCommand::StartSampling)?;
        Ok(())
    }

    /// Writes one control packet, retrying transient failures with
    /// exponential backoff. Disconnection is fatal immediately.
    fn send_with_retry(&mut self, command: ControlCommand) -> Result<(), AcquisitionError> {
        let packet = command.encode();
        let attempts = 1 + retry::MAX_TRANSPORT_RETRIES;
        let mut backoff = RetryBackoff::new();
        let mut last = TransportError::Timeout;
        for attempt in 1..=attempts {
            if attempt > 1 {
                thread::sleep(backoff.next_delay());
            }
            match self.transport.control_write(&packet) {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(attempt, ?command, "control write recovered");
                    }
                    return Ok(());
                }
                Err(TransportError::Disconnected) => {
                    return Err(AcquisitionError::Disconnected);
                }
                Err(error) => {
                    warn!(attempt, %error, ?command, "control write failed");
                    last = error;
                }
            }
        }
        Err(AcquisitionError::CommunicationFailure { attempts, last })
    }

    fn enter_error(&mut self, fault: AcquisitionError) {
        error!(error = %fault, "acquisition failed");
        self.start_sent = false;
        self.emit_event(EngineEvent::Fatal(fault));
        self.set_state(AcqState::Error);
    }

    fn set_state(&mut self, state: AcqState) {
        if self.state == state {
            return;
        }
        trace!(from = %self.state, to = %state, "state change");
        self.state = state;
        self.emit_event(EngineEvent::StateChanged(state));
    }

    fn emit_event(&self, event: EngineEvent) {
        match event {
            // Fatal events must reach the worker even under pressure. The
            // worker drains this queue continuously, so a full queue only
            // delays delivery; a closed one means shutdown is under way.
            EngineEvent::Fatal(_) => {
                if self.event_tx.send(event).is_err() {
                    error!("event receiver gone, fatal not delivered");
                }
            }
            _ => {
                if self.event_tx.try_send(event.clone()).is_err() {
                    debug!(?event, "event queue full, event skipped");
                }
            }
        }
    }

    fn shutdown(mut self) {
        info!(
            frames = self.frames_emitted,
            dropped = self.frames_dropped,
            "acquisition engine stopping"
        );
        if self.start_sent {
            if let Err(error) = self.send_with_retry(ControlCommand::StopSampling) {
                warn!(%error, "stop command failed during shutdown");
            }
        }
        self.transport.close();
        self.set_state(AcqState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::calibration::CalibrationData;
    use crate::config::{CaptureSnapshot, DsoConfig};
    use crate::spec::ModelRegistry;
    use crate::transport::mock::MockTransport;
    use crossbeam::channel::{bounded, unbounded};

    fn demo_snapshot() -> Arc<CaptureSnapshot> {
        let registry = ModelRegistry::builtin();
        let spec = registry.fallback();
        let mut config = DsoConfig::default();
        config.scope.record_length = 1024;
        config.scope.channels[1].enabled = false;
        config.scope.validate(spec).expect("demo config is valid");
        let calibration = CalibrationData::shared_default(spec);
        Arc::new(CaptureSnapshot::build(1, config.scope, spec, calibration).expect("snapshot builds"))
    }

    fn engine_under_test(
        transport: MockTransport,
        frame_cap: usize,
    ) -> (
        AcquisitionEngine,
        crossbeam::channel::Sender<ControlRequest>,
        Receiver<CapturedFrame>,
        Receiver<EngineEvent>,
    ) {
        let registry = ModelRegistry::builtin();
        let spec = Arc::new(registry.fallback().clone());
        let (control_tx, control_rx) = unbounded();
        let (frame_tx, frame_rx) = bounded(frame_cap);
        let (event_tx, event_rx) = bounded(64);
        let engine = AcquisitionEngine::new(
            Box::new(transport),
            spec,
            control_rx,
            frame_tx,
            frame_rx.clone(),
            event_tx,
        );
        (engine, control_tx, frame_rx, event_rx)
    }

    fn decoded_writes(handle: &crate::transport::mock::MockHandle) -> Vec<ControlCommand> {
        handle
            .writes()
            .iter()
            .map(|packet| {
                let bytes: [u8; 2] = packet.as_slice().try_into().expect("packets are two bytes");
                ControlCommand::decode(bytes).expect("mock saw valid packets")
            })
            .collect()
    }

    #[test]
    fn test_configuration_writes_in_device_order() {
        let (transport, handle) = MockTransport::demo();
        let (mut engine, _control, _frames, _events) = engine_under_test(transport, 4);
        engine.pending = Some(demo_snapshot());
        engine.step().expect("configuration succeeds");

        let commands = decoded_writes(&handle);
        assert_eq!(commands.len(), 6);
        assert!(matches!(
            commands[0],
            ControlCommand::SetChannelGain {
                channel: ScopeChannel::Ch1,
                ..
            }
        ));
        assert!(matches!(
            commands[1],
            ControlCommand::SetChannelGain {
                channel: ScopeChannel::Ch2,
                ..
            }
        ));
        assert!(matches!(commands[2], ControlCommand::SetSampleRate { .. }));
        assert_eq!(commands[3], ControlCommand::SetChannelCount { count: 1 });
        assert_eq!(commands[4], ControlCommand::SetCoupling { ac_mask: 0 });
        assert_eq!(
            commands[5],
            ControlCommand::SetCalibrationFrequency { hz: 1000 }
        );
        assert_eq!(engine.state, AcqState::Idle);
    }

    #[test]
    fn test_start_issued_only_after_enable() {
        let (transport, handle) = MockTransport::demo();
        let (mut engine, _control, _frames, _events) = engine_under_test(transport, 4);
        engine.pending = Some(demo_snapshot());
        engine.step().expect("configuration succeeds");
        let before = decoded_writes(&handle);
        assert!(!before.contains(&ControlCommand::StartSampling));

        engine.sampling_enabled = true;
        engine.step().expect("start succeeds");
        let after = decoded_writes(&handle);
        assert_eq!(after.last(), Some(&ControlCommand::StartSampling));
        assert_eq!(engine.state, AcqState::Sampling);
        assert!(engine.start_sent);
    }

    #[test]
    fn test_write_retries_exhaust_into_fatal() {
        let (transport, handle) = MockTransport::demo();
        for _ in 0..4 {
            handle.push_write_error(TransportError::Io {
                reason: "pipe stalled".into(),
            });
        }
        let (mut engine, _control, _frames, events) = engine_under_test(transport, 4);
        engine.pending = Some(demo_snapshot());

        let fault = engine.step().expect_err("writes must exhaust");
        assert_eq!(
            fault,
            AcquisitionError::CommunicationFailure {
                attempts: 4,
                last: TransportError::Io {
                    reason: "pipe stalled".into(),
                },
            }
        );
        assert_eq!(handle.write_count(), 4);

        engine.enter_error(fault);
        assert_eq!(engine.state, AcqState::Error);
        let saw_fatal = events
            .try_iter()
            .any(|event| matches!(event, EngineEvent::Fatal(_)));
        assert!(saw_fatal);
    }

    #[test]
    fn test_disconnect_is_fatal_without_retry() {
        let (transport, handle) = MockTransport::demo();
        handle.push_write_error(TransportError::Disconnected);
        let (mut engine, _control, _frames, _events) = engine_under_test(transport, 4);
        engine.pending = Some(demo_snapshot());

        let fault = engine.step().expect_err("disconnect is fatal");
        assert_eq!(fault, AcquisitionError::Disconnected);
        assert_eq!(handle.write_count(), 1);
    }

    #[test]
    fn test_fatal_event_survives_full_queue() {
        let (transport, _handle) = MockTransport::demo();
        let (mut engine, _control, _frames, events) = engine_under_test(transport, 4);

        // Saturate the event queue so the fatal cannot use the fast path.
        while engine
            .event_tx
            .try_send(EngineEvent::StateChanged(AcqState::Idle))
            .is_ok()
        {}

        let reporter = thread::spawn(move || {
            engine.enter_error(AcquisitionError::Disconnected);
            engine
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut saw_fatal = false;
        while std::time::Instant::now() < deadline && !saw_fatal {
            match events.recv_timeout(Duration::from_millis(50)) {
                Ok(EngineEvent::Fatal(AcquisitionError::Disconnected)) => saw_fatal = true,
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let engine = reporter.join().expect("reporter finishes");
        assert!(saw_fatal, "fatal notification never delivered");
        assert_eq!(engine.state, AcqState::Error);
    }

    #[test]
    fn test_full_queue_drops_oldest_frame() {
        let (transport, handle) = MockTransport::demo();
        let (mut engine, _control, frames, events) = engine_under_test(transport, 1);
        engine.pending = Some(demo_snapshot());
        engine.sampling_enabled = true;
        engine.step().expect("configure and start");

        // Two complete 1024 sample single channel frames in one transfer.
        handle.push_bulk(vec![0x80; 2048]);
        engine.step().expect("frames assemble");

        let delivered: Vec<_> = frames.try_iter().collect();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].cycle, 1);
        assert_eq!(engine.frames_dropped, 1);
        let dropped = events
            .try_iter()
            .any(|event| matches!(event, EngineEvent::FrameDropped { cycle: 0 }));
        assert!(dropped);
    }

    #[test]
    fn test_malformed_chunk_restarts_capture() {
        let (transport, handle) = MockTransport::demo();
        let (mut engine, _control, _frames, events) = engine_under_test(transport, 4);
        engine.pending = Some(demo_snapshot());
        engine.sampling_enabled = true;
        engine.step().expect("configure and start");
        let writes_before = handle.write_count();

        // Single channel stream has a one byte granule, so force a frame
        // level failure instead: feed a chunk after poisoning the assembler
        // geometry with a two channel snapshot.
        engine.assembler = Some(FrameAssembler::new(512, 2, 1, 0));
        handle.push_bulk(vec![0x80; 33]);
        engine.step().expect("restart is not fatal");

        assert_eq!(engine.malformed_streak, 1);
        let flagged = events
            .try_iter()
            .any(|event| matches!(event, EngineEvent::MalformedChunk { consecutive: 1 }));
        assert!(flagged);
        let commands = decoded_writes(&handle);
        assert_eq!(
            &commands[writes_before..],
            &[ControlCommand::StopSampling, ControlCommand::StartSampling]
        );
    }

    #[test]
    fn test_malformed_streak_becomes_fatal() {
        let (transport, handle) = MockTransport::demo();
        let (mut engine, _control, _frames, _events) = engine_under_test(transport, 4);
        engine.pending = Some(demo_snapshot());
        engine.sampling_enabled = true;
        engine.step().expect("configure and start");

        engine.malformed_streak = retry::MALFORMED_FRAME_THRESHOLD - 1;
        engine.assembler = Some(FrameAssembler::new(512, 2, 1, 0));
        handle.push_bulk(vec![0x80; 33]);
        let fault = engine.step().expect_err("streak crosses the threshold");
        assert_eq!(
            fault,
            AcquisitionError::MalformedStream {
                consecutive: retry::MALFORMED_FRAME_THRESHOLD,
            }
        );
    }

    #[test]
    fn test_disable_sends_stop() {
        let (transport, handle) = MockTransport::demo();
        let (mut engine, _control, _frames, _events) = engine_under_test(transport, 4);
        engine.pending = Some(demo_snapshot());
        engine.sampling_enabled = true;
        engine.step().expect("configure and start");

        engine.sampling_enabled = false;
        engine.step().expect("stop succeeds");
        let commands = decoded_writes(&handle);
        assert_eq!(commands.last(), Some(&ControlCommand::StopSampling));
        assert_eq!(engine.state, AcqState::Idle);
        assert!(!engine.start_sent);
    }

    #[test]
    fn test_error_state_ignores_run_requests() {
        let (transport, handle) = MockTransport::demo();
        let (mut engine, _control, _frames, _events) = engine_under_test(transport, 4);
        engine.enter_error(AcquisitionError::Disconnected);

        engine.handle_request(ControlRequest::EnableSampling(true));
        engine.handle_request(ControlRequest::ApplyConfig(demo_snapshot()));
        engine.step().expect("parked engine does nothing");

        assert!(!engine.sampling_enabled);
        assert!(engine.pending.is_none());
        assert_eq!(handle.write_count(), 0);
        assert_eq!(
            engine.handle_request(ControlRequest::Shutdown),
            Flow::Shutdown
        );
    }
}
