// src/acquisition/mod.rs
//! Acquisition state machine and its thread-facing message types
//!
//! The engine owns the transport and runs on its own thread. Everything
//! crossing that boundary is an immutable message: control requests in,
//! captured frames and engine events out. Events carry enough for the
//! pipeline worker to surface status without the engine knowing anything
//! about subscribers.

pub mod assembler;
pub mod backoff;
pub mod engine;

use std::sync::Arc;

use thiserror::Error;

use crate::config::CaptureSnapshot;
use crate::protocol::RawFrame;
use crate::transport::TransportError;

pub use assembler::FrameAssembler;
pub use backoff::RetryBackoff;
pub use engine::AcquisitionEngine;

/// States of the acquisition machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    /// Configured or not, sampling disabled.
    Idle,
    /// Writing the ordered configuration commands.
    Configuring,
    /// Configuration acknowledged, start command issued.
    Armed,
    /// Bulk data flowing, assembling the current frame.
    Sampling,
    /// A full frame was just handed off.
    Draining,
    /// Fatal failure, parked until shutdown. No auto-recovery.
    Error,
    /// Terminal, transport released.
    Stopped,
}

impl std::fmt::Display for AcqState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AcqState::Idle => "idle",
            AcqState::Configuring => "configuring",
            AcqState::Armed => "armed",
            AcqState::Sampling => "sampling",
            AcqState::Draining => "draining",
            AcqState::Error => "error",
            AcqState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Failures that end acquisition.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("device communication failed after {attempts} attempts: {last}")]
    CommunicationFailure { attempts: u32, last: TransportError },

    #[error("device disconnected")]
    Disconnected,

    #[error("bulk stream malformed {consecutive} times in a row")]
    MalformedStream { consecutive: u32 },

    #[error("capture snapshot inconsistent with model tables: {0}")]
    SnapshotMismatch(#[from] crate::spec::SpecError),
}

/// Requests accepted by the engine, applied at the top of its loop.
#[derive(Debug)]
pub enum ControlRequest {
    /// Replace the capture configuration. Already validated; the engine
    /// reconfigures the hardware at the next safe point.
    ApplyConfig(Arc<CaptureSnapshot>),
    /// Start or stop continuous capture.
    EnableSampling(bool),
    /// Stop everything and release the transport.
    Shutdown,
}

/// One assembled frame with the exact configuration it was captured under.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: RawFrame,
    pub snapshot: Arc<CaptureSnapshot>,
    /// Monotonic acquisition cycle counter.
    pub cycle: u64,
}

/// Out-of-band notifications from the engine to the pipeline worker.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(AcqState),
    /// A frame was dropped because the pipeline fell behind.
    FrameDropped { cycle: u64 },
    /// A malformed stream chunk forced a capture restart.
    MalformedChunk { consecutive: u32 },
    /// Unrecoverable; emitted exactly once, engine parks in `Error`.
    Fatal(AcquisitionError),
}
