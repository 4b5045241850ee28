// src/protocol/mod.rs
//! Vendor control protocol: command packets and bulk-frame layout
//!
//! Every control command is a two-byte packet, command code first. Encoding
//! is a pure function of the command fields; decoding recovers them exactly.
//! Bulk frames are opaque interleaved sample bytes whose only protocol-level
//! property is their length. Nothing here performs I/O.

pub mod commands;
pub mod frames;

use thiserror::Error;

pub use commands::{ControlCommand, ScopeChannel, COMMAND_PACKET_LEN};
pub use frames::RawFrame;

/// Errors from command and frame decoding.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command code {code:#04x}")]
    UnknownCommandCode { code: u8 },

    #[error("command {code:#04x} rejects payload byte {payload:#04x}")]
    InvalidPayload { code: u8, payload: u8 },

    #[error("channel index {channel} out of range for a {count}-channel protocol")]
    ChannelOutOfRange { channel: usize, count: usize },

    #[error("bulk frame is {actual} bytes, expected {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    #[error("bulk chunk of {len} bytes breaks the {granule}-byte sample granule")]
    MisalignedChunk { len: usize, granule: usize },
}
