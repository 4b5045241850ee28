// src/transport/mod.rs
//! USB link abstraction
//!
//! `DeviceTransport` is the only seam that touches physical I/O. The
//! acquisition engine classifies its failures as timeout, transient I/O or
//! disconnection and never looks deeper. Implementations own their handle
//! and are driven from the acquisition thread, so the trait needs `Send`
//! but not `Sync`.

pub mod demo;
pub mod mock;

use std::time::Duration;

use thiserror::Error;

use crate::spec::DeviceIdentity;

pub use demo::DemoTransport;
pub use mock::MockTransport;

/// Transport-level failures, classified as far as the core cares.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transfer timed out")]
    Timeout,

    #[error("usb i/o failed: {reason}")]
    Io { reason: String },

    #[error("device disconnected")]
    Disconnected,
}

/// One open device link.
pub trait DeviceTransport: Send {
    /// Identity the device enumerated with.
    fn identity(&self) -> DeviceIdentity;

    /// Sends one control packet. Ok means the device acknowledged it.
    fn control_write(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Reads up to `max_len` bytes from the bulk sample endpoint.
    fn bulk_read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Releases the link. Further calls fail with `Disconnected`.
    fn close(&mut self);
}
