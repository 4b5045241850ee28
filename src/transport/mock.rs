// src/transport/mock.rs
//! Scripted transport double for engine and session tests
//!
//! Every control write is logged; outcomes for writes and bulk reads are
//! queued ahead of time. The log and script live behind `Arc` so tests
//! keep a handle after the transport moves into the session.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::spec::DeviceIdentity;

use super::{DeviceTransport, TransportError};

#[derive(Debug, Default)]
struct MockState {
    write_results: VecDeque<Result<(), TransportError>>,
    bulk_results: VecDeque<Result<Vec<u8>, TransportError>>,
    writes: Vec<Vec<u8>>,
    bulk_reads: usize,
    closed: bool,
}

/// Shared view of a mock transport's script and log.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Queues a failure for the next unscripted control write.
    pub fn push_write_error(&self, error: TransportError) {
        self.state.lock().write_results.push_back(Err(error));
    }

    /// Queues a successful bulk read returning these bytes.
    pub fn push_bulk(&self, data: Vec<u8>) {
        self.state.lock().bulk_results.push_back(Ok(data));
    }

    pub fn push_bulk_error(&self, error: TransportError) {
        self.state.lock().bulk_results.push_back(Err(error));
    }

    /// All control packets written so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    pub fn bulk_read_count(&self) -> usize {
        self.state.lock().bulk_reads
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Transport whose behavior is entirely scripted by its `MockHandle`.
#[derive(Debug)]
pub struct MockTransport {
    identity: DeviceIdentity,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Mock that enumerates with the given identity. Unscripted writes
    /// succeed and unscripted bulk reads time out.
    pub fn new(identity: DeviceIdentity) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let handle = MockHandle {
            state: Arc::clone(&state),
        };
        (Self { identity, state }, handle)
    }

    /// Mock presenting the demo identity.
    pub fn demo() -> (Self, MockHandle) {
        Self::new(DeviceIdentity {
            vendor_id: 0x0000,
            product_id: 0x0000,
            firmware_version: 0,
        })
    }
}

impl DeviceTransport for MockTransport {
    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn control_write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Disconnected);
        }
        state.writes.push(packet.to_vec());
        state.write_results.pop_front().unwrap_or(Ok(()))
    }

    fn bulk_read(&mut self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Disconnected);
        }
        state.bulk_reads += 1;
        state
            .bulk_results
            .pop_front()
            .unwrap_or(Err(TransportError::Timeout))
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }
}
