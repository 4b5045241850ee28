// src/config/constants.rs
//! Fixed operating constants shared across the crate
//!
//! Tunables that are neither per-model hardware truth nor user
//! configuration live here, grouped by the subsystem that owns them.

/// Bulk-transfer geometry and timing.
pub mod transfer {
    /// Bytes requested per bulk read.
    pub const BULK_CHUNK_BYTES: usize = 16 * 1024;

    /// Timeout for one bulk read.
    pub const BULK_TIMEOUT_MS: u64 = 100;

    /// Poll interval while sampling is disabled.
    pub const IDLE_POLL_MS: u64 = 50;
}

/// Retry policy for transport failures.
pub mod retry {
    /// Retries after the initial failed attempt. Exhaustion is fatal.
    pub const MAX_TRANSPORT_RETRIES: u32 = 3;

    /// First backoff delay; doubles per retry.
    pub const BASE_BACKOFF_MS: u64 = 10;

    /// Backoff ceiling.
    pub const MAX_BACKOFF_MS: u64 = 250;

    /// Consecutive malformed frames tolerated before escalating.
    pub const MALFORMED_FRAME_THRESHOLD: u32 = 5;
}

/// Hand-off queue depths. All bounded; frame and sample producers drop
/// the oldest entry when full, favoring freshness over completeness.
pub mod queues {
    /// Raw frames from the acquisition thread to the pipeline.
    pub const FRAME_QUEUE_CAP: usize = 4;

    /// Finished sample sets to a polling subscriber.
    pub const SAMPLE_QUEUE_CAP: usize = 8;

    /// Control requests from callers to the acquisition thread.
    pub const CONTROL_QUEUE_CAP: usize = 32;
}

/// Trigger and shutdown timing.
pub mod timing {
    /// Free-run delay in AUTO mode when no trigger is found.
    pub const AUTO_TRIGGER_TIMEOUT_MS: u64 = 500;

    /// Shutdown waits at least this long for the acquisition thread.
    pub const DRAIN_WAIT_FLOOR_MS: u64 = 10_000;

    /// Shutdown wait as a multiple of one record duration.
    pub const DRAIN_WAIT_RECORD_FACTOR: u32 = 2;
}

/// Display-graph geometry.
pub mod display {
    /// Vertical divisions on the reference screen.
    pub const DIVS_VOLTAGE: f64 = 8.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_range_consistent() {
        assert!(retry::BASE_BACKOFF_MS < retry::MAX_BACKOFF_MS);
        assert!(retry::MAX_TRANSPORT_RETRIES >= 1);
        assert!(retry::MALFORMED_FRAME_THRESHOLD >= 1);
    }

    #[test]
    fn test_queue_depths_positive() {
        assert!(queues::FRAME_QUEUE_CAP >= 1);
        assert!(queues::SAMPLE_QUEUE_CAP >= 1);
        assert!(queues::CONTROL_QUEUE_CAP >= 1);
    }

    #[test]
    fn test_chunk_holds_whole_dual_channel_samples() {
        assert_eq!(transfer::BULK_CHUNK_BYTES % 2, 0);
    }

    #[test]
    fn test_drain_floor_exceeds_bulk_timeout() {
        assert!(timing::DRAIN_WAIT_FLOOR_MS > transfer::BULK_TIMEOUT_MS);
    }
}
