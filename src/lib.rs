// src/lib.rs
//! dso-core: acquisition engine and sample pipeline for USB digital
//! storage oscilloscopes
//!
//! The crate drives a vendor USB protocol from configuration through bulk
//! capture to calibrated, triggered sample sets:
//!
//! - Per-model capability tables parametrizing gain, rates and calibration
//! - Fixed-format control-packet encoding and bulk-frame assembly
//! - An acquisition state machine owning the transport, with bounded
//!   retry/backoff and drop-oldest frame hand-off
//! - A pure raw-to-volts converter with downsampling and trigger alignment
//! - A staged post-processing pipeline (export tap, math channel,
//!   spectrum, display graph) publishing to subscribers
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dso_core::config::DsoConfig;
//! use dso_core::spec::ModelRegistry;
//! use dso_core::transport::DemoTransport;
//! use dso_core::Session;
//!
//! fn main() -> dso_core::Result<()> {
//!     let mut session = Session::open(
//!         Box::new(DemoTransport::new()),
//!         &ModelRegistry::builtin(),
//!         DsoConfig::default(),
//!         None,
//!     )?;
//!
//!     let samples = session.subscribe_channel();
//!     session.handle().enable_sampling(true)?;
//!
//!     for set in samples.iter().take(10) {
//!         println!("cycle {}: {} samples", set.cycle, set.sample_count());
//!     }
//!
//!     session.shutdown()
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod acquisition;
pub mod config;
pub mod convert;
pub mod error;
pub mod notify;
pub mod processing;
pub mod protocol;
pub mod samples;
pub mod session;
pub mod spec;
pub mod transport;

// Re-export the types most consumers touch.
pub use acquisition::AcqState;
pub use config::{DsoConfig, PostProcessingConfig, ScopeConfig};
pub use error::{DsoError, Result};
pub use notify::{StatusEvent, Subscriber};
pub use samples::{ChannelSource, ChannelTrace, SampleSet, TriggerOutcome};
pub use session::{ControlHandle, Session};
pub use spec::{DeviceIdentity, ModelRegistry, ModelSpec};
pub use transport::{DeviceTransport, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "dso-core");
    }
}
