// src/error.rs
//! Top-level error type
//!
//! Each module keeps its own structured error enum close to the code that
//! raises it; `DsoError` is the aggregate the public API surfaces. Module
//! errors convert with `?` at the session boundary.

use thiserror::Error;

use crate::acquisition::AcquisitionError;
use crate::config::{CalibrationError, ConfigError};
use crate::convert::ConvertError;
use crate::processing::StageError;
use crate::protocol::ProtocolError;
use crate::spec::SpecError;
use crate::transport::TransportError;

/// Result alias for the crate's public API.
pub type Result<T> = std::result::Result<T, DsoError>;

/// Anything the core can fail with, by subsystem.
#[derive(Debug, Error)]
pub enum DsoError {
    #[error("configuration rejected: {0}")]
    Config(ConfigError),

    #[error("model tables: {0}")]
    Spec(#[from] SpecError),

    #[error("control protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("acquisition: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("sample conversion: {0}")]
    Convert(#[from] ConvertError),

    #[error("calibration: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("post-processing: {0}")]
    Stage(#[from] StageError),

    /// A control call arrived after the session shut down.
    #[error("session is stopped")]
    SessionStopped,

    /// The acquisition thread failed to drain within the shutdown window.
    #[error("shutdown timed out after {waited_ms} ms")]
    ShutdownTimeout { waited_ms: u64 },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

// Validation wraps model-table and calibration rejections in `ConfigError`;
// unwrap them here so callers match on the subsystem that said no.
impl From<ConfigError> for DsoError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::Spec(spec) => DsoError::Spec(spec),
            ConfigError::Calibration(calibration) => DsoError::Calibration(calibration),
            other => DsoError::Config(other),
        }
    }
}

impl DsoError {
    /// True for failures that end the session rather than a single cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DsoError::Acquisition(_) | DsoError::Transport(_) | DsoError::ShutdownTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_errors_convert() {
        fn raises() -> Result<()> {
            Err(ConfigError::NoChannelsEnabled)?
        }
        assert!(matches!(raises(), Err(DsoError::Config(_))));
    }

    #[test]
    fn test_nested_spec_rejection_keeps_its_variant() {
        let nested = ConfigError::Spec(SpecError::UnsupportedRate {
            requested_hz: 123.456,
            nearest_hz: 1e6,
        });
        assert!(matches!(DsoError::from(nested), DsoError::Spec(_)));
    }

    #[test]
    fn test_fatal_classification() {
        let fatal = DsoError::Acquisition(AcquisitionError::Disconnected);
        assert!(fatal.is_fatal());
        let benign = DsoError::Config(ConfigError::NoChannelsEnabled);
        assert!(!benign.is_fatal());
    }

    #[test]
    fn test_display_carries_subsystem() {
        let err = DsoError::Transport(TransportError::Timeout);
        assert_eq!(err.to_string(), "transport: transfer timed out");
    }
}
