// src/config/loader.rs
//! Layered configuration loading
//!
//! Precedence, lowest first: built-in defaults, one TOML file, then
//! `DSO_*` environment overrides (`DSO_SCOPE__SAMPLE_RATE_HZ=2000000`
//! style, `__` separating nesting levels). The loader only produces a
//! `DsoConfig`; validation against a model happens when a session opens,
//! because the model is not known until the device enumerates.

use std::path::PathBuf;
use std::sync::Arc;

use ::config::{Config, Environment, File};
use tracing::debug;

use crate::config::{CalibrationData, ConfigError, DsoConfig};
use crate::spec::ModelSpec;

const ENV_PREFIX: &str = "DSO";
const DEFAULT_FILE_STEM: &str = "dso";

/// Builds `DsoConfig` values from defaults, a file and the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader that looks for an optional `dso.toml` in the working
    /// directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader reading this exact file; missing file is an error.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<DsoConfig, ConfigError> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&DsoConfig::default())?);

        builder = match &self.file {
            Some(path) => builder.add_source(File::from(path.clone()).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_FILE_STEM).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: DsoConfig = builder.build()?.try_deserialize()?;
        debug!(
            file = ?self.file,
            rate_hz = config.scope.sample_rate_hz,
            record_length = config.scope.record_length,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Resolves the calibration referenced by a loaded configuration,
    /// falling back to identity calibration when none is configured.
    /// Relative paths resolve against the config file's directory.
    pub fn load_calibration(
        &self,
        config: &DsoConfig,
        spec: &ModelSpec,
    ) -> Result<Arc<CalibrationData>, ConfigError> {
        let Some(file) = &config.calibration_file else {
            return Ok(CalibrationData::shared_default(spec));
        };

        let path = if file.is_relative() {
            match self.file.as_ref().and_then(|f| f.parent()) {
                Some(dir) => dir.join(file),
                None => file.clone(),
            }
        } else {
            file.clone()
        };
        Ok(Arc::new(CalibrationData::load_file(&path, spec)?))
    }
}
