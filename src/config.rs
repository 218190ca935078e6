// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management for GST models.
//!
//! Configuration is loaded from multiple sources with the following priority
//! (later sources override earlier ones):
//!
//! 1. Built-in defaults
//! 2. gst.yaml file
//! 3. Environment variables (QUBITOS_GST_*)

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::basis::BasisName;
use crate::error::{Error, Result};
use crate::modelmember::EvoType;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Forward-simulation settings
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Model construction defaults
    #[serde(default)]
    pub model: ModelConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = config_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                config = serde_yaml::from_str(&content)?;
            }
        } else {
            for path in &["gst.yaml", "gst.yml", "/etc/qubitos/gst.yaml"] {
                let path = Path::new(path);
                if path.exists() {
                    let content = std::fs::read_to_string(path)?;
                    config = serde_yaml::from_str(&content)?;
                    break;
                }
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Values that fail to parse are ignored with a warning.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("QUBITOS_GST_FORWARD_SIMULATOR") {
            match val.parse() {
                Ok(kind) => self.simulation.forward_simulator = kind,
                Err(e) => tracing::warn!(value = %val, error = %e, "Ignoring QUBITOS_GST_FORWARD_SIMULATOR"),
            }
        }
        if let Ok(val) = env::var("QUBITOS_GST_CLEAN_TOLERANCE") {
            if let Ok(tol) = val.parse() {
                self.simulation.clean_tolerance = tol;
            }
        }
        if let Ok(val) = env::var("QUBITOS_GST_EVOTYPE") {
            match val.parse() {
                Ok(evotype) => self.model.default_evotype = evotype,
                Err(e) => tracing::warn!(value = %val, error = %e, "Ignoring QUBITOS_GST_EVOTYPE"),
            }
        }
        if let Ok(val) = env::var("QUBITOS_GST_BASIS") {
            match val.parse() {
                Ok(basis) => self.model.basis = basis,
                Err(e) => tracing::warn!(value = %val, error = %e, "Ignoring QUBITOS_GST_BASIS"),
            }
        }
        if let Ok(val) = env::var("QUBITOS_GST_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("QUBITOS_GST_LOG_FORMAT") {
            self.logging.format = val;
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let tol = self.simulation.clean_tolerance;
        if !tol.is_finite() || tol <= 0.0 {
            return Err(Error::Config(format!(
                "clean_tolerance must be positive and finite, got {}",
                tol
            )));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(Error::Config(format!(
                "unknown log format '{}', expected json or pretty",
                self.logging.format
            )));
        }
        if self.model.default_evotype != EvoType::DensityMx {
            tracing::warn!(
                evotype = %self.model.default_evotype,
                "Only the densitymx evolution type can be simulated; models will build but not evaluate"
            );
        }
        Ok(())
    }
}

/// Which forward simulator a model binds by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulatorKind {
    /// Forward-mode differentiable simulator
    #[default]
    Torch,
    /// Dense-matrix reference simulator
    Matrix,
}

impl fmt::Display for SimulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulatorKind::Torch => write!(f, "torch"),
            SimulatorKind::Matrix => write!(f, "matrix"),
        }
    }
}

impl FromStr for SimulatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "torch" => Ok(SimulatorKind::Torch),
            "matrix" => Ok(SimulatorKind::Matrix),
            other => Err(Error::Config(format!("unknown forward simulator '{}'", other))),
        }
    }
}

/// Forward-simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Simulator bound to new models
    #[serde(default)]
    pub forward_simulator: SimulatorKind,

    /// Norm below which a dirty member is considered in sync with its
    /// container's cached parameters
    #[serde(default = "default_clean_tolerance")]
    pub clean_tolerance: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            forward_simulator: SimulatorKind::default(),
            clean_tolerance: default_clean_tolerance(),
        }
    }
}

fn default_clean_tolerance() -> f64 {
    1e-8
}

/// Model construction defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Evolution type of new models
    #[serde(default)]
    pub default_evotype: EvoType,

    /// Matrix basis of new models
    #[serde(default)]
    pub basis: BasisName,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "json".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::Mutex;

    // environment variables are process-wide
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.simulation.forward_simulator, SimulatorKind::Torch);
        assert_eq!(config.simulation.clean_tolerance, 1e-8);
        assert_eq!(config.model.default_evotype, EvoType::DensityMx);
        assert_eq!(config.model.basis, BasisName::Pp);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let mut bad_config = Config::default();
        bad_config.simulation.clean_tolerance = 0.0;
        assert!(bad_config.validate().is_err());

        bad_config.simulation.clean_tolerance = f64::NAN;
        assert!(bad_config.validate().is_err());
    }

    #[test]
    fn test_validate_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".into();
        let msg = format!("{}", config.validate().unwrap_err());
        assert!(msg.contains("log format"));
    }

    #[test]
    fn test_config_load_from_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
simulation:
  forward_simulator: matrix
  clean_tolerance: 1.0e-10
model:
  basis: gm
"#
        )
        .unwrap();

        let config = Config::load(Some(f.path())).unwrap();
        assert_eq!(config.simulation.forward_simulator, SimulatorKind::Matrix);
        assert_eq!(config.simulation.clean_tolerance, 1e-10);
        assert_eq!(config.model.basis, BasisName::Gm);
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let path = std::path::Path::new("/tmp/does_not_exist_qubitos_gst_test.yaml");
        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.model.default_evotype, EvoType::DensityMx);
    }

    #[test]
    fn test_config_load_invalid_yaml() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{{{{not: valid: yaml::::").unwrap();

        let result = Config::load(Some(f.path()));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_override_simulator() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut config = Config::default();
        std::env::set_var("QUBITOS_GST_FORWARD_SIMULATOR", "matrix");
        config.apply_env_overrides();
        assert_eq!(config.simulation.forward_simulator, SimulatorKind::Matrix);
        std::env::remove_var("QUBITOS_GST_FORWARD_SIMULATOR");
    }

    #[test]
    fn test_env_override_tolerance_and_basis() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut config = Config::default();
        std::env::set_var("QUBITOS_GST_CLEAN_TOLERANCE", "1e-6");
        std::env::set_var("QUBITOS_GST_BASIS", "not-a-basis");
        config.apply_env_overrides();
        assert_eq!(config.simulation.clean_tolerance, 1e-6);
        assert_eq!(config.model.basis, BasisName::Pp);
        std::env::remove_var("QUBITOS_GST_CLEAN_TOLERANCE");
        std::env::remove_var("QUBITOS_GST_BASIS");
    }

    #[test]
    fn test_env_override_log_level() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut config = Config::default();
        std::env::set_var("QUBITOS_GST_LOG_LEVEL", "debug");
        config.apply_env_overrides();
        assert_eq!(config.logging.level, "debug");
        std::env::remove_var("QUBITOS_GST_LOG_LEVEL");
    }

    #[test]
    fn test_simulator_kind_parse() {
        assert_eq!("Torch".parse::<SimulatorKind>().unwrap(), SimulatorKind::Torch);
        assert!("jax".parse::<SimulatorKind>().is_err());
        assert_eq!(SimulatorKind::Matrix.to_string(), "matrix");
    }
}
