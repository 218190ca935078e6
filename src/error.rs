// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the GST model layer.
//!
//! Three failure families matter to callers:
//!
//! - [`Error::Structure`]: the parameter layout or the model structure is
//!   inconsistent (programming or integration error on the caller's side).
//! - [`Error::NotImplemented`]: a configuration this crate refuses to
//!   approximate (ambiguous circuit expansions, time dependence, ...).
//! - [`Error::ReadOnly`]: structural mutation of a frozen container.
//!
//! None of them is retried locally; they surface to the caller as-is.

use std::fmt;

/// Result type alias for model-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Model-layer error types.
#[derive(Debug)]
pub enum Error {
    /// Configuration error
    Config(String),
    /// Structural violation of the parameter layout or model structure
    Structure(StructureError),
    /// Unsupported configuration
    NotImplemented(String),
    /// Attempt to alter a frozen container
    ReadOnly(String),
    /// Invalid parameterization conversion
    Conversion(String),
    /// Numerical failure (singular matrix, non-finite values)
    Numeric(String),
    /// IO error
    Io(std::io::Error),
    /// Serialization error
    Serialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Structure(e) => write!(f, "Structure error: {}", e),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::ReadOnly(msg) => write!(f, "Read-only: {}", msg),
            Error::Conversion(msg) => write!(f, "Conversion error: {}", msg),
            Error::Numeric(msg) => write!(f, "Numeric error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Structure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<StructureError> for Error {
    fn from(e: StructureError) -> Self {
        Error::Structure(e)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Error::Structure(StructureError::Shape(e.to_string()))
    }
}

/// Structural violations.
#[derive(Debug, Clone, PartialEq)]
pub enum StructureError {
    /// Members of one container disagree on their dimension
    DimensionMismatch { expected: usize, actual: usize },
    /// Members of one container disagree on their evolution type
    EvotypeMismatch { expected: String, actual: String },
    /// Parameter vector has the wrong length
    VectorLength { expected: usize, actual: usize },
    /// Layout element ranges are not contiguous from zero
    LayoutGap(String),
    /// A member's parameter indices are not where the snapshot expects them
    IndexDrift {
        label: String,
        expected_start: usize,
        actual: String,
    },
    /// Member labels changed between snapshot and evaluation
    LabelDrift { expected: String, actual: String },
    /// A label does not resolve to any model member
    UnknownLabel(String),
    /// A member has no parameter indices yet
    Unallocated(String),
    /// A trace-preservation constraint is violated
    TraceConstraint(String),
    /// Array shape mismatch
    Shape(String),
}

impl fmt::Display for StructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            StructureError::EvotypeMismatch { expected, actual } => {
                write!(
                    f,
                    "Evolution type mismatch: expected {}, got {}",
                    expected, actual
                )
            }
            StructureError::VectorLength { expected, actual } => {
                write!(
                    f,
                    "Parameter vector length mismatch: expected {}, got {}",
                    expected, actual
                )
            }
            StructureError::LayoutGap(msg) => write!(f, "Layout is not contiguous: {}", msg),
            StructureError::IndexDrift {
                label,
                expected_start,
                actual,
            } => write!(
                f,
                "Parameter indices of '{}' drifted: expected start {}, got {}",
                label, expected_start, actual
            ),
            StructureError::LabelDrift { expected, actual } => {
                write!(f, "Label drift: expected '{}', got '{}'", expected, actual)
            }
            StructureError::UnknownLabel(label) => write!(f, "Unknown label: {}", label),
            StructureError::Unallocated(label) => {
                write!(f, "Member '{}' has no parameter indices", label)
            }
            StructureError::TraceConstraint(msg) => {
                write!(f, "Trace-preservation constraint violated: {}", msg)
            }
            StructureError::Shape(msg) => write!(f, "Shape error: {}", msg),
        }
    }
}

impl std::error::Error for StructureError {}
