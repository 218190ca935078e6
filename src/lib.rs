// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! QubitOS Gate Set Tomography core
//!
//! This crate provides the parameterized model layer used by QubitOS gate
//! set tomography: model members that share one flat parameter vector,
//! quantum instruments, and forward simulators that compute circuit
//! outcome probabilities together with their Jacobian.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Forward Simulators            │
//! ├──────────────────┬──────────────────────┤
//! │  Torch (tangent  │  Matrix (finite      │
//! │  propagation)    │  differences)        │
//! ├──────────────────┴──────────────────────┤
//! │     ExplicitModel + Circuit Layout       │
//! ├────────────────┬────────────────────────┤
//! │ States / POVMs │ Operations/Instruments │
//! └────────────────┴────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`modelmember`]: Parameterized states, operations and POVMs
//! - [`instrument`]: Instruments and TP instruments
//! - [`model`]: Explicit models and their parameter vector
//! - [`fwdsim`]: Forward simulators
//! - [`error`]: Error types

pub mod basis;
pub mod circuit;
pub mod config;
pub mod error;
pub mod fwdsim;
pub mod instrument;
pub mod label;
pub mod layout;
pub mod logging;
pub mod model;
pub mod modelmember;
pub mod tensor;
pub mod torchable;

pub use config::Config;
pub use error::{Error, Result};

#[cfg(test)]
pub mod test_utils;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
