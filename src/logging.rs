// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Logging setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the embedding application, which can call [`init`] with the loaded
//! [`LoggingConfig`].

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Build the level filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::Config(format!("invalid log level '{}': {}", config.level, e))),
    }
}

/// Install a global subscriber.
///
/// Fails if the configuration is invalid or a subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format.as_str() {
        "json" => registry.with(fmt::layer().json().with_target(true)).try_init(),
        "pretty" => registry.with(fmt::layer().pretty().with_target(true)).try_init(),
        other => {
            return Err(Error::Config(format!(
                "unknown log format '{}', expected json or pretty",
                other
            )))
        }
    };
    installed.map_err(|e| Error::Config(format!("failed to install logger: {}", e)))
}
