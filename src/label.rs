// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Labels for model members and circuit outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A model-member label: a name plus the state-space labels it acts on.
///
/// Displays as `Gx` when no state-space labels are attached and as
/// `Gx:0` / `Gcnot:0:1` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub sslbls: Vec<u32>,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sslbls: Vec::new(),
        }
    }

    pub fn with_sslbls(name: impl Into<String>, sslbls: impl Into<Vec<u32>>) -> Self {
        Self {
            name: name.into(),
            sslbls: sslbls.into(),
        }
    }

    /// Label of an instrument element: `<name>_<key>` on the same qubits.
    pub fn element(&self, key: &str) -> Self {
        Self {
            name: format!("{}_{}", self.name, key),
            sslbls: self.sslbls.clone(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for s in &self.sslbls {
            write!(f, ":{}", s)?;
        }
        Ok(())
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Label::new(name)
    }
}

/// An outcome label: the ordered instrument keys followed by the effect label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outcome(pub Vec<String>);

impl Outcome {
    pub fn new<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        Outcome(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Instrument keys preceding the final effect label.
    pub fn prefix(&self) -> &[String] {
        match self.0.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// The final effect label, if any.
    pub fn effect(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(","))
    }
}

impl From<&str> for Outcome {
    fn from(effect: &str) -> Self {
        Outcome(vec![effect.to_string()])
    }
}
