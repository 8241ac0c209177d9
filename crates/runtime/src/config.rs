// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files, string option maps, or
//! constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! funcall_async = true
//! input_copy = "0,3"
//! enable_profiling = true
//! ```
//!
//! # Option-Map Format
//! The same settings arrive from embedders as string options:
//! `NPUW_FUNCALL_ASYNC = "YES"`, `NPUW_INPUT_COPY = "0,3"`.

use std::collections::HashMap;
use std::path::Path;

/// Configuration for the subgraph pipeline.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Enables funcall pipelining: a second subrequest per function body so
    /// the next call's closure can be unpacked while the previous call
    /// executes. Costs extra device memory.
    #[serde(default)]
    pub funcall_async: bool,

    /// Per-submodel gate forcing global inputs to be copied into the
    /// subrequest instead of zero-copy bound. `""`/`"NO"`, `"YES"`, or a
    /// comma-separated submodel index list.
    #[serde(default)]
    pub input_copy: String,

    /// Whether to collect per-subgraph timing metrics.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            funcall_async: false,
            input_copy: String::new(),
            enable_profiling: true,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, super::RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::RuntimeError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, super::RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| super::RuntimeError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, super::RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| super::RuntimeError::Config(format!("TOML serialise error: {e}")))
    }

    /// Builds configuration from a string option map.
    ///
    /// Recognised options: `NPUW_FUNCALL_ASYNC` (`YES`/`NO`/`true`/`false`)
    /// and `NPUW_INPUT_COPY` (per-submodel gate string). Unknown keys are
    /// rejected.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, super::RuntimeError> {
        let mut config = Self::default();
        for (key, value) in options {
            match key.as_str() {
                "NPUW_FUNCALL_ASYNC" => {
                    config.funcall_async = match value.as_str() {
                        "YES" | "yes" | "true" | "1" => true,
                        "NO" | "no" | "false" | "0" | "" => false,
                        other => {
                            return Err(super::RuntimeError::Config(format!(
                                "NPUW_FUNCALL_ASYNC: expected YES/NO, got '{other}'"
                            )))
                        }
                    };
                }
                "NPUW_INPUT_COPY" => config.input_copy = value.clone(),
                other => {
                    return Err(super::RuntimeError::Config(format!(
                        "unknown option '{other}'"
                    )))
                }
            }
        }
        Ok(config)
    }

    /// Whether global inputs of submodel `sub_idx` must be copied rather
    /// than zero-copy bound.
    pub fn needs_copy(&self, sub_idx: usize) -> bool {
        is_set(sub_idx, &self.input_copy)
    }
}

/// Evaluates a per-submodel option gate.
///
/// `""` and `"NO"` are false for every submodel; `"YES"` is true for every
/// submodel; anything else is read as a comma-separated index list and is
/// true iff `sub_idx` appears in it. Malformed entries are skipped.
pub fn is_set(sub_idx: usize, opt: &str) -> bool {
    if opt.is_empty() || opt == "NO" {
        return false;
    }
    if opt == "YES" {
        return true;
    }
    opt.split(',').any(|item| {
        let item = item.trim();
        match item.parse::<usize>() {
            Ok(idx) => idx == sub_idx,
            Err(_) => {
                tracing::warn!("ignoring malformed gate entry '{item}'");
                false
            }
        }
    })
}
