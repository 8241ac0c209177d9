// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the orchestration core.

use device_api::DeviceError;
use subgraph_ir::GraphError;
use tensor_host::TensorError;

/// Errors that can occur during pipeline construction or inference.
///
/// Only [`RuntimeError::Subgraph`] is recoverable — it feeds the failover
/// controller, which retries on the next device preference. Everything else
/// aborts the construction or the inference that raised it.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A device operation failed on one subgraph. The device driver's
    /// message is preserved behind the failing submodel index.
    #[error("subgraph {subgraph}: {source}")]
    Subgraph {
        subgraph: usize,
        #[source]
        source: DeviceError,
    },

    /// An inter-subgraph link references a subrequest that does not exist.
    #[error("link inconsistency on edge subgraph {from} -> subgraph {to}: {detail}")]
    LinkInconsistency {
        from: usize,
        to: usize,
        detail: String,
    },

    /// Failover ran out of device preferences (or recompilation failed).
    #[error("subgraph {subgraph}: failed to compile, no more devices are left")]
    DevicesExhausted { subgraph: usize },

    /// A subgraph slot has no live subrequest.
    #[error("subgraph {subgraph} has no live subrequest")]
    NotAvailable { subgraph: usize },

    /// The spatial executor was invoked with unstaged inputs or outputs.
    #[error("subgraph {subgraph}: spatial executor: {detail}")]
    Spatial { subgraph: usize, detail: String },

    /// A tensor primitive rejected its operands.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// The partitioned model failed validation.
    #[error("model error: {0}")]
    Graph(#[from] GraphError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
