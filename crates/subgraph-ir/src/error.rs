// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for partitioned-model validation.

/// Errors raised while validating a [`crate::PartitionedModel`].
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A function call references an invalid or malformed body.
    #[error("invalid function call at subgraph {index}: {detail}")]
    InvalidFuncall { index: usize, detail: String },

    /// Closure/scale/zero-point/update vectors disagree with each other or
    /// with the body's input range.
    #[error("closure arity mismatch at subgraph {index}: {detail}")]
    ClosureArity { index: usize, detail: String },

    /// Spatial execution parameters are inconsistent.
    #[error("invalid spatial plan at subgraph {index}: {detail}")]
    InvalidSpatial { index: usize, detail: String },

    /// A link table points outside the model.
    #[error("link out of range: {detail}")]
    LinkOutOfRange { detail: String },

    /// An inter-subgraph link runs against the execution order.
    #[error("link from subgraph {from} to {to} violates topological order")]
    NotTopological { from: usize, to: usize },

    /// A global table does not cover the model's ports.
    #[error("link table arity mismatch: {detail}")]
    TableArity { detail: String },

    /// A compiled submodel carries no device preferences.
    #[error("subgraph {index} has no device preference list")]
    MissingDevice { index: usize },
}
