// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types surfaced by device backends.

/// Errors a device backend can raise.
///
/// The orchestrator treats [`DeviceError::InferFailed`] as recoverable
/// (device failover); everything else is fatal to the operation that
/// triggered it.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device failed to execute an inference request.
    #[error("infer failed on device '{device}': {reason}")]
    InferFailed { device: String, reason: String },

    /// The subgraph could not be compiled for the device.
    #[error("cannot compile subgraph for device '{device}': {reason}")]
    CompileFailed { device: String, reason: String },

    /// The device could not create an inference request.
    #[error("request creation failed on device '{device}': {reason}")]
    RequestCreation { device: String, reason: String },

    /// A tensor was bound to a port the request does not have.
    #[error("invalid {kind} port {index}: request has {count}")]
    InvalidPort {
        kind: &'static str,
        index: usize,
        count: usize,
    },

    /// A tensor's shape or dtype does not match the port it was bound to.
    #[error("cannot bind {actual} tensor to {kind} port {index} expecting {expected}")]
    BindMismatch {
        kind: &'static str,
        index: usize,
        expected: String,
        actual: String,
    },

    /// `wait` was called with no request in flight.
    #[error("no request in flight")]
    NotStarted,

    /// `start_async` was called while a request was already in flight.
    #[error("a request is already in flight")]
    AlreadyInFlight,

    /// A tensor operation failed inside a host kernel.
    #[error("kernel error: {0}")]
    Kernel(#[from] tensor_host::TensorError),
}
