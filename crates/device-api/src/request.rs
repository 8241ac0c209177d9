// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiled-subgraph and inference-request contracts.

use crate::DeviceError;
use std::time::Duration;
use tensor_host::{DType, Shape, Tensor};

/// Identifies one tensor binding point of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    /// The n-th input of the subgraph.
    Input(usize),
    /// The n-th output of the subgraph.
    Output(usize),
}

/// Shape and dtype of one subgraph port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDesc {
    pub shape: Shape,
    pub dtype: DType,
}

impl PortDesc {
    pub fn new(shape: Shape, dtype: DType) -> Self {
        Self { shape, dtype }
    }
}

/// One profiling record reported by a request.
#[derive(Debug, Clone)]
pub struct ProfilingRecord {
    /// Name of the profiled node (the orchestrator prefixes it with the
    /// owning subgraph index).
    pub node_name: String,
    /// Wall-clock time.
    pub real_time: Duration,
    /// CPU time.
    pub cpu_time: Duration,
}

/// A named piece of mutable request state (e.g. a KV-cache block).
#[derive(Debug, Clone)]
pub struct VariableState {
    pub name: String,
    pub state: Tensor,
}

/// Completion callback attached via [`InferRequest::set_callback`].
///
/// Invoked after each completed inference with the outcome.
pub type CompletionCallback = Box<dyn Fn(Result<(), &DeviceError>) + Send + Sync>;

/// A subgraph compiled for one concrete device.
pub trait CompiledSubgraph: Send + Sync {
    /// The device this subgraph was compiled for.
    fn device(&self) -> &str;

    /// Input port descriptors, activations first, closure slots after.
    fn inputs(&self) -> &[PortDesc];

    /// Output port descriptors.
    fn outputs(&self) -> &[PortDesc];

    /// Creates a fresh inference request over this compiled subgraph.
    fn create_request(&self) -> Result<Box<dyn InferRequest>, DeviceError>;
}

/// One inference request over a compiled subgraph.
///
/// Methods take `&self`: a backend synchronises its own binding tables, and
/// this is what lets the orchestrator prepare one request while another is
/// in flight.
pub trait InferRequest: Send + Sync {
    /// Binds a tensor to a port. The request reads inputs from and writes
    /// outputs to the bound tensors at `infer` time.
    fn set_tensor(&self, port: Port, tensor: Tensor) -> Result<(), DeviceError>;

    /// Returns the tensor currently bound to a port (backends pre-bind
    /// freshly allocated tensors at creation).
    fn get_tensor(&self, port: Port) -> Result<Tensor, DeviceError>;

    /// Runs the request synchronously.
    fn infer(&self) -> Result<(), DeviceError>;

    /// Starts the request asynchronously; joined by [`InferRequest::wait`].
    fn start_async(&self) -> Result<(), DeviceError>;

    /// Joins a request started with [`InferRequest::start_async`].
    fn wait(&self) -> Result<(), DeviceError>;

    /// Requests cooperative cancellation. Does not unwind bound state.
    fn cancel(&self);

    /// Attaches a completion callback.
    fn set_callback(&self, callback: CompletionCallback);

    /// Returns the request's variable states.
    fn query_state(&self) -> Vec<VariableState>;

    /// Returns profiling records for the last execution.
    fn profiling_info(&self) -> Vec<ProfilingRecord>;
}
