// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-api
//!
//! The contracts between the orchestration core and a device backend:
//!
//! - [`CompiledSubgraph`] — a subgraph compiled for one device; a factory
//!   for inference requests.
//! - [`InferRequest`] — a single request with bindable input/output tensors,
//!   synchronous and asynchronous execution, cancellation, callbacks,
//!   variable state, and profiling.
//! - [`WeightsBank`] — a content-addressed store of device-resident weight
//!   tensors, shared across requests.
//!
//! The [`host`] module provides a reference backend that executes subgraph
//! bodies as host closures. It backs the test suites and the demo CLI, and
//! doubles as a template for real device integrations.

mod bank;
mod error;
pub mod host;
mod request;

pub use bank::{TensorBank, WeightsBank};
pub use error::DeviceError;
pub use request::{
    CompiledSubgraph, CompletionCallback, InferRequest, Port, PortDesc, ProfilingRecord,
    VariableState,
};
