// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-host
//!
//! Host-side tensor storage and the small set of primitives the subgraph
//! orchestrator depends on:
//!
//! - [`Tensor`] — a shared-handle, n-dimensional tensor with strided views.
//! - [`DType`] — supported element types, including packed 4-bit.
//! - [`Shape`] — dimension and stride utilities.
//! - [`ops`] — dtype widening, 3-D permutations (incl. packed 4-bit),
//!   axis concatenation, and host-side row gather.
//! - [`unpack`] — dequantisation kernels for weight closures.
//!
//! # Design Goals
//! - Operations work on explicit, pre-allocated buffers — no hidden allocator.
//! - Fail fast on shape or dtype mismatch.
//! - Cheap handle clones; views are zero-copy and share storage.

mod dtype;
mod error;
pub mod ops;
mod shape;
mod tensor;
pub mod unpack;

pub use dtype::{DType, Element};
pub use error::TensorError;
pub use shape::Shape;
pub use tensor::{Tensor, TensorData, TensorDataMut};
