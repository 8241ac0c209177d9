// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor operations.

use crate::{DType, Shape};

/// Errors that can occur during tensor operations.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// Two tensors have incompatible shapes for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// The provided buffer size does not match the expected size.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype} for {op}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    /// Two tensors have different data types where the same one is required.
    #[error("dtype mismatch in {op}: {lhs} vs {rhs}")]
    DTypeMismatch {
        op: &'static str,
        lhs: DType,
        rhs: DType,
    },

    /// The requested 3-D permutation is not one of the supported set.
    #[error("unsupported permutation {axes:?}")]
    UnsupportedPermutation { axes: [usize; 3] },

    /// Concatenation was requested along an unsupported axis.
    #[error("unsupported concat axis {axis}")]
    UnsupportedAxis { axis: usize },

    /// Sub-byte tensors cannot be sliced at element granularity.
    #[error("sub-byte tensors cannot be viewed (no safe mid-byte boundary)")]
    SubByteView,

    /// A view was requested outside the tensor's extent.
    #[error("view out of bounds: dim {dim} covers [{from}, {to}) of extent {extent}")]
    ViewOutOfBounds {
        dim: usize,
        from: usize,
        to: usize,
        extent: usize,
    },

    /// A gather index points outside the vocabulary.
    #[error("gather index {index} out of range for {rows} source rows")]
    IndexOutOfBounds { index: i64, rows: usize },

    /// Source and destination of a copy share storage.
    #[error("copy between views of the same storage is not supported")]
    AliasedCopy,

    /// The operation requires contiguous tensors.
    #[error("{op} requires contiguous tensors")]
    NonContiguous { op: &'static str },

    /// A packed 4-bit row would start mid-byte.
    #[error("{op}: packed 4-bit rows must start on byte boundaries (extent {extent} is odd)")]
    OddPackedRow { op: &'static str, extent: usize },

    /// Scale/zero-point groups do not tile the weight tensor.
    #[error("{op}: {groups} groups do not divide {elems} weight elements")]
    BadGroupShape {
        op: &'static str,
        groups: usize,
        elems: usize,
    },
}
