// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-side row gather (embedding lookup).

use crate::{DType, Shape, Tensor, TensorError};

/// Copies rows of `src` selected by `idx` into `dst`.
///
/// - `src` is 2-D `[V, W]`, f16 or f32.
/// - `idx` is `[1, N]` with i64 entries in `[0, V)`.
/// - `dst` is 3-D `[*, *, W]` with the same dtype as `src`; its leading
///   dimensions flatten to `N` rows.
///
/// Row `r` of `dst` is a bytewise copy of row `idx[r]` of `src`.
pub fn gather(src: &Tensor, idx: &Tensor, dst: &Tensor) -> Result<(), TensorError> {
    if idx.dtype() != DType::I64 {
        return Err(TensorError::DTypeMismatch {
            op: "gather (indices)",
            lhs: DType::I64,
            rhs: idx.dtype(),
        });
    }
    if !matches!(src.dtype(), DType::F16 | DType::F32) {
        return Err(TensorError::UnsupportedDType {
            op: "gather",
            dtype: src.dtype(),
        });
    }
    if src.dtype() != dst.dtype() {
        return Err(TensorError::DTypeMismatch {
            op: "gather",
            lhs: src.dtype(),
            rhs: dst.dtype(),
        });
    }
    // Row addressing below goes straight at storage, so windows are out.
    if !src.is_full() || !idx.is_full() || !dst.is_full() {
        return Err(TensorError::NonContiguous { op: "gather" });
    }

    let src_dims = src.shape().dims();
    let idx_dims = idx.shape().dims();
    let dst_dims = dst.shape().dims();
    let shapes_ok = src_dims.len() == 2
        && idx_dims.len() == 2
        && idx_dims[0] == 1
        && dst_dims.len() == 3
        && dst_dims[2] == src_dims[1]
        && dst_dims[0] * dst_dims[1] == idx_dims[1];
    if !shapes_ok {
        return Err(TensorError::ShapeMismatch {
            op: "gather",
            lhs: Shape::new(src_dims.to_vec()),
            rhs: Shape::new(dst_dims.to_vec()),
        });
    }

    let rows = src_dims[0];
    let row_bytes = src_dims[1] * src.dtype().size_bytes();

    let src_data = src.read();
    let idx_data = idx.read();
    let mut dst_data = dst.write();
    let indices = idx_data.as_slice::<i64>();
    let src_bytes = src_data.bytes();
    let dst_bytes = dst_data.bytes_mut();

    for (r, &row) in indices.iter().enumerate() {
        if row < 0 || row as usize >= rows {
            return Err(TensorError::IndexOutOfBounds { index: row, rows });
        }
        let s = row as usize * row_bytes;
        let d = r * row_bytes;
        dst_bytes[d..d + row_bytes].copy_from_slice(&src_bytes[s..s + row_bytes]);
    }
    Ok(())
}
