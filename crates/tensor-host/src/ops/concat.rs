// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Axis concatenation for rank-3 tensors.

use crate::{Shape, Tensor, TensorError};

/// Concatenates rank-3 tensors along axis 0 or 2.
///
/// All inputs must share dtype and every non-concat dimension. The output
/// dimension on `axis` is the sum of the inputs' dimensions on `axis`.
///
/// Whole-byte inputs may be strided views (their innermost dimension is
/// contiguous by construction); packed 4-bit inputs must be contiguous, and
/// on axis 2 every offset and length along the axis must be even so rows
/// stay on byte boundaries.
pub fn concat(parts: &[Tensor], axis: usize) -> Result<Tensor, TensorError> {
    if axis != 0 && axis != 2 {
        return Err(TensorError::UnsupportedAxis { axis });
    }
    let first = parts.first().ok_or(TensorError::UnsupportedAxis { axis })?;
    let dtype = first.dtype();
    let base_dims = first.shape().dims().to_vec();
    if base_dims.len() != 3 {
        return Err(TensorError::ShapeMismatch {
            op: "concat",
            lhs: first.shape().clone(),
            rhs: Shape::new(vec![0, 0, 0]),
        });
    }

    let mut offsets = Vec::with_capacity(parts.len());
    let mut lens = Vec::with_capacity(parts.len());
    let mut new_dim = 0usize;
    for t in parts {
        if t.dtype() != dtype {
            return Err(TensorError::DTypeMismatch {
                op: "concat",
                lhs: dtype,
                rhs: t.dtype(),
            });
        }
        if dtype.is_sub_byte() && !t.is_contiguous() {
            return Err(TensorError::NonContiguous { op: "concat" });
        }
        let dims = t.shape().dims();
        if dims.len() != 3 {
            return Err(TensorError::ShapeMismatch {
                op: "concat",
                lhs: first.shape().clone(),
                rhs: t.shape().clone(),
            });
        }
        for d in 0..3 {
            if d != axis && dims[d] != base_dims[d] {
                return Err(TensorError::ShapeMismatch {
                    op: "concat",
                    lhs: first.shape().clone(),
                    rhs: t.shape().clone(),
                });
            }
        }
        offsets.push(new_dim);
        lens.push(dims[axis]);
        new_dim += dims[axis];
    }

    let mut out_dims = base_dims.clone();
    out_dims[axis] = new_dim;

    if dtype.is_sub_byte() {
        if axis == 2 {
            for (&off, &len) in offsets.iter().zip(&lens) {
                if off % 2 != 0 || len % 2 != 0 {
                    return Err(TensorError::OddPackedRow {
                        op: "concat",
                        extent: if off % 2 != 0 { off } else { len },
                    });
                }
            }
        }
        return concat_packed(parts, axis, &out_dims, &offsets, &lens, new_dim);
    }

    let out = Tensor::zeros(Shape::new(out_dims), dtype);
    for (t, (&off, &len)) in parts.iter().zip(offsets.iter().zip(&lens)) {
        let slot = out.view(axis, off, len)?;
        t.copy_to(&slot)?;
    }
    Ok(out)
}

/// Packed 4-bit path: raw nibble-wise byte copies.
fn concat_packed(
    parts: &[Tensor],
    axis: usize,
    out_dims: &[usize],
    offsets: &[usize],
    lens: &[usize],
    new_dim: usize,
) -> Result<Tensor, TensorError> {
    let out = Tensor::zeros(Shape::new(out_dims.to_vec()), parts[0].dtype());
    let mut out_data = out.write();
    let dst = out_data.bytes_mut();

    if axis == 0 {
        // Whole-block copies, one per input.
        let mut at = 0usize;
        for t in parts {
            let src_data = t.read();
            let copy_len = t.shape().size_bytes(t.dtype());
            dst[at..at + copy_len].copy_from_slice(&src_data.bytes()[..copy_len]);
            at += copy_len;
        }
    } else {
        // Row-wise: the output row stride is the summed axis-2 extent.
        let rows = out_dims[0] * out_dims[1];
        for (t, (&off, &len)) in parts.iter().zip(offsets.iter().zip(lens)) {
            let src_data = t.read();
            let src = src_data.bytes();
            for r in 0..rows {
                let dst_at = (new_dim * r + off) / 2;
                let src_at = len * r / 2;
                dst[dst_at..dst_at + len / 2].copy_from_slice(&src[src_at..src_at + len / 2]);
            }
        }
    }
    drop(out_data);
    Ok(out)
}
