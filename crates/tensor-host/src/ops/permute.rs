// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! 3-D permutations, including packed 4-bit layouts.
//!
//! Packed tensors are addressed as 2-D nibble grids: element `(r, c)` of a
//! grid with `cols` columns lives in byte `r * cols / 2 + c / 2`, low nibble
//! when `c` is even, high nibble when odd. Rows must therefore start on byte
//! boundaries, which the entry points check up front.

use crate::{DType, Shape, Tensor, TensorError};

#[inline]
fn hi4(x: u8) -> u8 {
    x >> 4
}

#[inline]
fn lo4(x: u8) -> u8 {
    x & 0xF
}

#[inline]
fn read_4b(data: &[u8], r: usize, c: usize, cols: usize) -> u8 {
    let byte = data[r * cols / 2 + c / 2];
    if c % 2 == 0 {
        lo4(byte)
    } else {
        hi4(byte)
    }
}

#[inline]
fn write_4b(data: &mut [u8], value: u8, r: usize, c: usize, cols: usize) {
    let byte = &mut data[r * cols / 2 + c / 2];
    if c % 2 == 0 {
        *byte = (hi4(*byte) << 4) | lo4(value);
    } else {
        *byte = (lo4(value) << 4) | lo4(*byte);
    }
}

fn check_packed_3d(t: &Tensor, op: &'static str) -> Result<[usize; 3], TensorError> {
    if !t.dtype().is_sub_byte() {
        return Err(TensorError::UnsupportedDType {
            op,
            dtype: t.dtype(),
        });
    }
    let dims = t.shape().dims();
    if dims.len() != 3 {
        return Err(TensorError::ShapeMismatch {
            op,
            lhs: t.shape().clone(),
            rhs: Shape::new(vec![0, 0, 0]),
        });
    }
    Ok([dims[0], dims[1], dims[2]])
}

fn check_even(extent: usize, op: &'static str) -> Result<(), TensorError> {
    if extent % 2 != 0 {
        return Err(TensorError::OddPackedRow { op, extent });
    }
    Ok(())
}

/// Permutes a packed 4-bit 3-D tensor with axes `(2, 0, 1)`.
///
/// The result has shape `(s2, s0, s1)` and the same packed encoding:
/// `out[i0, i1, i2] == t[i1, i2, i0]`.
pub fn transpose(t: &Tensor) -> Result<Tensor, TensorError> {
    let [s0, s1, s2] = check_packed_3d(t, "transpose")?;
    // Input is walked as (s0*s1) x s2 nibbles, output as s2 x (s0*s1).
    check_even(s2, "transpose")?;
    check_even(s0 * s1, "transpose")?;

    let out = Tensor::zeros(Shape::new(vec![s2, s0, s1]), t.dtype());
    let in_rows = s0 * s1;
    let in_cols = s2;
    {
        let src = t.read();
        let mut dst = out.write();
        let src_bytes = src.bytes();
        let dst_bytes = dst.bytes_mut();
        for i in 0..in_rows {
            for j in 0..in_cols {
                let value = read_4b(src_bytes, i, j, in_cols);
                write_4b(dst_bytes, value, j, i, in_rows);
            }
        }
    }
    Ok(out)
}

/// Permutes a 3-D tensor by the given axes.
///
/// Supported permutations and dtype constraints:
/// - `(2, 0, 1)` — packed 4-bit only; delegates to [`transpose`].
/// - `(0, 2, 1)` — packed 4-bit only.
/// - `(1, 0, 2)` — packed 4-bit only.
/// - `(1, 2, 0)` — f16 and f32 only (moved as 16- or 32-bit payloads).
///
/// Any other permutation is a precondition violation.
pub fn permute(t: &Tensor, axes: [usize; 3]) -> Result<Tensor, TensorError> {
    match axes {
        [2, 0, 1] => transpose(t),
        [0, 2, 1] => permute021(t),
        [1, 0, 2] => permute102(t),
        [1, 2, 0] => permute120(t),
        _ => Err(TensorError::UnsupportedPermutation { axes }),
    }
}

/// `out[p, c, r] == t[p, r, c]`, packed 4-bit, output shape `(s0, s2, s1)`.
fn permute021(t: &Tensor) -> Result<Tensor, TensorError> {
    let [s0, s1, s2] = check_packed_3d(t, "permute(0,2,1)")?;
    check_even(s2, "permute(0,2,1)")?;
    check_even(s1, "permute(0,2,1)")?;

    let out = Tensor::zeros(Shape::new(vec![s0, s2, s1]), t.dtype());
    {
        let src = t.read();
        let mut dst = out.write();
        let src_bytes = src.bytes();
        let dst_bytes = dst.bytes_mut();
        for p in 0..s0 {
            for r in 0..s1 {
                for c in 0..s2 {
                    let value = read_4b(src_bytes, p * s1 + r, c, s2);
                    write_4b(dst_bytes, value, p * s2 + c, r, s1);
                }
            }
        }
    }
    Ok(out)
}

/// `out[r, p, c] == t[p, r, c]`, packed 4-bit, output shape `(s1, s0, s2)`.
fn permute102(t: &Tensor) -> Result<Tensor, TensorError> {
    let [s0, s1, s2] = check_packed_3d(t, "permute(1,0,2)")?;
    check_even(s2, "permute(1,0,2)")?;

    let out = Tensor::zeros(Shape::new(vec![s1, s0, s2]), t.dtype());
    {
        let src = t.read();
        let mut dst = out.write();
        let src_bytes = src.bytes();
        let dst_bytes = dst.bytes_mut();
        // Iterate over output coordinates.
        for p in 0..s1 {
            for r in 0..s0 {
                for c in 0..s2 {
                    let value = read_4b(src_bytes, r, p * s2 + c, s1 * s2);
                    write_4b(dst_bytes, value, p * s0 + r, c, s2);
                }
            }
        }
    }
    Ok(out)
}

/// `out[i0, i1, i2] == t[i2, i0, i1]`, 16/32-bit payloads, output `(s1, s2, s0)`.
fn permute120(t: &Tensor) -> Result<Tensor, TensorError> {
    let dims = t.shape().dims();
    if dims.len() != 3 {
        return Err(TensorError::ShapeMismatch {
            op: "permute(1,2,0)",
            lhs: t.shape().clone(),
            rhs: Shape::new(vec![0, 0, 0]),
        });
    }
    if !t.is_full() {
        return Err(TensorError::NonContiguous {
            op: "permute(1,2,0)",
        });
    }
    let [s0, s1, s2] = [dims[0], dims[1], dims[2]];
    let out = Tensor::zeros(Shape::new(vec![s1, s2, s0]), t.dtype());
    match t.dtype() {
        DType::F32 => permute120_payload::<u32>(t, &out, [s0, s1, s2]),
        DType::F16 => permute120_payload::<u16>(t, &out, [s0, s1, s2]),
        dtype => {
            return Err(TensorError::UnsupportedDType {
                op: "permute(1,2,0)",
                dtype,
            })
        }
    }
    Ok(out)
}

/// Moves raw payloads; `T` only fixes the element width.
fn permute120_payload<T: crate::Element>(src: &Tensor, dst: &Tensor, [s0, s1, s2]: [usize; 3]) {
    let src_data = src.read();
    let mut dst_data = dst.write();
    let esize = std::mem::size_of::<T>();
    let src_bytes = src_data.bytes();
    let dst_bytes = dst_data.bytes_mut();
    for b in 0..s1 {
        for r in 0..s2 {
            for c in 0..s0 {
                let dst_idx = b * s2 * s0 + r * s0 + c;
                let src_idx = c * s1 * s2 + b * s2 + r;
                dst_bytes[dst_idx * esize..(dst_idx + 1) * esize]
                    .copy_from_slice(&src_bytes[src_idx * esize..(src_idx + 1) * esize]);
            }
        }
    }
}
