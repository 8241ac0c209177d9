// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dequantisation kernels for weight closures.
//!
//! A function call's closure may store weights in a packed or narrow dtype
//! while the compiled body expects a higher-precision input. These kernels
//! widen the host copy into the device-visible tensor:
//!
//! - [`unpack`] — pure dtype conversion.
//! - [`unpack1`] — conversion + per-group scaling.
//! - [`unpack2`] — conversion + zero-point subtraction + scaling.
//!
//! Scale and zero-point tensors tile the weight tensor in contiguous groups:
//! group `g` covers elements `[g * group_len, (g + 1) * group_len)`. The
//! kernels are thread-safe when called on disjoint output tensors, and each
//! call parallelises across groups internally.

use crate::{DType, Tensor, TensorError};
use rayon::prelude::*;

/// Widens `from` into `to` with no scaling.
pub fn unpack(from: &Tensor, to: &Tensor) -> Result<(), TensorError> {
    run("unpack", from, None, None, to)
}

/// Widens `from` into `to`, multiplying each group by its scale.
pub fn unpack1(from: &Tensor, scale: &Tensor, to: &Tensor) -> Result<(), TensorError> {
    run("unpack1", from, None, Some(scale), to)
}

/// Widens `from` into `to`, subtracting the group zero-point then scaling.
pub fn unpack2(
    from: &Tensor,
    zerop: &Tensor,
    scale: &Tensor,
    to: &Tensor,
) -> Result<(), TensorError> {
    run("unpack2", from, Some(zerop), Some(scale), to)
}

fn run(
    op: &'static str,
    from: &Tensor,
    zerop: Option<&Tensor>,
    scale: Option<&Tensor>,
    to: &Tensor,
) -> Result<(), TensorError> {
    if from.shape() != to.shape() {
        return Err(TensorError::ShapeMismatch {
            op,
            lhs: from.shape().clone(),
            rhs: to.shape().clone(),
        });
    }
    if !matches!(
        from.dtype(),
        DType::I4 | DType::U4 | DType::I8 | DType::U8 | DType::F16
    ) {
        return Err(TensorError::UnsupportedDType {
            op,
            dtype: from.dtype(),
        });
    }
    if !matches!(to.dtype(), DType::F16 | DType::F32) {
        return Err(TensorError::UnsupportedDType {
            op,
            dtype: to.dtype(),
        });
    }
    if let Some(s) = scale {
        if !matches!(s.dtype(), DType::F16 | DType::F32) {
            return Err(TensorError::UnsupportedDType {
                op,
                dtype: s.dtype(),
            });
        }
    }
    if let Some(z) = zerop {
        if !matches!(
            z.dtype(),
            DType::F16 | DType::F32 | DType::I4 | DType::U4 | DType::I8 | DType::U8
        ) {
            return Err(TensorError::UnsupportedDType {
                op,
                dtype: z.dtype(),
            });
        }
    }
    // Element indices below address raw storage, so windows into larger
    // tensors are not acceptable here.
    for t in [Some(from), Some(to), zerop, scale].into_iter().flatten() {
        if !t.is_full() {
            return Err(TensorError::NonContiguous { op });
        }
    }

    let elems = from.shape().num_elements();
    let groups = scale.map_or(1, |s| s.shape().num_elements());
    if groups == 0 || elems % groups != 0 {
        return Err(TensorError::BadGroupShape { op, groups, elems });
    }
    if let (Some(z), Some(s)) = (zerop, scale) {
        if z.shape().num_elements() != s.shape().num_elements() {
            return Err(TensorError::ShapeMismatch {
                op,
                lhs: z.shape().clone(),
                rhs: s.shape().clone(),
            });
        }
    }

    let group_len = elems / groups;
    let chunk_len = if groups == 1 {
        4096.min(elems.max(1))
    } else {
        group_len
    };

    let from_data = from.read();
    let scale_data = scale.map(|s| (s.read(), s.dtype()));
    let zerop_data = zerop.map(|z| (z.read(), z.dtype()));
    let mut to_data = to.write();

    let src = from_data.bytes();
    let src_dtype = from.dtype();
    let scale_at = |g: usize| -> f32 {
        scale_data
            .as_ref()
            .map_or(1.0, |(d, dt)| decode_at(d.bytes(), *dt, g))
    };
    let zerop_at = |g: usize| -> f32 {
        zerop_data
            .as_ref()
            .map_or(0.0, |(d, dt)| decode_at(d.bytes(), *dt, g))
    };

    match to.dtype() {
        DType::F32 => {
            let dst = to_data.as_slice_mut::<f32>();
            dst.par_chunks_mut(chunk_len)
                .enumerate()
                .for_each(|(ci, chunk)| {
                    let start = ci * chunk_len;
                    for (e, out) in chunk.iter_mut().enumerate() {
                        let i = start + e;
                        let g = i / group_len;
                        *out = (decode_at(src, src_dtype, i) - zerop_at(g)) * scale_at(g);
                    }
                });
        }
        DType::F16 => {
            let dst = to_data.as_slice_mut::<half::f16>();
            dst.par_chunks_mut(chunk_len)
                .enumerate()
                .for_each(|(ci, chunk)| {
                    let start = ci * chunk_len;
                    for (e, out) in chunk.iter_mut().enumerate() {
                        let i = start + e;
                        let g = i / group_len;
                        let v = (decode_at(src, src_dtype, i) - zerop_at(g)) * scale_at(g);
                        *out = half::f16::from_f32(v);
                    }
                });
        }
        _ => unreachable!("output dtype validated above"),
    }
    Ok(())
}

/// Reads element `i` of a contiguous buffer as `f32`.
fn decode_at(bytes: &[u8], dtype: DType, i: usize) -> f32 {
    match dtype {
        DType::I4 => {
            let n = nibble(bytes, i);
            if n >= 8 {
                n as f32 - 16.0
            } else {
                n as f32
            }
        }
        DType::U4 => nibble(bytes, i) as f32,
        DType::I8 => bytes[i] as i8 as f32,
        DType::U8 => bytes[i] as f32,
        DType::F16 => {
            half::f16::from_bits(u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]])).to_f32()
        }
        DType::F32 => f32::from_le_bytes([
            bytes[4 * i],
            bytes[4 * i + 1],
            bytes[4 * i + 2],
            bytes[4 * i + 3],
        ]),
        _ => unreachable!("dtype validated by caller"),
    }
}

#[inline]
fn nibble(bytes: &[u8], i: usize) -> u8 {
    let b = bytes[i / 2];
    if i % 2 == 0 {
        b & 0xF
    } else {
        b >> 4
    }
}
