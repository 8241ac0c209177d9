// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise widening conversion to `f32`.

use crate::{DType, Element, Tensor, TensorError};
use rayon::prelude::*;

/// A source element that widens to `f32`.
pub(crate) trait Widen: Element {
    fn widen(self) -> f32;
}

macro_rules! impl_widen {
    ($($ty:ty),* $(,)?) => {
        $(impl Widen for $ty {
            fn widen(self) -> f32 {
                self as f32
            }
        })*
    };
}

impl_widen!(i8, u8, i16, u16, i32, u32, i64, u64);

impl Widen for half::f16 {
    fn widen(self) -> f32 {
        self.to_f32()
    }
}

impl Widen for half::bf16 {
    fn widen(self) -> f32 {
        self.to_f32()
    }
}

/// Converts `input` element-wise into the `f32` tensor `out`.
///
/// Shapes must be equal and both tensors contiguous. For `f32` input this is
/// a bulk copy. The conversion is a strict element-wise cast parallelised
/// across the flat range, so the result is byte-identical regardless of how
/// the work is partitioned among threads.
pub fn to_f32(input: &Tensor, out: &Tensor) -> Result<(), TensorError> {
    if input.shape() != out.shape() {
        return Err(TensorError::ShapeMismatch {
            op: "to_f32",
            lhs: input.shape().clone(),
            rhs: out.shape().clone(),
        });
    }
    if out.dtype() != DType::F32 {
        return Err(TensorError::DTypeMismatch {
            op: "to_f32 (output)",
            lhs: DType::F32,
            rhs: out.dtype(),
        });
    }
    if !input.is_contiguous() || !out.is_contiguous() {
        return Err(TensorError::NonContiguous { op: "to_f32" });
    }

    match input.dtype() {
        DType::F32 => input.copy_to(out),
        DType::F16 => widen_into::<half::f16>(input, out),
        DType::BF16 => widen_into::<half::bf16>(input, out),
        DType::I8 => widen_into::<i8>(input, out),
        DType::U8 => widen_into::<u8>(input, out),
        DType::I16 => widen_into::<i16>(input, out),
        DType::U16 => widen_into::<u16>(input, out),
        DType::I32 => widen_into::<i32>(input, out),
        DType::U32 => widen_into::<u32>(input, out),
        DType::I64 => widen_into::<i64>(input, out),
        DType::U64 => widen_into::<u64>(input, out),
        dtype @ (DType::I4 | DType::U4) => Err(TensorError::UnsupportedDType {
            op: "to_f32",
            dtype,
        }),
    }
}

fn widen_into<T: Widen>(input: &Tensor, out: &Tensor) -> Result<(), TensorError> {
    let src_data = input.read();
    let mut dst_data = out.write();
    let src = src_data.as_slice::<T>();
    let dst = dst_data.as_slice_mut::<f32>();
    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(o, &v)| *o = v.widen());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;
    use half::{bf16, f16};

    #[test]
    fn test_f32_is_bulk_copy() {
        let src = Tensor::from_f32(Shape::vector(4), &[1.0, -2.5, 3.25, 0.0]).unwrap();
        let dst = Tensor::zeros(Shape::vector(4), DType::F32);
        to_f32(&src, &dst).unwrap();
        assert_eq!(dst.read().as_slice::<f32>(), &[1.0, -2.5, 3.25, 0.0]);
    }

    #[test]
    fn test_f16_widening() {
        let vals: Vec<f16> = [0.5f32, -1.0, 2.0, 65504.0]
            .iter()
            .map(|&v| f16::from_f32(v))
            .collect();
        let src = Tensor::from_elems(Shape::vector(4), &vals).unwrap();
        let dst = Tensor::zeros(Shape::vector(4), DType::F32);
        to_f32(&src, &dst).unwrap();
        assert_eq!(dst.read().as_slice::<f32>(), &[0.5, -1.0, 2.0, 65504.0]);
    }

    #[test]
    fn test_bf16_widening() {
        let vals: Vec<bf16> = [1.0f32, -3.0].iter().map(|&v| bf16::from_f32(v)).collect();
        let src = Tensor::from_elems(Shape::vector(2), &vals).unwrap();
        let dst = Tensor::zeros(Shape::vector(2), DType::F32);
        to_f32(&src, &dst).unwrap();
        assert_eq!(dst.read().as_slice::<f32>(), &[1.0, -3.0]);
    }

    /// Integer values representable in f32 survive the round-trip exactly.
    #[test]
    fn test_integer_exactness() {
        let vals: Vec<i32> = vec![i32::MIN, -1, 0, 1, 1 << 20, (1 << 24) - 1];
        let src = Tensor::from_elems(Shape::vector(vals.len()), &vals).unwrap();
        let dst = Tensor::zeros(Shape::vector(vals.len()), DType::F32);
        to_f32(&src, &dst).unwrap();
        let back: Vec<i32> = dst
            .read()
            .as_slice::<f32>()
            .iter()
            .map(|&f| f as i32)
            .collect();
        assert_eq!(back, vals);
    }

    #[test]
    fn test_u64_widening() {
        let vals: Vec<u64> = vec![0, 7, 1 << 30];
        let src = Tensor::from_elems(Shape::vector(3), &vals).unwrap();
        let dst = Tensor::zeros(Shape::vector(3), DType::F32);
        to_f32(&src, &dst).unwrap();
        assert_eq!(
            dst.read().as_slice::<f32>(),
            &[0.0, 7.0, (1u64 << 30) as f32]
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let src = Tensor::zeros(Shape::vector(4), DType::I8);
        let dst = Tensor::zeros(Shape::vector(5), DType::F32);
        assert!(to_f32(&src, &dst).is_err());
    }

    #[test]
    fn test_packed_input_rejected() {
        let src = Tensor::zeros(Shape::vector(4), DType::I4);
        let dst = Tensor::zeros(Shape::vector(4), DType::F32);
        assert!(matches!(
            to_f32(&src, &dst),
            Err(TensorError::UnsupportedDType { .. })
        ));
    }
}
