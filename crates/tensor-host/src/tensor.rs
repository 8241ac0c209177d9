// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core tensor type: shared-handle storage with strided views.
//!
//! A [`Tensor`] is a cheap-to-clone handle. Clones and views share one
//! reference-counted storage block; the data itself sits behind a
//! reader-writer lock so a producer subrequest can fill a tensor while the
//! orchestrator holds other handles to it. Views carry their own shape,
//! strides, and element offset and never own memory.
//!
//! # Memory Layout
//! Data is row-major (C order). Storage is backed by `u64` words, so typed
//! reinterpretation as any supported element type is always aligned.

use crate::{DType, Element, Shape, TensorError};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Raw storage: `u64`-backed for alignment, sized in bytes.
struct Buf {
    words: Vec<u64>,
    byte_len: usize,
}

impl Buf {
    fn zeroed(byte_len: usize) -> Self {
        Self {
            words: vec![0u64; byte_len.div_ceil(8)],
            byte_len,
        }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::zeroed(bytes.len());
        buf.bytes_mut().copy_from_slice(bytes);
        buf
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: the words allocation covers at least `byte_len` bytes and
        // u8 has no alignment requirement.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.byte_len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, plus we hold &mut self.
        unsafe {
            std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.byte_len)
        }
    }
}

struct Storage {
    dtype: DType,
    data: RwLock<Buf>,
}

/// An n-dimensional host tensor.
///
/// Handles are reference-counted: `clone()` aliases the same storage, and
/// [`Tensor::view`] produces a strided window into it. Use
/// [`Tensor::same_storage`] to test aliasing (the zero-copy property the
/// orchestrator's wiring relies on).
#[derive(Clone)]
pub struct Tensor {
    storage: Arc<Storage>,
    shape: Shape,
    /// Row-major strides of the *parent* storage, in elements.
    strides: Vec<usize>,
    /// Offset of this view's first element, in elements.
    offset: usize,
}

impl Tensor {
    /// Creates a new tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_host::{Tensor, Shape, DType};
    /// let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
    /// assert_eq!(t.shape().num_elements(), 6);
    /// ```
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let byte_len = shape.size_bytes(dtype);
        let strides = shape.strides();
        Self {
            storage: Arc::new(Storage {
                dtype,
                data: RwLock::new(Buf::zeroed(byte_len)),
            }),
            shape,
            strides,
            offset: 0,
        }
    }

    /// Creates a tensor from raw bytes.
    ///
    /// Returns an error if the buffer size does not match
    /// `shape.size_bytes(dtype)`.
    pub fn from_bytes(shape: Shape, dtype: DType, data: &[u8]) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let strides = shape.strides();
        Ok(Self {
            storage: Arc::new(Storage {
                dtype,
                data: RwLock::new(Buf::from_bytes(data)),
            }),
            shape,
            strides,
            offset: 0,
        })
    }

    /// Creates a tensor from a slice of typed elements.
    pub fn from_elems<T: Element>(shape: Shape, values: &[T]) -> Result<Self, TensorError> {
        let expected = shape.num_elements();
        if values.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected: T::DTYPE.byte_len(expected),
                actual: T::DTYPE.byte_len(values.len()),
            });
        }
        // SAFETY: reinterpreting &[T] as &[u8] is safe for Copy element types.
        let bytes = unsafe {
            std::slice::from_raw_parts(
                values.as_ptr().cast::<u8>(),
                std::mem::size_of_val(values),
            )
        };
        Self::from_bytes(shape, T::DTYPE, bytes)
    }

    /// Creates an `f32` tensor from a slice of values.
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        Self::from_elems(shape, values)
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.storage.dtype
    }

    /// Returns this view's strides, in elements.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Returns `true` if both handles alias the same storage block.
    pub fn same_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Returns a stable identity for the storage block.
    ///
    /// Used by the weights bank for content addressing.
    pub fn storage_id(&self) -> usize {
        Arc::as_ptr(&self.storage) as usize
    }

    /// Returns `true` if this view covers its elements in row-major order
    /// with no gaps.
    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.strides()
    }

    /// Returns `true` if this handle covers its entire storage block from
    /// offset zero (i.e. it is not a window into a larger tensor).
    pub fn is_full(&self) -> bool {
        self.offset == 0 && self.is_contiguous()
    }

    /// Produces a non-owning sub-tensor covering `[from, to)` per dimension.
    ///
    /// Strides are inherited unchanged; only the base offset shifts.
    /// Sub-byte dtypes are rejected (no safe mid-byte boundary).
    pub fn view_range(&self, from: &[usize], to: &[usize]) -> Result<Tensor, TensorError> {
        if self.dtype().is_sub_byte() {
            return Err(TensorError::SubByteView);
        }
        let dims = self.shape.dims();
        if from.len() != dims.len() || to.len() != dims.len() {
            return Err(TensorError::ShapeMismatch {
                op: "view",
                lhs: self.shape.clone(),
                rhs: Shape::from(from),
            });
        }
        let mut view_dims = Vec::with_capacity(dims.len());
        let mut offset = self.offset;
        for d in 0..dims.len() {
            if from[d] >= to[d] || to[d] > dims[d] {
                return Err(TensorError::ViewOutOfBounds {
                    dim: d,
                    from: from[d],
                    to: to[d],
                    extent: dims[d],
                });
            }
            view_dims.push(to[d] - from[d]);
            offset += self.strides[d] * from[d];
        }
        Ok(Tensor {
            storage: Arc::clone(&self.storage),
            shape: Shape::new(view_dims),
            strides: self.strides.clone(),
            offset,
        })
    }

    /// Produces a view narrowing a single dimension to `[offset, offset + len)`.
    pub fn view(&self, dim: usize, offset: usize, len: usize) -> Result<Tensor, TensorError> {
        let dims = self.shape.dims();
        let mut from = vec![0usize; dims.len()];
        let mut to = dims.to_vec();
        if dim >= dims.len() {
            return Err(TensorError::ViewOutOfBounds {
                dim,
                from: offset,
                to: offset + len,
                extent: 0,
            });
        }
        from[dim] = offset;
        to[dim] = offset + len;
        self.view_range(&from, &to)
    }

    /// Acquires shared read access to the underlying data.
    pub fn read(&self) -> TensorData<'_> {
        TensorData {
            guard: self
                .storage
                .data
                .read()
                .expect("tensor storage lock poisoned"),
            tensor: self,
        }
    }

    /// Acquires exclusive write access to the underlying data.
    pub fn write(&self) -> TensorDataMut<'_> {
        TensorDataMut {
            guard: self
                .storage
                .data
                .write()
                .expect("tensor storage lock poisoned"),
            tensor: self,
        }
    }

    /// Copies this tensor's elements into `dst`.
    ///
    /// Shapes and dtypes must match. Both sides may be strided views as long
    /// as the innermost dimension is contiguous; sub-byte tensors must be
    /// full contiguous blocks (views of them cannot exist). Source and
    /// destination must not alias.
    pub fn copy_to(&self, dst: &Tensor) -> Result<(), TensorError> {
        if self.shape != dst.shape {
            return Err(TensorError::ShapeMismatch {
                op: "copy",
                lhs: self.shape.clone(),
                rhs: dst.shape.clone(),
            });
        }
        if self.dtype() != dst.dtype() {
            return Err(TensorError::DTypeMismatch {
                op: "copy",
                lhs: self.dtype(),
                rhs: dst.dtype(),
            });
        }
        if self.same_storage(dst) {
            return Err(TensorError::AliasedCopy);
        }

        let src_data = self.read();
        let mut dst_data = dst.write();

        // Sub-byte tensors are always full blocks (views of them cannot
        // exist), so they reduce to one byte copy.
        if self.dtype().is_sub_byte() {
            let bytes = self.shape.size_bytes(self.dtype());
            let src = &src_data.guard.bytes()[..bytes];
            dst_data.guard.bytes_mut()[..bytes].copy_from_slice(src);
            return Ok(());
        }

        // Contiguous views cover one dense span each.
        if self.is_contiguous() && dst.is_contiguous() {
            let esize = self.dtype().size_bytes();
            let n = self.shape.num_elements();
            let s0 = self.offset * esize;
            let d0 = dst.offset * esize;
            let src = &src_data.guard.bytes()[s0..s0 + n * esize];
            dst_data.guard.bytes_mut()[d0..d0 + n * esize].copy_from_slice(src);
            return Ok(());
        }

        // Strided path: copy one innermost row at a time. Views inherit their
        // parent's strides, so the innermost stride of a row-major parent is
        // always 1.
        let dims = self.shape.dims();
        let rank = dims.len();
        debug_assert!(rank > 0);
        debug_assert_eq!(self.strides[rank - 1], 1);
        debug_assert_eq!(dst.strides[rank - 1], 1);

        let esize = self.dtype().size_bytes();
        let row = dims[rank - 1];
        let outer: usize = dims[..rank - 1].iter().product();
        let src_bytes = src_data.guard.bytes();
        let dst_bytes = dst_data.guard.bytes_mut();
        for r in 0..outer {
            let mut rem = r;
            let mut s_off = self.offset;
            let mut d_off = dst.offset;
            for d in (0..rank - 1).rev() {
                let i = rem % dims[d];
                rem /= dims[d];
                s_off += i * self.strides[d];
                d_off += i * dst.strides[d];
            }
            let s = &src_bytes[s_off * esize..(s_off + row) * esize];
            dst_bytes[d_off * esize..(d_off + row) * esize].copy_from_slice(s);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype())
            .field("contiguous", &self.is_contiguous())
            .finish()
    }
}

// SAFETY: private cast helper. Callers guarantee the byte slice came from
// u64-backed storage (aligned for every Element) and holds whole elements.
unsafe fn cast_slice<T: Element>(bytes: &[u8]) -> &[T] {
    debug_assert_eq!(bytes.as_ptr() as usize % std::mem::align_of::<T>(), 0);
    std::slice::from_raw_parts(bytes.as_ptr().cast(), bytes.len() / std::mem::size_of::<T>())
}

unsafe fn cast_slice_mut<T: Element>(bytes: &mut [u8]) -> &mut [T] {
    debug_assert_eq!(bytes.as_ptr() as usize % std::mem::align_of::<T>(), 0);
    std::slice::from_raw_parts_mut(
        bytes.as_mut_ptr().cast(),
        bytes.len() / std::mem::size_of::<T>(),
    )
}

/// Shared read access to a tensor's data.
pub struct TensorData<'a> {
    guard: RwLockReadGuard<'a, Buf>,
    tensor: &'a Tensor,
}

impl TensorData<'_> {
    /// Returns the raw bytes of the whole backing storage.
    pub fn bytes(&self) -> &[u8] {
        self.guard.bytes()
    }

    /// Interprets this view as a typed slice.
    ///
    /// # Panics
    /// Panics if `T` does not match the dtype or the view is not contiguous.
    pub fn as_slice<T: Element>(&self) -> &[T] {
        assert_eq!(
            self.tensor.dtype(),
            T::DTYPE,
            "as_slice::<{}> called on {} tensor",
            T::DTYPE,
            self.tensor.dtype()
        );
        assert!(
            self.tensor.is_contiguous(),
            "as_slice called on a non-contiguous view"
        );
        // SAFETY: dtype checked above; storage is u64-aligned.
        let all = unsafe { cast_slice::<T>(self.guard.bytes()) };
        &all[self.tensor.offset..self.tensor.offset + self.tensor.shape.num_elements()]
    }
}

/// Exclusive write access to a tensor's data.
pub struct TensorDataMut<'a> {
    guard: RwLockWriteGuard<'a, Buf>,
    tensor: &'a Tensor,
}

impl TensorDataMut<'_> {
    /// Returns the raw bytes of the whole backing storage.
    pub fn bytes(&self) -> &[u8] {
        self.guard.bytes()
    }

    /// Returns the raw bytes of the whole backing storage, mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.guard.bytes_mut()
    }

    /// Interprets this view as a mutable typed slice.
    ///
    /// # Panics
    /// Panics if `T` does not match the dtype or the view is not contiguous.
    pub fn as_slice_mut<T: Element>(&mut self) -> &mut [T] {
        assert_eq!(
            self.tensor.dtype(),
            T::DTYPE,
            "as_slice_mut::<{}> called on {} tensor",
            T::DTYPE,
            self.tensor.dtype()
        );
        assert!(
            self.tensor.is_contiguous(),
            "as_slice_mut called on a non-contiguous view"
        );
        let offset = self.tensor.offset;
        let n = self.tensor.shape.num_elements();
        // SAFETY: dtype checked above; storage is u64-aligned.
        let all = unsafe { cast_slice_mut::<T>(self.guard.bytes_mut()) };
        &mut all[offset..offset + n]
    }
}
