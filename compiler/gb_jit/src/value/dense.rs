//! Strided dense arrays shared with compiled code.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use super::{DType, Scalar};
use crate::error::{JitError, JitResult, MismatchKind};

mod sealed {
    pub trait Sealed {}
}

/// Rust types that can be array elements.
pub trait Element: Copy + sealed::Sealed {
    const DTYPE: DType;

    fn into_scalar(self) -> Scalar;

    /// Read one element.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `Self::DTYPE.size()` bytes.
    unsafe fn read(ptr: *const u8) -> Self;

    /// Write one element.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `Self::DTYPE.size()` bytes.
    unsafe fn write(self, ptr: *mut u8);
}

macro_rules! numeric_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;

                fn into_scalar(self) -> Scalar {
                    Scalar::$dtype(self)
                }

                unsafe fn read(ptr: *const u8) -> Self {
                    // SAFETY: guaranteed by the caller.
                    unsafe { ptr.cast::<$ty>().read_unaligned() }
                }

                unsafe fn write(self, ptr: *mut u8) {
                    // SAFETY: guaranteed by the caller.
                    unsafe { ptr.cast::<$ty>().write_unaligned(self) }
                }
            }
        )*
    };
}

numeric_element!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl sealed::Sealed for bool {}

// Booleans are stored as one byte; any non-zero byte reads as true.
impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn into_scalar(self) -> Scalar {
        Scalar::Bool(self)
    }

    unsafe fn read(ptr: *const u8) -> Self {
        // SAFETY: guaranteed by the caller.
        unsafe { ptr.read() != 0 }
    }

    unsafe fn write(self, ptr: *mut u8) {
        // SAFETY: guaranteed by the caller.
        unsafe { ptr.write(u8::from(self)) }
    }
}

/// Read one element of `dtype` as a scalar.
///
/// # Safety
///
/// `ptr` must be valid for reads of `dtype.size()` bytes.
unsafe fn read_scalar(dtype: DType, ptr: *const u8) -> Scalar {
    // SAFETY: forwarded from the caller.
    unsafe {
        match dtype {
            DType::Bool => bool::read(ptr).into_scalar(),
            DType::I8 => i8::read(ptr).into_scalar(),
            DType::I16 => i16::read(ptr).into_scalar(),
            DType::I32 => i32::read(ptr).into_scalar(),
            DType::I64 => i64::read(ptr).into_scalar(),
            DType::U64 => u64::read(ptr).into_scalar(),
            DType::F32 => f32::read(ptr).into_scalar(),
            DType::F64 => f64::read(ptr).into_scalar(),
        }
    }
}

/// Write a scalar that already has the element type `dtype`.
///
/// # Safety
///
/// `ptr` must be valid for writes of `scalar.dtype().size()` bytes.
unsafe fn write_scalar(scalar: Scalar, ptr: *mut u8) {
    // SAFETY: forwarded from the caller.
    unsafe {
        match scalar {
            Scalar::Bool(v) => v.write(ptr),
            Scalar::I8(v) => v.write(ptr),
            Scalar::I16(v) => v.write(ptr),
            Scalar::I32(v) => v.write(ptr),
            Scalar::I64(v) => v.write(ptr),
            Scalar::U64(v) => v.write(ptr),
            Scalar::F32(v) => v.write(ptr),
            Scalar::F64(v) => v.write(ptr),
        }
    }
}

/// Backing memory of an array.
enum Storage {
    /// Host allocation, 8-byte aligned.
    Owned(Box<[Cell<u64>]>),
    /// Memory allocated by compiled code. Never freed: the allocation may be
    /// a global or otherwise not owned by the allocator the host knows about.
    Foreign(*mut u8),
}

impl Storage {
    fn allocated(&self) -> *mut u8 {
        match self {
            Self::Owned(cells) => cells.as_ptr().cast::<u8>().cast_mut(),
            Self::Foreign(ptr) => *ptr,
        }
    }
}

fn element_count(shape: &[u64]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| {
        acc.checked_mul(usize::try_from(dim).ok()?)
    })
}

fn row_major_strides(shape: &[u64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        let extent = i64::try_from(shape[i + 1]).unwrap_or(i64::MAX);
        strides[i] = strides[i + 1].saturating_mul(extent);
    }
    strides
}

/// A strided N-dimensional array.
///
/// Clones share the same buffer. Strides and offset count elements, not
/// bytes, matching the memref descriptor the compiled code sees.
#[derive(Clone)]
pub struct DenseArray {
    dtype: DType,
    shape: Vec<u64>,
    strides: Vec<i64>,
    offset: i64,
    aligned: *mut u8,
    storage: Rc<Storage>,
}

impl DenseArray {
    /// A zero-filled contiguous array.
    pub fn zeros(dtype: DType, shape: impl Into<Vec<u64>>) -> JitResult<Self> {
        let shape = shape.into();
        let bytes = element_count(&shape)
            .and_then(|count| count.checked_mul(dtype.size()))
            .ok_or_else(|| JitError::InvalidArgument {
                message: format!("array shape {shape:?} is too large"),
            })?;
        let cells: Box<[Cell<u64>]> = (0..bytes.div_ceil(8).max(1)).map(|_| Cell::new(0)).collect();
        let storage = Rc::new(Storage::Owned(cells));
        Ok(Self {
            dtype,
            strides: row_major_strides(&shape),
            shape,
            offset: 0,
            aligned: storage.allocated(),
            storage,
        })
    }

    /// A contiguous row-major array holding `data`.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: impl Into<Vec<u64>>) -> JitResult<Self> {
        let shape = shape.into();
        if element_count(&shape) != Some(data.len()) {
            return Err(JitError::InvalidArgument {
                message: format!(
                    "{} elements do not fill an array of shape {shape:?}",
                    data.len()
                ),
            });
        }
        let array = Self::zeros(T::DTYPE, shape)?;
        for (i, value) in data.into_iter().enumerate() {
            // SAFETY: the buffer holds exactly `data.len()` contiguous elements.
            unsafe { value.write(array.aligned.add(i * T::DTYPE.size())) };
        }
        Ok(array)
    }

    /// A contiguous array of `dtype` holding `scalars` in row-major order.
    pub fn from_scalars(
        dtype: DType,
        scalars: &[Scalar],
        shape: impl Into<Vec<u64>>,
    ) -> JitResult<Self> {
        let shape = shape.into();
        if element_count(&shape) != Some(scalars.len()) {
            return Err(JitError::InvalidArgument {
                message: format!(
                    "{} elements do not fill an array of shape {shape:?}",
                    scalars.len()
                ),
            });
        }
        let array = Self::zeros(dtype, shape)?;
        for (i, &scalar) in scalars.iter().enumerate() {
            let converted = scalar.cast(dtype).ok_or_else(|| {
                JitError::mismatch(
                    MismatchKind::ElementType,
                    format!("cannot store {scalar} in a {dtype} array"),
                )
            })?;
            // SAFETY: the buffer holds `scalars.len()` contiguous elements.
            unsafe { write_scalar(converted, array.aligned.add(i * dtype.size())) };
        }
        Ok(array)
    }

    /// Wrap memory produced by compiled code without copying.
    ///
    /// # Safety
    ///
    /// Every element addressed by `offset`, `shape` and `strides` relative
    /// to `aligned` must stay readable for as long as any clone lives.
    pub(crate) unsafe fn from_foreign(
        dtype: DType,
        allocated: *mut u8,
        aligned: *mut u8,
        offset: i64,
        shape: Vec<u64>,
        strides: Vec<i64>,
    ) -> Self {
        Self {
            dtype,
            shape,
            strides,
            offset,
            aligned,
            storage: Rc::new(Storage::Foreign(allocated)),
        }
    }

    /// A view over this array's buffer with a different descriptor. Used when
    /// compiled code hands back memory the host passed in.
    pub(crate) fn rewrap(
        &self,
        aligned: *mut u8,
        offset: i64,
        shape: Vec<u64>,
        strides: Vec<i64>,
    ) -> Self {
        Self {
            dtype: self.dtype,
            shape,
            strides,
            offset,
            aligned,
            storage: Rc::clone(&self.storage),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Strides in elements.
    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    /// Offset of the first element from the aligned pointer, in elements.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        element_count(&self.shape).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the buffer is owned by compiled code.
    pub fn is_foreign(&self) -> bool {
        matches!(*self.storage, Storage::Foreign(_))
    }

    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.strides == row_major_strides(&self.shape)
    }

    pub(crate) fn allocated_ptr(&self) -> *mut u8 {
        self.storage.allocated()
    }

    pub(crate) fn aligned_ptr(&self) -> *mut u8 {
        self.aligned
    }

    #[allow(
        clippy::cast_possible_wrap,
        reason = "in-bounds indices are far below i64::MAX"
    )]
    fn linear(&self, index: &[u64]) -> i64 {
        index
            .iter()
            .zip(&self.strides)
            .fold(self.offset, |acc, (&i, &stride)| acc + i as i64 * stride)
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "element offsets are bounded by the allocation size"
    )]
    fn element_ptr(&self, linear: i64) -> *mut u8 {
        let bytes = linear * self.dtype.size() as i64;
        self.aligned.wrapping_offset(bytes as isize)
    }

    fn in_bounds(&self, index: &[u64]) -> bool {
        index.len() == self.rank() && index.iter().zip(&self.shape).all(|(i, n)| i < n)
    }

    /// Element offsets in row-major logical order.
    fn element_offsets(&self) -> Vec<i64> {
        let count = self.len();
        let mut offsets = Vec::with_capacity(count);
        if count == 0 {
            return offsets;
        }
        let mut index = vec![0u64; self.rank()];
        loop {
            offsets.push(self.linear(&index));
            let mut dim = self.rank();
            loop {
                if dim == 0 {
                    return offsets;
                }
                dim -= 1;
                index[dim] += 1;
                if index[dim] < self.shape[dim] {
                    break;
                }
                index[dim] = 0;
            }
        }
    }

    fn check_dtype<T: Element>(&self) -> JitResult<()> {
        if T::DTYPE == self.dtype {
            Ok(())
        } else {
            Err(JitError::mismatch(
                MismatchKind::ElementType,
                format!("array holds {} but {} was requested", self.dtype, T::DTYPE),
            ))
        }
    }

    /// One element, or `None` when out of bounds or of another type.
    pub fn get<T: Element>(&self, index: &[u64]) -> Option<T> {
        if T::DTYPE != self.dtype || !self.in_bounds(index) {
            return None;
        }
        let ptr = self.element_ptr(self.linear(index));
        // SAFETY: the index is in bounds of the descriptor.
        Some(unsafe { T::read(ptr) })
    }

    pub fn get_scalar(&self, index: &[u64]) -> Option<Scalar> {
        if !self.in_bounds(index) {
            return None;
        }
        let ptr = self.element_ptr(self.linear(index));
        // SAFETY: the index is in bounds of the descriptor.
        Some(unsafe { read_scalar(self.dtype, ptr) })
    }

    /// Overwrite one element. Visible through every clone and to compiled
    /// code holding the buffer.
    pub fn set<T: Element>(&self, index: &[u64], value: T) -> JitResult<()> {
        self.check_dtype::<T>()?;
        if !self.in_bounds(index) {
            return Err(JitError::InvalidArgument {
                message: format!("index {index:?} is out of bounds for shape {:?}", self.shape),
            });
        }
        let ptr = self.element_ptr(self.linear(index));
        // SAFETY: the index is in bounds of the descriptor.
        unsafe { value.write(ptr) };
        Ok(())
    }

    /// Copy every element out in row-major order.
    pub fn to_vec<T: Element>(&self) -> JitResult<Vec<T>> {
        self.check_dtype::<T>()?;
        Ok(self
            .element_offsets()
            .into_iter()
            // SAFETY: offsets come from in-bounds indices.
            .map(|linear| unsafe { T::read(self.element_ptr(linear)) })
            .collect())
    }

    pub fn to_scalars(&self) -> Vec<Scalar> {
        self.element_offsets()
            .into_iter()
            // SAFETY: offsets come from in-bounds indices.
            .map(|linear| unsafe { read_scalar(self.dtype, self.element_ptr(linear)) })
            .collect()
    }

    /// A contiguous host-owned copy.
    pub fn to_owned_contiguous(&self) -> JitResult<Self> {
        let copy = Self::zeros(self.dtype, self.shape.clone())?;
        for (i, scalar) in self.to_scalars().into_iter().enumerate() {
            // SAFETY: `copy` holds `self.len()` contiguous elements.
            unsafe { write_scalar(scalar, copy.aligned.add(i * self.dtype.size())) };
        }
        Ok(copy)
    }
}

impl fmt::Debug for DenseArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseArray")
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("offset", &self.offset)
            .field("foreign", &self.is_foreign())
            .finish_non_exhaustive()
    }
}
