//! Encoding host values into native fields and back.

use std::ffi::c_void;

use gb_ir::{Dim, SparseTensorType};

use super::{AbiDescriptor, Codec, NativeValue};
use crate::error::{JitError, JitResult, MismatchKind};
use crate::value::{DType, DenseArray, Scalar, SparseTensor, Value, VoidPtr};

/// Native memory that must outlive one call: arrays built for pointer
/// arguments and out-pointer result slots.
#[derive(Debug, Default)]
pub struct Scratch {
    buffers: Vec<Box<[u64]>>,
}

impl Scratch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A zeroed, 8-byte aligned buffer of at least `bytes` bytes that lives
    /// as long as this scratch.
    pub fn alloc(&mut self, bytes: usize) -> *mut u8 {
        let mut buffer = vec![0u64; bytes.div_ceil(8).max(1)].into_boxed_slice();
        let ptr = buffer.as_mut_ptr().cast::<u8>();
        self.buffers.push(buffer);
        ptr
    }
}

fn kind_mismatch(expected: &str, value: &Value) -> JitError {
    JitError::mismatch(
        MismatchKind::Kind,
        format!("expected {expected}, got {}", value.kind_name()),
    )
}

fn to_i64(n: u64, what: &str) -> JitResult<i64> {
    i64::try_from(n).map_err(|_| JitError::InvalidArgument {
        message: format!("{what} {n} does not fit a signed 64-bit field"),
    })
}

impl AbiDescriptor {
    /// Encode `value` into this descriptor's fields.
    ///
    /// Fails with `TypeMismatch` before any native memory is touched when the
    /// value disagrees with the compiled type.
    pub fn encode(&self, value: &Value, scratch: &mut Scratch) -> JitResult<Vec<NativeValue>> {
        match &self.codec {
            Codec::Scalar(dtype) => {
                let scalar = value
                    .as_scalar()
                    .ok_or_else(|| kind_mismatch("a scalar", value))?;
                Ok(vec![encode_scalar(scalar, *dtype)?])
            }
            Codec::Dense { element, dims } => {
                let array = value
                    .as_dense()
                    .ok_or_else(|| kind_mismatch("a dense array", value))?;
                encode_dense(array, *element, dims)
            }
            Codec::Sparse { ty, element } => {
                let tensor = value
                    .sparse_view()
                    .ok_or_else(|| kind_mismatch("a sparse tensor", value))?;
                check_sparse(&tensor, ty, *element)?;
                Ok(vec![NativeValue::Ptr(tensor.handle().as_ptr())])
            }
            Codec::BytePointer => {
                let handle = value
                    .raw_handle()
                    .ok_or_else(|| kind_mismatch("a value exposing a raw handle", value))?;
                Ok(vec![NativeValue::Ptr(handle.as_ptr())])
            }
            Codec::PointerArray(element) => {
                let Value::Sequence(items) = value else {
                    return Err(kind_mismatch("a sequence", value));
                };
                let stride = element.layout.size();
                let base = scratch.alloc(stride * items.len());
                for (i, item) in items.iter().enumerate() {
                    let fields = element.encode(item, scratch)?;
                    // SAFETY: `base` holds `items.len()` records of `stride` bytes.
                    unsafe { element.layout.write(&fields, base.add(i * stride)) };
                }
                Ok(vec![NativeValue::Ptr(base.cast::<c_void>())])
            }
        }
    }

    /// Decode fields returned by compiled code.
    ///
    /// `inputs` are the call's arguments; a dense result whose allocation is
    /// one of them shares that buffer instead of becoming foreign memory.
    ///
    /// # Safety
    ///
    /// `fields` must come from a call of the function this descriptor was
    /// derived for. Pointers inside them are trusted.
    pub unsafe fn decode(&self, fields: &[NativeValue], inputs: &[Value]) -> JitResult<Value> {
        let malformed = || JitError::Verification {
            message: format!("malformed native fields for '{}': {fields:?}", self.ty),
        };
        match &self.codec {
            Codec::Scalar(dtype) => {
                let field = fields.first().ok_or_else(malformed)?;
                decode_scalar(*field, *dtype)
                    .map(Value::Scalar)
                    .ok_or_else(malformed)
            }
            Codec::Dense { element, dims } => {
                // SAFETY: forwarded from the caller.
                unsafe { decode_dense(fields, *element, dims.len(), inputs) }.ok_or_else(malformed)
            }
            Codec::Sparse { ty, element } => {
                let handle = fields.first().and_then(|f| f.as_ptr()).ok_or_else(malformed)?;
                Ok(Value::Sparse(sparse_handle(VoidPtr::new(handle), ty, *element)))
            }
            Codec::BytePointer | Codec::PointerArray(_) => {
                let ptr = fields.first().and_then(|f| f.as_ptr()).ok_or_else(malformed)?;
                Ok(Value::Pointer(VoidPtr::new(ptr)))
            }
        }
    }

    /// Decode one record stored at `ptr` (an out-pointer slot or a returned
    /// struct).
    ///
    /// # Safety
    ///
    /// `ptr` must hold a record with this descriptor's layout written by
    /// compiled code.
    pub unsafe fn decode_record(&self, ptr: *const u8, inputs: &[Value]) -> JitResult<Value> {
        // SAFETY: forwarded from the caller.
        unsafe {
            let fields = self.layout.read(&self.fields, ptr);
            self.decode(&fields, inputs)
        }
    }
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

fn encode_scalar(scalar: Scalar, dtype: DType) -> JitResult<NativeValue> {
    let converted = scalar.cast(dtype).ok_or_else(|| {
        JitError::mismatch(
            MismatchKind::ElementType,
            format!("cannot convert {scalar} ({}) to {dtype}", scalar.dtype()),
        )
    })?;
    Ok(match converted {
        Scalar::Bool(v) => NativeValue::U8(u8::from(v)),
        Scalar::I8(v) => NativeValue::I8(v),
        Scalar::I16(v) => NativeValue::I16(v),
        Scalar::I32(v) => NativeValue::I32(v),
        Scalar::I64(v) => NativeValue::I64(v),
        Scalar::U64(v) => NativeValue::U64(v),
        Scalar::F32(v) => NativeValue::F32(v),
        Scalar::F64(v) => NativeValue::F64(v),
    })
}

fn decode_scalar(field: NativeValue, dtype: DType) -> Option<Scalar> {
    Some(match (dtype, field) {
        (DType::Bool, NativeValue::U8(v)) => Scalar::Bool(v != 0),
        (DType::I8, NativeValue::I8(v)) => Scalar::I8(v),
        (DType::I16, NativeValue::I16(v)) => Scalar::I16(v),
        (DType::I32, NativeValue::I32(v)) => Scalar::I32(v),
        (DType::I64, NativeValue::I64(v)) => Scalar::I64(v),
        (DType::U64, NativeValue::U64(v)) => Scalar::U64(v),
        (DType::F32, NativeValue::F32(v)) => Scalar::F32(v),
        (DType::F64, NativeValue::F64(v)) => Scalar::F64(v),
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Dense arrays
// ---------------------------------------------------------------------------

fn encode_dense(array: &DenseArray, element: DType, dims: &[Dim]) -> JitResult<Vec<NativeValue>> {
    if array.dtype() != element {
        return Err(JitError::mismatch(
            MismatchKind::ElementType,
            format!("expected {element} elements, got {}", array.dtype()),
        ));
    }
    if array.rank() != dims.len() {
        return Err(JitError::mismatch(
            MismatchKind::Rank,
            format!("expected rank {}, got {}", dims.len(), array.rank()),
        ));
    }
    for (axis, (dim, &extent)) in dims.iter().zip(array.shape()).enumerate() {
        if let Some(expected) = dim.known() {
            if expected != extent {
                return Err(JitError::mismatch(
                    MismatchKind::Shape,
                    format!("dimension {axis} must be {expected}, got {extent}"),
                ));
            }
        }
    }

    let mut fields = Vec::with_capacity(3 + 2 * dims.len());
    fields.push(NativeValue::Ptr(array.allocated_ptr().cast()));
    fields.push(NativeValue::Ptr(array.aligned_ptr().cast()));
    fields.push(NativeValue::I64(array.offset()));
    for &extent in array.shape() {
        fields.push(NativeValue::I64(to_i64(extent, "extent")?));
    }
    fields.extend(array.strides().iter().map(|&s| NativeValue::I64(s)));
    Ok(fields)
}

/// # Safety
///
/// The descriptor fields must describe readable memory.
unsafe fn decode_dense(
    fields: &[NativeValue],
    element: DType,
    rank: usize,
    inputs: &[Value],
) -> Option<Value> {
    if fields.len() != 3 + 2 * rank {
        return None;
    }
    let allocated = fields[0].as_ptr()?.cast::<u8>();
    let aligned = fields[1].as_ptr()?.cast::<u8>();
    let offset = fields[2].as_i64()?;
    let shape = fields[3..3 + rank]
        .iter()
        .map(|f| f.as_i64().and_then(|n| u64::try_from(n).ok()))
        .collect::<Option<Vec<_>>>()?;
    let strides = fields[3 + rank..]
        .iter()
        .map(|f| f.as_i64())
        .collect::<Option<Vec<_>>>()?;

    let owner = inputs.iter().find_map(|input| match input {
        Value::Dense(array) if array.allocated_ptr() == allocated && array.dtype() == element => {
            Some(array)
        }
        _ => None,
    });
    let array = match owner {
        Some(input) => input.rewrap(aligned, offset, shape, strides),
        // SAFETY: the compiled function returned this descriptor.
        None => unsafe { DenseArray::from_foreign(element, allocated, aligned, offset, shape, strides) },
    };
    Some(Value::Dense(array))
}

// ---------------------------------------------------------------------------
// Sparse tensors
// ---------------------------------------------------------------------------

fn normalized_width(bits: u32) -> u32 {
    if bits == 0 {
        64
    } else {
        bits
    }
}

fn check_sparse(tensor: &SparseTensor, ty: &SparseTensorType, element: DType) -> JitResult<()> {
    let expected = &ty.encoding;
    if tensor.sparsity() != expected.dim_levels.as_slice() {
        let show = |levels: &[gb_ir::DimLevel]| {
            levels.iter().map(|l| l.as_str()).collect::<Vec<_>>().join(", ")
        };
        return Err(JitError::mismatch(
            MismatchKind::Sparsity,
            format!(
                "expected [{}], got [{}]",
                show(&expected.dim_levels),
                show(tensor.sparsity())
            ),
        ));
    }
    if normalized_width(tensor.index_width()) != expected.index_width() {
        return Err(JitError::mismatch(
            MismatchKind::IndexWidth,
            format!(
                "expected {} bits, got {}",
                expected.index_width(),
                tensor.index_width()
            ),
        ));
    }
    if normalized_width(tensor.pointer_width()) != expected.pointer_width() {
        return Err(JitError::mismatch(
            MismatchKind::PointerWidth,
            format!(
                "expected {} bits, got {}",
                expected.pointer_width(),
                tensor.pointer_width()
            ),
        ));
    }
    if tensor.element() != element {
        return Err(JitError::mismatch(
            MismatchKind::ElementType,
            format!("expected {element} elements, got {}", tensor.element()),
        ));
    }
    if let Some(shape) = tensor.shape() {
        let agrees = shape.len() == ty.dims.len()
            && ty
                .dims
                .iter()
                .zip(shape)
                .all(|(dim, &extent)| dim.known().map_or(true, |n| n == extent));
        if !agrees {
            return Err(JitError::mismatch(
                MismatchKind::Shape,
                format!("tensor of shape {shape:?} does not fit '{ty}'"),
            ));
        }
    }
    Ok(())
}

fn sparse_handle(handle: VoidPtr, ty: &SparseTensorType, element: DType) -> SparseTensor {
    let tensor = SparseTensor::new(handle, element, ty.encoding.dim_levels.clone())
        .with_pointer_width(ty.encoding.pointer_width())
        .with_index_width(ty.encoding.index_width());
    match ty.dims.iter().map(|d| d.known()).collect::<Option<Vec<_>>>() {
        Some(shape) => tensor.with_shape(shape),
        None => tensor,
    }
}
