//! Type-directed ABI mapping between host values and compiled code.
//!
//! Every IR type in a public signature maps to an [`AbiDescriptor`]: the flat
//! list of native fields the lowered function expects, their C record
//! layout, and the codec that moves a host [`Value`](crate::Value) in and
//! out of those fields.
//!
//! Descriptors depend only on the type, so a function's ABI is computed once
//! when it is registered and reused for every call. Value checks (element
//! type, rank, static extents, sparse properties) happen at encode time.
//!
//! # Native forms
//!
//! | IR type | Fields |
//! |---------|--------|
//! | scalar | one integer or float |
//! | dense array of rank N | allocated ptr, aligned ptr, offset, N sizes, N strides |
//! | sparse tensor | one pointer to runtime storage |
//! | `!llvm.ptr<i8>` | one pointer taken from a raw-handle capability |
//! | `!llvm.ptr<T>` | one pointer to a contiguous native array of `T` |
//!
//! Dense arguments are passed as their expanded fields; a dense result comes
//! back as one record of the same fields.

mod codec;
mod layout;

use gb_ir::{Dim, FunctionSignature, IrType, SparseTensorType};

use crate::error::{JitError, JitResult};
use crate::value::DType;

pub use codec::Scratch;
pub use layout::{NativeKind, NativeValue, RecordLayout};

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// How a value crosses the call boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Passing {
    /// Fields passed (or a record returned) by value.
    Direct,
    /// The callee stores a record through a caller-provided pointer.
    OutPointer,
}

/// Encode/decode strategy, one per IR type family.
#[derive(Clone, Debug, PartialEq)]
enum Codec {
    Scalar(DType),
    Dense { element: DType, dims: Vec<Dim> },
    Sparse { ty: SparseTensorType, element: DType },
    BytePointer,
    PointerArray(Box<AbiDescriptor>),
}

/// Native representation and codec of one IR type.
#[derive(Clone, Debug, PartialEq)]
pub struct AbiDescriptor {
    ty: IrType,
    fields: Vec<NativeKind>,
    layout: RecordLayout,
    codec: Codec,
    passing: Passing,
}

impl AbiDescriptor {
    fn new(ty: &IrType, fields: Vec<NativeKind>, codec: Codec, passing: Passing) -> Self {
        Self {
            ty: ty.clone(),
            layout: RecordLayout::of(&fields),
            fields,
            codec,
            passing,
        }
    }

    /// The IR type this descriptor was derived from.
    pub fn ty(&self) -> &IrType {
        &self.ty
    }

    pub fn fields(&self) -> &[NativeKind] {
        &self.fields
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn passing(&self) -> Passing {
        self.passing
    }

    /// Whether the decoded value points into process-local memory that a
    /// copy cannot carry (sparse handles, raw pointers).
    pub(crate) fn is_process_local(&self) -> bool {
        !matches!(self.codec, Codec::Scalar(_) | Codec::Dense { .. })
    }
}

fn scalar_kind(dtype: DType) -> NativeKind {
    match dtype {
        DType::Bool => NativeKind::Int {
            bytes: 1,
            signed: false,
        },
        DType::I8 => NativeKind::Int {
            bytes: 1,
            signed: true,
        },
        DType::I16 => NativeKind::Int {
            bytes: 2,
            signed: true,
        },
        DType::I32 => NativeKind::Int {
            bytes: 4,
            signed: true,
        },
        DType::I64 => NativeKind::I64,
        DType::U64 => NativeKind::Int {
            bytes: 8,
            signed: false,
        },
        DType::F32 => NativeKind::Float { bytes: 4 },
        DType::F64 => NativeKind::Float { bytes: 8 },
    }
}

/// Derive the descriptor for `ty`.
///
/// With `as_output_pointer` the value is returned by storing a record
/// through a pointer instead of in registers.
pub fn abi_for(ty: &IrType, as_output_pointer: bool) -> JitResult<AbiDescriptor> {
    let passing = if as_output_pointer {
        Passing::OutPointer
    } else {
        Passing::Direct
    };
    let descriptor = match ty {
        IrType::Scalar(scalar) => {
            let dtype = DType::for_scalar(*scalar)?;
            AbiDescriptor::new(ty, vec![scalar_kind(dtype)], Codec::Scalar(dtype), passing)
        }
        IrType::DenseArray(dense) => {
            let element = DType::for_scalar(dense.element)?;
            let mut fields = vec![NativeKind::Pointer, NativeKind::Pointer, NativeKind::I64];
            fields.extend(std::iter::repeat(NativeKind::I64).take(2 * dense.rank()));
            let codec = Codec::Dense {
                element,
                dims: dense.dims.clone(),
            };
            AbiDescriptor::new(ty, fields, codec, passing)
        }
        IrType::SparseTensor(sparse) => {
            let element = DType::for_scalar(sparse.element)?;
            let codec = Codec::Sparse {
                ty: sparse.clone(),
                element,
            };
            AbiDescriptor::new(ty, vec![NativeKind::Pointer], codec, passing)
        }
        IrType::OpaquePointer(Some(pointee)) if !ty.is_byte_pointer() => {
            let element = abi_for(pointee, false)?;
            let codec = Codec::PointerArray(Box::new(element));
            AbiDescriptor::new(ty, vec![NativeKind::Pointer], codec, passing)
        }
        IrType::OpaquePointer(_) => {
            AbiDescriptor::new(ty, vec![NativeKind::Pointer], Codec::BytePointer, passing)
        }
        IrType::OpaquePointerVector { .. } => {
            return Err(JitError::unsupported(
                ty,
                "pointer vectors cannot cross the call boundary",
            ));
        }
    };
    Ok(descriptor)
}

// ---------------------------------------------------------------------------
// Function ABI
// ---------------------------------------------------------------------------

/// Physical ABI of one public function.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionAbi {
    pub args: Vec<AbiDescriptor>,
    /// Empty for no result; one `Direct` result; or N `OutPointer` results
    /// filled by the multi-value wrapper.
    pub results: Vec<AbiDescriptor>,
}

impl FunctionAbi {
    /// Whether the function goes through a multi-value wrapper.
    pub fn uses_out_pointers(&self) -> bool {
        self.results.len() > 1
    }
}

/// Compute the ABI of every argument and result of `sig`.
pub fn compute_function_abi(sig: &FunctionSignature) -> JitResult<FunctionAbi> {
    let args = sig
        .args
        .iter()
        .map(|arg| abi_for(&arg.ty, false))
        .collect::<JitResult<Vec<_>>>()?;
    let out_pointers = sig.results.len() > 1;
    let results = sig
        .results
        .iter()
        .map(|ty| abi_for(ty, out_pointers))
        .collect::<JitResult<Vec<_>>>()?;
    Ok(FunctionAbi { args, results })
}
