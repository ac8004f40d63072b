//! Host values passed to and returned from compiled functions.
//!
//! Scalars, dense arrays and sparse tensor handles are the three value
//! families the ABI mapper knows how to encode. Opaque objects participate
//! through the [`HostObject`] capability rather than a concrete type.

mod dense;
mod sparse;

use std::fmt;
use std::rc::Rc;

use gb_ir::{FloatKind, ScalarType};
use serde::{Deserialize, Serialize};

use crate::error::{JitError, JitResult};

pub use dense::{DenseArray, Element};
pub use sparse::{HostObject, SparseTensor, VoidPtr};

/// Host element types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U64,
    F32,
    F64,
}

impl DType {
    /// Size in bytes of one element.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::Bool | Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::U64 => "uint64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }

    /// Host type for an IR scalar; `index` is unsigned 64-bit.
    pub fn for_scalar(ty: ScalarType) -> JitResult<Self> {
        match ty {
            ScalarType::Integer(1) => Ok(Self::Bool),
            ScalarType::Integer(8) => Ok(Self::I8),
            ScalarType::Integer(16) => Ok(Self::I16),
            ScalarType::Integer(32) => Ok(Self::I32),
            ScalarType::Integer(64) => Ok(Self::I64),
            ScalarType::Index => Ok(Self::U64),
            ScalarType::Float(FloatKind::F32) => Ok(Self::F32),
            ScalarType::Float(FloatKind::F64) => Ok(Self::F64),
            ScalarType::Integer(_) => Err(JitError::unsupported(
                ty,
                "integer width has no native equivalent",
            )),
            ScalarType::Float(FloatKind::F16 | FloatKind::BF16) => Err(JitError::unsupported(
                ty,
                "half-precision floats have no native host type",
            )),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single host scalar.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    #[must_use]
    pub fn dtype(self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::I8(_) => DType::I8,
            Self::I16(_) => DType::I16,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
            Self::U64(_) => DType::U64,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
        }
    }

    fn integer_value(self) -> Option<i128> {
        match self {
            Self::Bool(b) => Some(i128::from(b)),
            Self::I8(v) => Some(i128::from(v)),
            Self::I16(v) => Some(i128::from(v)),
            Self::I32(v) => Some(i128::from(v)),
            Self::I64(v) => Some(i128::from(v)),
            Self::U64(v) => Some(i128::from(v)),
            Self::F32(_) | Self::F64(_) => None,
        }
    }

    /// Convert without losing information.
    ///
    /// Integers convert when the value fits the target; any integer converts
    /// to a float. Floats never become integers and `f64` never narrows.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        reason = "integer to float conversion is the accepted widening"
    )]
    pub fn cast(self, target: DType) -> Option<Scalar> {
        match (self, target) {
            (Self::Bool(b), DType::Bool) => Some(Self::Bool(b)),
            (_, DType::Bool) => None,
            (Self::F32(v), DType::F32) => Some(Self::F32(v)),
            (Self::F32(v), DType::F64) => Some(Self::F64(f64::from(v))),
            (Self::F64(v), DType::F64) => Some(Self::F64(v)),
            (Self::F32(_) | Self::F64(_), _) => None,
            (int, DType::F32) => int.integer_value().map(|v| Self::F32(v as f32)),
            (int, DType::F64) => int.integer_value().map(|v| Self::F64(v as f64)),
            (int, _) => {
                let v = int.integer_value()?;
                match target {
                    DType::I8 => i8::try_from(v).ok().map(Self::I8),
                    DType::I16 => i16::try_from(v).ok().map(Self::I16),
                    DType::I32 => i32::try_from(v).ok().map(Self::I32),
                    DType::I64 => i64::try_from(v).ok().map(Self::I64),
                    DType::U64 => u64::try_from(v).ok().map(Self::U64),
                    DType::Bool | DType::F32 | DType::F64 => None,
                }
            }
        }
    }

    /// Integer view of the value, for tests and callers that know the type.
    #[must_use]
    pub fn as_i64(self) -> Option<i64> {
        self.integer_value().and_then(|v| i64::try_from(v).ok())
    }

    #[must_use]
    pub fn as_f64(self) -> Option<f64> {
        match self.cast(DType::F64) {
            Some(Self::F64(v)) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::Scalar(Scalar::$variant(v))
                }
            }
        )*
    };
}

scalar_from!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

/// Any value a caller can pass to a compiled function.
#[derive(Clone, Debug)]
pub enum Value {
    Scalar(Scalar),
    Dense(DenseArray),
    Sparse(SparseTensor),
    /// A bare `void*` pass-through.
    Pointer(VoidPtr),
    /// An object exposing sparse-tensor or raw-pointer views.
    Handle(Rc<dyn HostObject>),
    /// Elements of a pointer-to-array argument.
    Sequence(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Dense(_) => "dense array",
            Self::Sparse(_) => "sparse tensor",
            Self::Pointer(_) => "pointer",
            Self::Handle(_) => "host object",
            Self::Sequence(_) => "sequence",
        }
    }

    #[must_use]
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_dense(&self) -> Option<&DenseArray> {
        match self {
            Self::Dense(d) => Some(d),
            _ => None,
        }
    }

    /// The sparse tensor this value is, or can be viewed as.
    #[must_use]
    pub fn sparse_view(&self) -> Option<SparseTensor> {
        match self {
            Self::Sparse(s) => Some(s.clone()),
            Self::Handle(h) => h.as_sparse(),
            _ => None,
        }
    }

    /// The raw handle for a `void*` slot: sparse tensors first, then any
    /// generic pointer capability.
    #[must_use]
    pub fn raw_handle(&self) -> Option<VoidPtr> {
        match self {
            Self::Sparse(s) => Some(s.handle()),
            Self::Pointer(p) => Some(*p),
            Self::Handle(h) => h
                .as_sparse()
                .map(|s| s.handle())
                .or_else(|| h.void_ptr()),
            Self::Scalar(_) | Self::Dense(_) | Self::Sequence(_) => None,
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

impl From<DenseArray> for Value {
    fn from(d: DenseArray) -> Self {
        Self::Dense(d)
    }
}

impl From<SparseTensor> for Value {
    fn from(s: SparseTensor) -> Self {
        Self::Sparse(s)
    }
}

impl From<VoidPtr> for Value {
    fn from(p: VoidPtr) -> Self {
        Self::Pointer(p)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Sequence(items)
    }
}

/// What a call returns: nothing, one value, or one value per IR result.
#[derive(Clone, Debug)]
pub enum Output {
    None,
    Single(Value),
    Tuple(Vec<Value>),
}

impl Output {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn into_single(self) -> Option<Value> {
        match self {
            Self::Single(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_tuple(self) -> Option<Vec<Value>> {
        match self {
            Self::Tuple(values) => Some(values),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests panic on failure")]
mod tests;
