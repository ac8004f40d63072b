//! IR type model.
//!
//! A closed set of type shapes the JIT host knows how to carry across the
//! native boundary. Every type prints back to valid IR text, which the
//! multi-value bridge and the type-lowering helper rely on after alias
//! resolution has erased the user's spelling.

use std::fmt;

/// Floating point kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F16,
    BF16,
    F32,
    F64,
}

impl FloatKind {
    /// Width in bits.
    #[must_use]
    pub fn width(self) -> u32 {
        match self {
            Self::F16 | Self::BF16 => 16,
            Self::F32 => 32,
            Self::F64 => 64,
        }
    }
}

/// Scalar element types: signless integers, floats and `index`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Signless integer of the given bit width (`i1`, `i8`, ..).
    Integer(u32),
    Float(FloatKind),
    /// Target-sized index; always 64 bits on supported hosts.
    Index,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(width) => write!(f, "i{width}"),
            Self::Float(FloatKind::F16) => f.write_str("f16"),
            Self::Float(FloatKind::BF16) => f.write_str("bf16"),
            Self::Float(FloatKind::F32) => f.write_str("f32"),
            Self::Float(FloatKind::F64) => f.write_str("f64"),
            Self::Index => f.write_str("index"),
        }
    }
}

/// One extent of a shaped type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(u64),
    Dynamic,
}

impl Dim {
    /// The statically known extent, if any.
    #[must_use]
    pub fn known(self) -> Option<u64> {
        match self {
            Self::Static(n) => Some(n),
            Self::Dynamic => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(n) => write!(f, "{n}"),
            Self::Dynamic => f.write_str("?"),
        }
    }
}

fn write_shape(f: &mut fmt::Formatter<'_>, dims: &[Dim], element: ScalarType) -> fmt::Result {
    for dim in dims {
        write!(f, "{dim}x")?;
    }
    write!(f, "{element}")
}

/// Which builtin shaped type a dense array was spelled as.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShapedKind {
    Tensor,
    MemRef,
}

/// A ranked dense tensor or memref.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DenseArrayType {
    pub kind: ShapedKind,
    pub dims: Vec<Dim>,
    pub element: ScalarType,
    /// Layout and memory space of a memref, as written after the element
    /// type (`strided<[?], offset: ?>`, `1`, ...).
    pub layout: Option<String>,
}

impl DenseArrayType {
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

impl fmt::Display for DenseArrayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ShapedKind::Tensor => f.write_str("tensor<")?,
            ShapedKind::MemRef => f.write_str("memref<")?,
        }
        write_shape(f, &self.dims, self.element)?;
        if let Some(layout) = &self.layout {
            write!(f, ", {layout}")?;
        }
        f.write_str(">")
    }
}

/// Storage format of one tensor level.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DimLevel {
    Dense,
    Compressed,
    Singleton,
}

impl DimLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Compressed => "compressed",
            Self::Singleton => "singleton",
        }
    }
}

impl fmt::Display for DimLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword family the encoding was written with. Printing preserves it so the
/// external toolchain sees the syntax it accepted on input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EncodingSpelling {
    /// `dimLevelType`, `dimOrdering`, `pointerBitWidth`, `indexBitWidth`.
    Legacy,
    /// `lvlTypes`, `dimToLvl`, `posWidth`, `crdWidth`.
    LevelTypes,
    /// `map = (d0, d1) -> (d0 : dense, d1 : compressed)`.
    Map,
}

/// `#sparse_tensor.encoding<{...}>` contents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SparseEncoding {
    /// Level format, in storage order.
    pub dim_levels: Vec<DimLevel>,
    /// Permutation from dimensions to levels; `None` is the identity.
    pub dim_ordering: Option<Vec<usize>>,
    /// Declared pointer (position) width; 0 means the native width.
    pub pointer_bit_width: u32,
    /// Declared index (coordinate) width; 0 means the native width.
    pub index_bit_width: u32,
    pub spelling: EncodingSpelling,
}

impl SparseEncoding {
    /// Effective pointer width in bits.
    #[must_use]
    pub fn pointer_width(&self) -> u32 {
        native_width(self.pointer_bit_width)
    }

    /// Effective index width in bits.
    #[must_use]
    pub fn index_width(&self) -> u32 {
        native_width(self.index_bit_width)
    }

    fn write_ordering(&self, f: &mut fmt::Formatter<'_>, ordering: &[usize]) -> fmt::Result {
        f.write_str("affine_map<(")?;
        write_dim_list(f, 0..self.dim_levels.len())?;
        f.write_str(") -> (")?;
        write_dim_list(f, ordering.iter().copied())?;
        f.write_str(")>")
    }
}

fn native_width(width: u32) -> u32 {
    if width == 0 {
        64
    } else {
        width
    }
}

fn write_dim_list(f: &mut fmt::Formatter<'_>, dims: impl Iterator<Item = usize>) -> fmt::Result {
    for (i, d) in dims.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "d{d}")?;
    }
    Ok(())
}

fn write_level_list(f: &mut fmt::Formatter<'_>, levels: &[DimLevel]) -> fmt::Result {
    f.write_str("[ ")?;
    for (i, level) in levels.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "\"{level}\"")?;
    }
    f.write_str(" ]")
}

impl fmt::Display for SparseEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("#sparse_tensor.encoding<{ ")?;
        match self.spelling {
            EncodingSpelling::Legacy | EncodingSpelling::LevelTypes => {
                let (levels, ordering, pos, crd) = if self.spelling == EncodingSpelling::Legacy {
                    ("dimLevelType", "dimOrdering", "pointerBitWidth", "indexBitWidth")
                } else {
                    ("lvlTypes", "dimToLvl", "posWidth", "crdWidth")
                };
                write!(f, "{levels} = ")?;
                write_level_list(f, &self.dim_levels)?;
                if let Some(order) = &self.dim_ordering {
                    write!(f, ", {ordering} = ")?;
                    self.write_ordering(f, order)?;
                }
                write!(
                    f,
                    ", {pos} = {}, {crd} = {}",
                    self.pointer_bit_width, self.index_bit_width
                )?;
            }
            EncodingSpelling::Map => {
                f.write_str("map = (")?;
                write_dim_list(f, 0..self.dim_levels.len())?;
                f.write_str(") -> (")?;
                for (level, kind) in self.dim_levels.iter().enumerate() {
                    if level > 0 {
                        f.write_str(", ")?;
                    }
                    let dim = self
                        .dim_ordering
                        .as_ref()
                        .and_then(|order| order.get(level).copied())
                        .unwrap_or(level);
                    write!(f, "d{dim} : {kind}")?;
                }
                write!(
                    f,
                    "), posWidth = {}, crdWidth = {}",
                    self.pointer_bit_width, self.index_bit_width
                )?;
            }
        }
        f.write_str(" }>")
    }
}

/// A ranked tensor carrying a sparse encoding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SparseTensorType {
    pub dims: Vec<Dim>,
    pub element: ScalarType,
    pub encoding: SparseEncoding,
}

impl SparseTensorType {
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

impl fmt::Display for SparseTensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("tensor<")?;
        write_shape(f, &self.dims, self.element)?;
        write!(f, ", {}>", self.encoding)
    }
}

/// Every type the host can see in a function signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IrType {
    Scalar(ScalarType),
    DenseArray(DenseArrayType),
    SparseTensor(SparseTensorType),
    /// `!llvm.ptr<T>`, or the untyped `!llvm.ptr` when the pointee is `None`.
    OpaquePointer(Option<Box<IrType>>),
    /// `!llvm.vec<N x ptr<T>>`.
    OpaquePointerVector {
        len: u64,
        pointee: Option<Box<IrType>>,
    },
}

impl IrType {
    #[must_use]
    pub fn integer(width: u32) -> Self {
        Self::Scalar(ScalarType::Integer(width))
    }

    #[must_use]
    pub fn f64() -> Self {
        Self::Scalar(ScalarType::Float(FloatKind::F64))
    }

    #[must_use]
    pub fn pointer_to(pointee: IrType) -> Self {
        Self::OpaquePointer(Some(Box::new(pointee)))
    }

    /// `!llvm.ptr<i8>` or the untyped `!llvm.ptr`: a raw handle slot.
    #[must_use]
    pub fn is_byte_pointer(&self) -> bool {
        match self {
            Self::OpaquePointer(None) => true,
            Self::OpaquePointer(Some(pointee)) => {
                **pointee == Self::Scalar(ScalarType::Integer(8))
            }
            _ => false,
        }
    }
}

fn write_pointer(f: &mut fmt::Formatter<'_>, pointee: Option<&IrType>) -> fmt::Result {
    match pointee {
        Some(ty) => write!(f, "!llvm.ptr<{ty}>"),
        None => f.write_str("!llvm.ptr"),
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::DenseArray(d) => write!(f, "{d}"),
            Self::SparseTensor(s) => write!(f, "{s}"),
            Self::OpaquePointer(pointee) => write_pointer(f, pointee.as_deref()),
            Self::OpaquePointerVector { len, pointee } => match pointee {
                Some(ty) => write!(f, "!llvm.vec<{len} x ptr<{ty}>>"),
                None => write!(f, "!llvm.vec<{len} x ptr>"),
            },
        }
    }
}

#[cfg(test)]
mod tests;
