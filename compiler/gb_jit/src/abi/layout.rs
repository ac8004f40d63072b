//! Native primitives and C record layout.

use std::ffi::c_void;

/// One native field: the unit libffi and the record layout work with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NativeKind {
    Int { bytes: u8, signed: bool },
    Float { bytes: u8 },
    Pointer,
}

impl NativeKind {
    pub const I64: Self = Self::Int {
        bytes: 8,
        signed: true,
    };

    /// Size in bytes. Every primitive is aligned to its size.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::Int { bytes, .. } | Self::Float { bytes } => usize::from(bytes),
            Self::Pointer => std::mem::size_of::<*mut c_void>(),
        }
    }

    #[must_use]
    pub fn align(self) -> usize {
        self.size()
    }
}

/// A value of one [`NativeKind`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum NativeValue {
    I8(i8),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(*mut c_void),
}

impl NativeValue {
    #[must_use]
    pub fn kind(self) -> NativeKind {
        match self {
            Self::I8(_) => NativeKind::Int {
                bytes: 1,
                signed: true,
            },
            Self::U8(_) => NativeKind::Int {
                bytes: 1,
                signed: false,
            },
            Self::I16(_) => NativeKind::Int {
                bytes: 2,
                signed: true,
            },
            Self::I32(_) => NativeKind::Int {
                bytes: 4,
                signed: true,
            },
            Self::I64(_) => NativeKind::I64,
            Self::U64(_) => NativeKind::Int {
                bytes: 8,
                signed: false,
            },
            Self::F32(_) => NativeKind::Float { bytes: 4 },
            Self::F64(_) => NativeKind::Float { bytes: 8 },
            Self::Ptr(_) => NativeKind::Pointer,
        }
    }

    #[must_use]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_ptr(self) -> Option<*mut c_void> {
        match self {
            Self::Ptr(p) => Some(p),
            _ => None,
        }
    }

    /// Store the value at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `self.kind().size()` bytes.
    pub unsafe fn write_to(self, ptr: *mut u8) {
        // SAFETY: guaranteed by the caller.
        unsafe {
            match self {
                Self::I8(v) => ptr.cast::<i8>().write_unaligned(v),
                Self::U8(v) => ptr.write(v),
                Self::I16(v) => ptr.cast::<i16>().write_unaligned(v),
                Self::I32(v) => ptr.cast::<i32>().write_unaligned(v),
                Self::I64(v) => ptr.cast::<i64>().write_unaligned(v),
                Self::U64(v) => ptr.cast::<u64>().write_unaligned(v),
                Self::F32(v) => ptr.cast::<f32>().write_unaligned(v),
                Self::F64(v) => ptr.cast::<f64>().write_unaligned(v),
                Self::Ptr(v) => ptr.cast::<*mut c_void>().write_unaligned(v),
            }
        }
    }

    /// Load a value of `kind` from `ptr`.
    ///
    /// Integer kinds without a dedicated variant (unsigned 2/4 bytes) never
    /// occur in descriptors and read as their signed counterpart.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `kind.size()` bytes.
    pub unsafe fn read_from(kind: NativeKind, ptr: *const u8) -> Self {
        // SAFETY: guaranteed by the caller.
        unsafe {
            match kind {
                NativeKind::Int {
                    bytes: 1,
                    signed: false,
                } => Self::U8(ptr.read()),
                NativeKind::Int { bytes: 1, .. } => Self::I8(ptr.cast::<i8>().read()),
                NativeKind::Int { bytes: 2, .. } => Self::I16(ptr.cast::<i16>().read_unaligned()),
                NativeKind::Int { bytes: 4, .. } => Self::I32(ptr.cast::<i32>().read_unaligned()),
                NativeKind::Int { signed: false, .. } => {
                    Self::U64(ptr.cast::<u64>().read_unaligned())
                }
                NativeKind::Int { .. } => Self::I64(ptr.cast::<i64>().read_unaligned()),
                NativeKind::Float { bytes: 4 } => Self::F32(ptr.cast::<f32>().read_unaligned()),
                NativeKind::Float { .. } => Self::F64(ptr.cast::<f64>().read_unaligned()),
                NativeKind::Pointer => Self::Ptr(ptr.cast::<*mut c_void>().read_unaligned()),
            }
        }
    }
}

/// Field offsets of a C struct made of native fields, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordLayout {
    offsets: Vec<usize>,
    size: usize,
    align: usize,
}

impl RecordLayout {
    #[must_use]
    pub fn of(fields: &[NativeKind]) -> Self {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut size = 0usize;
        let mut align = 1usize;
        for field in fields {
            let field_align = field.align();
            size = size.next_multiple_of(field_align);
            offsets.push(size);
            size += field.size();
            align = align.max(field_align);
        }
        Self {
            offsets,
            size: size.next_multiple_of(align),
            align,
        }
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Total size including tail padding.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// Store `values` as one record at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be valid for writes of `self.size()` bytes and `values`
    /// must match the fields this layout was computed from.
    pub unsafe fn write(&self, values: &[NativeValue], base: *mut u8) {
        for (value, &offset) in values.iter().zip(&self.offsets) {
            // SAFETY: offsets lie within the record.
            unsafe { value.write_to(base.add(offset)) };
        }
    }

    /// Load one record from `base`.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads of `self.size()` bytes and `fields`
    /// must be the fields this layout was computed from.
    pub unsafe fn read(&self, fields: &[NativeKind], base: *const u8) -> Vec<NativeValue> {
        fields
            .iter()
            .zip(&self.offsets)
            // SAFETY: offsets lie within the record.
            .map(|(&kind, &offset)| unsafe { NativeValue::read_from(kind, base.add(offset)) })
            .collect()
    }
}
