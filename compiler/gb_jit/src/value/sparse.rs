//! Opaque handles: sparse tensors and raw pointers.

use std::ffi::c_void;
use std::fmt;

use gb_ir::DimLevel;

use super::DType;

/// A raw pointer passed through a `void*` slot untouched.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct VoidPtr(*mut c_void);

impl VoidPtr {
    #[must_use]
    pub fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    #[must_use]
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    #[must_use]
    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    #[must_use]
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for VoidPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoidPtr({:#x})", self.addr())
    }
}

/// The raw-handle capability.
///
/// Host types that wrap sparse tensors or other native objects implement
/// this to be accepted wherever compiled code takes a `void*`.
pub trait HostObject: fmt::Debug {
    /// The sparse tensor this object wraps, if any.
    fn as_sparse(&self) -> Option<SparseTensor> {
        None
    }

    /// A generic pointer view, consulted after [`HostObject::as_sparse`].
    fn void_ptr(&self) -> Option<VoidPtr> {
        None
    }
}

impl HostObject for VoidPtr {
    fn void_ptr(&self) -> Option<VoidPtr> {
        Some(*self)
    }
}

/// A handle to a sparse tensor owned by the sparse runtime.
///
/// The host never dereferences or frees the handle; it only checks the
/// recorded properties against the compiled signature before passing it on.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseTensor {
    handle: VoidPtr,
    element: DType,
    pointer_width: u32,
    index_width: u32,
    sparsity: Vec<DimLevel>,
    shape: Option<Vec<u64>>,
}

impl SparseTensor {
    /// A handle with native 64-bit pointer and index widths.
    #[must_use]
    pub fn new(handle: VoidPtr, element: DType, sparsity: Vec<DimLevel>) -> Self {
        Self {
            handle,
            element,
            pointer_width: 64,
            index_width: 64,
            sparsity,
            shape: None,
        }
    }

    #[must_use]
    pub fn with_pointer_width(mut self, bits: u32) -> Self {
        self.pointer_width = bits;
        self
    }

    #[must_use]
    pub fn with_index_width(mut self, bits: u32) -> Self {
        self.index_width = bits;
        self
    }

    #[must_use]
    pub fn with_shape(mut self, shape: impl Into<Vec<u64>>) -> Self {
        self.shape = Some(shape.into());
        self
    }

    pub fn handle(&self) -> VoidPtr {
        self.handle
    }

    pub fn element(&self) -> DType {
        self.element
    }

    pub fn pointer_width(&self) -> u32 {
        self.pointer_width
    }

    pub fn index_width(&self) -> u32 {
        self.index_width
    }

    /// Per-dimension level format, in storage order.
    pub fn sparsity(&self) -> &[DimLevel] {
        &self.sparsity
    }

    pub fn shape(&self) -> Option<&[u64]> {
        self.shape.as_deref()
    }

    pub fn rank(&self) -> usize {
        self.sparsity.len()
    }
}

impl HostObject for SparseTensor {
    fn as_sparse(&self) -> Option<SparseTensor> {
        Some(self.clone())
    }
}
